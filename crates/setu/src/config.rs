//! Per-call and default request configuration.

use crate::body::{Body, Multipart};
use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::progress::{ProgressCallback, ProgressSnapshot};
use crate::retry::RetryCounting;
use bytes::Bytes;
use futures_util::Stream;
use serde::Serialize;
use setu_config::{RetryCountingSetting, SetuSettings};
use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// How the response body is delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ResponseType {
    /// Parsed JSON value.
    #[default]
    Json,
    /// UTF-8 text.
    Text,
    /// Bytes typed by the response `Content-Type`.
    Blob,
    /// Live, unbuffered byte stream.
    Stream,
    /// Untyped bytes.
    ArrayBuffer,
}

impl ResponseType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
            Self::Blob => "blob",
            Self::Stream => "stream",
            Self::ArrayBuffer => "arrayBuffer",
        }
    }

    /// Whether the parser reads the whole body into memory.
    pub fn is_buffered(self) -> bool {
        self != Self::Stream
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            "blob" => Ok(Self::Blob),
            "stream" => Ok(Self::Stream),
            "arrayBuffer" | "arraybuffer" | "array_buffer" => Ok(Self::ArrayBuffer),
            other => Err(Error::config(format!(
                "unknown response type '{other}' (expected json, text, blob, stream or arrayBuffer)"
            ))),
        }
    }
}

/// Predicate deciding which status codes count as success.
pub type ValidateStatus = Arc<dyn Fn(u16) -> bool + Send + Sync>;

/// The default success range, 200 to 299 inclusive.
pub fn default_validate_status(status: u16) -> bool {
    (200..=299).contains(&status)
}

/// Request configuration.
///
/// Used both as process-wide defaults and per call. Every field is optional;
/// [`RequestConfig::merge`] layers a call over the defaults.
#[derive(Clone, Default)]
pub struct RequestConfig {
    /// Prefix for relative URLs.
    pub base_url: Option<String>,
    /// Header pairs. Names compare case-insensitively.
    pub headers: Vec<(String, String)>,
    /// Query parameters appended to the URL.
    pub params: Vec<(String, String)>,
    /// Per-attempt deadline. Zero disables it.
    pub timeout: Option<Duration>,
    /// Retry budget for network failures and timeouts.
    pub retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub retry_counting: Option<RetryCounting>,
    pub body: Option<Body>,
    pub response_type: Option<ResponseType>,
    pub on_upload_progress: Option<ProgressCallback>,
    pub on_download_progress: Option<ProgressCallback>,
    pub validate_status: Option<ValidateStatus>,
    pub max_redirects: Option<u32>,
    pub cancellation_token: Option<CancellationToken>,
}

impl RequestConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer `call` over `self`. Scalars from `call` win; headers merge by
    /// name with `call` overriding per key; params likewise, with repeats
    /// inside one config kept.
    pub fn merge(&self, call: &RequestConfig) -> RequestConfig {
        let mut headers = self.headers.clone();
        for (name, value) in &call.headers {
            set_header(&mut headers, name, value);
        }

        let mut params: Vec<(String, String)> = self
            .params
            .iter()
            .filter(|(name, _)| !call.params.iter().any(|(n, _)| n == name))
            .cloned()
            .collect();
        params.extend(call.params.iter().cloned());

        RequestConfig {
            base_url: call.base_url.clone().or_else(|| self.base_url.clone()),
            headers,
            params,
            timeout: call.timeout.or(self.timeout),
            retries: call.retries.or(self.retries),
            retry_delay: call.retry_delay.or(self.retry_delay),
            retry_counting: call.retry_counting.or(self.retry_counting),
            body: call.body.clone().or_else(|| self.body.clone()),
            response_type: call.response_type.or(self.response_type),
            on_upload_progress: call
                .on_upload_progress
                .clone()
                .or_else(|| self.on_upload_progress.clone()),
            on_download_progress: call
                .on_download_progress
                .clone()
                .or_else(|| self.on_download_progress.clone()),
            validate_status: call
                .validate_status
                .clone()
                .or_else(|| self.validate_status.clone()),
            max_redirects: call.max_redirects.or(self.max_redirects),
            cancellation_token: call
                .cancellation_token
                .clone()
                .or_else(|| self.cancellation_token.clone()),
        }
    }

    /// Look up a header value by case-insensitive name.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set a header, replacing any value under the same name.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        set_header(&mut self.headers, name.as_ref(), value.as_ref());
        self
    }

    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in headers {
            set_header(&mut self.headers, name.as_ref(), value.as_ref());
        }
        self
    }

    /// Add bearer token authorization.
    pub fn bearer_auth(self, token: impl AsRef<str>) -> Self {
        let value = format!("Bearer {}", token.as_ref());
        self.header("Authorization", value)
    }

    /// Append a query parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((name.into(), value.to_string()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout_ms(self, millis: u64) -> Self {
        self.timeout(Duration::from_millis(millis))
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn retry_delay_ms(self, millis: u64) -> Self {
        self.retry_delay(Duration::from_millis(millis))
    }

    pub fn retry_counting(mut self, counting: RetryCounting) -> Self {
        self.retry_counting = Some(counting);
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Send `value` as JSON.
    pub fn json(self, value: serde_json::Value) -> Self {
        self.body(Body::Json(value))
    }

    /// Serialize `value` and send it as JSON.
    pub fn try_json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self> {
        let value = serde_json::to_value(value)
            .map_err(|e| Error::config(format!("body is not serializable: {e}")).with_source(e))?;
        Ok(self.json(value))
    }

    pub fn text(self, text: impl Into<String>) -> Self {
        self.body(Body::Text(text.into()))
    }

    pub fn bytes(self, bytes: impl Into<Bytes>) -> Self {
        self.body(Body::Bytes(bytes.into()))
    }

    pub fn multipart(self, form: Multipart) -> Self {
        self.body(Body::Multipart(form))
    }

    /// Stream the body from `stream`. Sent at most once, so never retried.
    pub fn stream_body<S>(self, stream: S, length: Option<u64>) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        self.body(Body::stream(stream, length))
    }

    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = Some(response_type);
        self
    }

    pub fn on_upload_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressSnapshot) + Send + Sync + 'static,
    {
        self.on_upload_progress = Some(Arc::new(callback));
        self
    }

    pub fn on_download_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressSnapshot) + Send + Sync + 'static,
    {
        self.on_download_progress = Some(Arc::new(callback));
        self
    }

    pub fn validate_status<F>(mut self, predicate: F) -> Self
    where
        F: Fn(u16) -> bool + Send + Sync + 'static,
    {
        self.validate_status = Some(Arc::new(predicate));
        self
    }

    pub fn max_redirects(mut self, max: u32) -> Self {
        self.max_redirects = Some(max);
        self
    }

    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }
}

fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    match headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
        Some(existing) => *existing = (name.to_string(), value.to_string()),
        None => headers.push((name.to_string(), value.to_string())),
    }
}

impl fmt::Debug for RequestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestConfig")
            .field("base_url", &self.base_url)
            .field("headers", &self.headers)
            .field("params", &self.params)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .field("retry_counting", &self.retry_counting)
            .field("body", &self.body)
            .field("response_type", &self.response_type)
            .field("on_upload_progress", &self.on_upload_progress.is_some())
            .field("on_download_progress", &self.on_download_progress.is_some())
            .field("validate_status", &self.validate_status.is_some())
            .field("max_redirects", &self.max_redirects)
            .field("cancellation_token", &self.cancellation_token)
            .finish()
    }
}

impl TryFrom<&SetuSettings> for RequestConfig {
    type Error = Error;

    fn try_from(settings: &SetuSettings) -> Result<Self> {
        let response_type = settings.response_type.parse::<ResponseType>()?;
        let counting = match settings.retry_counting {
            RetryCountingSetting::Additional => RetryCounting::Additional,
            RetryCountingSetting::Total => RetryCounting::Total,
        };

        Ok(RequestConfig {
            base_url: settings.base_url.clone(),
            headers: settings
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            timeout: (settings.timeout_ms > 0).then(|| Duration::from_millis(settings.timeout_ms)),
            retries: Some(settings.retries),
            retry_delay: Some(Duration::from_millis(settings.retry_delay_ms)),
            retry_counting: Some(counting),
            response_type: Some(response_type),
            max_redirects: Some(settings.max_redirects),
            ..RequestConfig::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_call_params_override_defaults_per_name() {
        let defaults = RequestConfig::new().param("page", 1).param("sort", "name");
        let call = RequestConfig::new().param("page", 2).param("tag", "a").param("tag", "b");

        let merged = defaults.merge(&call);
        assert_eq!(
            merged.params,
            vec![
                ("sort".to_string(), "name".to_string()),
                ("page".to_string(), "2".to_string()),
                ("tag".to_string(), "a".to_string()),
                ("tag".to_string(), "b".to_string()),
            ]
        );
    }

    #[test]
    fn test_response_type_parse() {
        assert_eq!("json".parse::<ResponseType>().unwrap(), ResponseType::Json);
        assert_eq!(
            "arrayBuffer".parse::<ResponseType>().unwrap(),
            ResponseType::ArrayBuffer
        );
        assert_eq!(ResponseType::ArrayBuffer.to_string(), "arrayBuffer");

        let err = "xml".parse::<ResponseType>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.message().contains("xml"));
    }

    #[test]
    fn test_default_validate_status() {
        assert!(default_validate_status(200));
        assert!(default_validate_status(299));
        assert!(!default_validate_status(199));
        assert!(!default_validate_status(300));
        assert!(!default_validate_status(500));
    }

    #[test]
    fn test_header_merge_adds_keys() {
        let defaults = RequestConfig::new().header("A", "1");
        let call = RequestConfig::new().header("B", "2");

        let merged = defaults.merge(&call);
        assert_eq!(
            merged.headers,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "2".to_string())
            ]
        );
    }

    #[test]
    fn test_header_merge_overrides_per_key() {
        let defaults = RequestConfig::new().header("A", "1").header("C", "x");
        let call = RequestConfig::new().header("a", "3");

        let merged = defaults.merge(&call);
        assert_eq!(merged.header_value("A"), Some("3"));
        assert_eq!(merged.header_value("C"), Some("x"));
        assert_eq!(merged.headers.len(), 2);
    }

    #[test]
    fn test_scalar_merge_call_wins() {
        let defaults = RequestConfig::new()
            .timeout_ms(5000)
            .retries(3)
            .base_url("https://api.example.com");
        let call = RequestConfig::new().retries(0);

        let merged = defaults.merge(&call);
        assert_eq!(merged.timeout, Some(Duration::from_millis(5000)));
        assert_eq!(merged.retries, Some(0));
        assert_eq!(merged.base_url.as_deref(), Some("https://api.example.com"));
    }

    #[test]
    fn test_bearer_auth() {
        let config = RequestConfig::new().bearer_auth("token123");
        assert_eq!(config.header_value("authorization"), Some("Bearer token123"));
    }

    #[test]
    fn test_try_json() {
        #[derive(Serialize)]
        struct User {
            id: u32,
        }
        let config = RequestConfig::new().try_json(&User { id: 1 }).unwrap();
        match config.body {
            Some(Body::Json(v)) => assert_eq!(v, serde_json::json!({ "id": 1 })),
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_from_settings() {
        let mut settings = SetuSettings {
            base_url: Some("https://api.example.com".to_string()),
            timeout_ms: 2500,
            retries: 2,
            retry_delay_ms: 100,
            response_type: "text".to_string(),
            ..SetuSettings::default()
        };
        settings
            .headers
            .insert("X-Client".to_string(), "setu".to_string());

        let config = RequestConfig::try_from(&settings).unwrap();
        assert_eq!(config.timeout, Some(Duration::from_millis(2500)));
        assert_eq!(config.retries, Some(2));
        assert_eq!(config.retry_delay, Some(Duration::from_millis(100)));
        assert_eq!(config.response_type, Some(ResponseType::Text));
        assert_eq!(config.header_value("x-client"), Some("setu"));

        settings.response_type = "document".to_string();
        let err = RequestConfig::try_from(&settings).unwrap_err();
        assert_eq!(err.code(), Some("config"));
    }

    #[test]
    fn test_zero_timeout_setting_means_none() {
        let settings = SetuSettings {
            timeout_ms: 0,
            ..SetuSettings::default()
        };
        let config = RequestConfig::try_from(&settings).unwrap();
        assert_eq!(config.timeout, None);
    }
}
