//! Turning defaults, call configuration and a URL into one request.

use crate::body::{Body, BodyStream, Multipart, OneShotStream};
use crate::cancel::CancellationToken;
use crate::config::{default_validate_status, RequestConfig, ResponseType, ValidateStatus};
use crate::error::{Error, Result, TransportError};
use crate::retry::{RetryCounting, RetryPolicy};
use bytes::Bytes;
use futures_util::stream;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Redirects followed when nothing else is configured.
pub const DEFAULT_MAX_REDIRECTS: u32 = 20;

/// Upload chunk size for in-memory bodies.
const CHUNK_SIZE: usize = 16 * 1024;

/// Common HTTP header values.
pub mod headers {
    pub const CONTENT_TYPE_JSON: &str = "application/json";
    pub const CONTENT_TYPE_TEXT: &str = "text/plain;charset=utf-8";
    pub const ACCEPT_JSON: &str = "application/json, text/plain, */*";
}

/// Payload of a normalized request.
#[derive(Debug, Clone)]
pub(crate) enum RequestBody {
    Empty,
    Bytes(Bytes),
    Multipart(Multipart),
    Stream(OneShotStream),
}

impl RequestBody {
    /// Whether the body can be sent again on retry or redirect.
    pub(crate) fn is_replayable(&self) -> bool {
        !matches!(self, RequestBody::Stream(_))
    }

    /// Open a fresh pass over the body with its length, if known.
    pub(crate) async fn open(&self) -> std::result::Result<Option<(BodyStream, Option<u64>)>, TransportError> {
        match self {
            RequestBody::Empty => Ok(None),
            RequestBody::Bytes(bytes) => {
                let chunks: Vec<io::Result<Bytes>> = (0..bytes.len())
                    .step_by(CHUNK_SIZE)
                    .map(|start| Ok(bytes.slice(start..(start + CHUNK_SIZE).min(bytes.len()))))
                    .collect();
                Ok(Some((Box::pin(stream::iter(chunks)), Some(bytes.len() as u64))))
            }
            RequestBody::Multipart(form) => {
                let length = form
                    .content_length()
                    .await
                    .map_err(|e| {
                        TransportError::InvalidRequest(format!("failed to read multipart body: {e}"))
                    })?;
                Ok(Some((form.clone().into_stream(), Some(length))))
            }
            RequestBody::Stream(shot) => match shot.take() {
                Some(stream) => Ok(Some((stream, shot.length()))),
                None => Err(TransportError::InvalidRequest(
                    "stream body was already consumed".to_string(),
                )),
            },
        }
    }
}

/// A fully resolved request, ready for the engine.
pub struct NormalizedRequest {
    pub(crate) method: Method,
    pub(crate) url: Url,
    pub(crate) headers: HeaderMap,
    pub(crate) body: RequestBody,
    pub(crate) response_type: ResponseType,
    pub(crate) timeout: Option<Duration>,
    pub(crate) retry: RetryPolicy,
    pub(crate) max_redirects: u32,
    pub(crate) validate_status: ValidateStatus,
    pub(crate) token: CancellationToken,
    pub(crate) config: Arc<RequestConfig>,
}

impl NormalizedRequest {
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Absolute URL including query parameters.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn response_type(&self) -> ResponseType {
        self.response_type
    }

    /// Per-attempt deadline, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn max_redirects(&self) -> u32 {
        self.max_redirects
    }

    /// The merged configuration.
    pub fn config(&self) -> &Arc<RequestConfig> {
        &self.config
    }
}

impl std::fmt::Debug for NormalizedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NormalizedRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("response_type", &self.response_type)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("max_redirects", &self.max_redirects)
            .finish()
    }
}

/// Merge `call` over `defaults` and resolve everything the engine needs.
///
/// Fails with a config error before any network activity.
pub fn build(
    method: Method,
    url: &str,
    defaults: &RequestConfig,
    call: &RequestConfig,
) -> Result<NormalizedRequest> {
    let config = Arc::new(defaults.merge(call));
    normalize(method, url, config.clone()).map_err(|e| e.with_config(config))
}

fn normalize(method: Method, url: &str, config: Arc<RequestConfig>) -> Result<NormalizedRequest> {
    let mut url = resolve_url(url, config.base_url.as_deref())?;
    if !config.params.is_empty() {
        let mut query = url.query_pairs_mut();
        for (name, value) in &config.params {
            query.append_pair(name, value);
        }
    }

    let mut headers = HeaderMap::with_capacity(config.headers.len() + 2);
    for (name, value) in &config.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::config(format!("invalid header name '{name}'")).with_source(e))?;
        let header_value = HeaderValue::from_str(value).map_err(|e| {
            Error::config(format!("invalid value for header '{name}'")).with_source(e)
        })?;
        headers.insert(header_name, header_value);
    }

    let body = match &config.body {
        None => RequestBody::Empty,
        Some(Body::Json(value)) => {
            let encoded = serde_json::to_vec(value)
                .map_err(|e| Error::config("body is not serializable").with_source(e))?;
            default_header(&mut headers, CONTENT_TYPE, headers::CONTENT_TYPE_JSON);
            RequestBody::Bytes(Bytes::from(encoded))
        }
        Some(Body::Text(text)) => {
            default_header(&mut headers, CONTENT_TYPE, headers::CONTENT_TYPE_TEXT);
            RequestBody::Bytes(Bytes::from(text.clone()))
        }
        Some(Body::Bytes(bytes)) => RequestBody::Bytes(bytes.clone()),
        Some(Body::Multipart(form)) => {
            let value = HeaderValue::from_str(&form.content_type())
                .map_err(|e| Error::config("invalid multipart boundary").with_source(e))?;
            headers.insert(CONTENT_TYPE, value);
            RequestBody::Multipart(form.clone())
        }
        Some(Body::Stream(shot)) => {
            if let Some(content_type) = shot.content_type() {
                let value = HeaderValue::from_str(content_type)
                    .map_err(|e| Error::config("invalid stream content type").with_source(e))?;
                headers.entry(CONTENT_TYPE).or_insert(value);
            }
            RequestBody::Stream(shot.clone())
        }
    };

    let response_type = config.response_type.unwrap_or_default();
    if response_type == ResponseType::Json {
        default_header(&mut headers, ACCEPT, headers::ACCEPT_JSON);
    }

    let retry = if body.is_replayable() {
        RetryPolicy {
            retries: config.retries.unwrap_or(0),
            delay: config.retry_delay.unwrap_or(Duration::ZERO),
            counting: config.retry_counting.unwrap_or(RetryCounting::Additional),
        }
    } else {
        RetryPolicy::none()
    };

    Ok(NormalizedRequest {
        method,
        url,
        headers,
        body,
        response_type,
        timeout: config.timeout.filter(|t| !t.is_zero()),
        retry,
        max_redirects: config.max_redirects.unwrap_or(DEFAULT_MAX_REDIRECTS),
        validate_status: config
            .validate_status
            .clone()
            .unwrap_or_else(|| Arc::new(default_validate_status) as ValidateStatus),
        token: config
            .cancellation_token
            .clone()
            .unwrap_or_default(),
        config,
    })
}

fn default_header(headers: &mut HeaderMap, name: HeaderName, value: &'static str) {
    headers
        .entry(name)
        .or_insert(HeaderValue::from_static(value));
}

/// Resolve `url` against `base`. Absolute URLs ignore the base.
fn resolve_url(url: &str, base: Option<&str>) -> Result<Url> {
    let parsed = match Url::parse(url) {
        Ok(absolute) => absolute,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let Some(base) = base else {
                return Err(Error::config(format!(
                    "relative URL '{url}' requires a base URL"
                )));
            };
            let joined = if url.is_empty() {
                base.to_string()
            } else {
                format!(
                    "{}/{}",
                    base.trim_end_matches('/'),
                    url.trim_start_matches('/')
                )
            };
            Url::parse(&joined)
                .map_err(|e| Error::config(format!("invalid URL '{joined}'")).with_source(e))?
        }
        Err(e) => return Err(Error::config(format!("invalid URL '{url}'")).with_source(e)),
    };

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(Error::config(format!("unsupported URL scheme '{other}'"))),
    }
}
