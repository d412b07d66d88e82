//! The one error shape every failed exchange resolves to.

use crate::cancel::AbortReason;
use crate::config::RequestConfig;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Boxed error source.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid configuration, raised before any network activity.
    Config,
    /// Transport-level failure: DNS, refused connection, reset, broken stream.
    Network,
    /// An attempt outlived its deadline.
    Timeout,
    /// The caller cancelled the exchange.
    Abort,
    /// A response arrived but `validate_status` rejected it.
    Status,
    /// The body did not match the declared response type.
    Parse,
    /// The redirect chain exceeded `max_redirects`.
    TooManyRedirects,
}

impl ErrorKind {
    /// Machine-readable code. Status failures carry none.
    pub fn code(self) -> Option<&'static str> {
        match self {
            Self::Config => Some("config"),
            Self::Network => Some("network"),
            Self::Timeout => Some("timeout"),
            Self::Abort => Some("abort"),
            Self::Status => None,
            Self::Parse => Some("parse"),
            Self::TooManyRedirects => Some("too-many-redirects"),
        }
    }

    /// Only transport failures and deadlines are worth another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::Timeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code().unwrap_or("status"))
    }
}

/// The attempt a failure belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    /// HTTP method of the last hop.
    pub method: Method,
    /// URL of the last hop.
    pub url: Url,
    /// 1-based attempt number within the exchange.
    pub attempt: u32,
}

/// A received response that failed validation or parsing.
#[derive(Debug, Clone)]
pub struct ErrorResponse {
    pub status: u16,
    pub status_text: String,
    /// Raw, unparsed body.
    pub data: Bytes,
    pub headers: HeaderMap,
}

impl ErrorResponse {
    /// Deserialize the raw body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.data)
    }

    /// The raw body decoded as (lossy) UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// A normalized request failure.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    config: Option<Arc<RequestConfig>>,
    request: Option<RequestInfo>,
    response: Option<ErrorResponse>,
    #[source]
    source: Option<BoxError>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            config: None,
            request: None,
            response: None,
            source: None,
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub(crate) fn aborted() -> Self {
        Self::new(ErrorKind::Abort, "request aborted")
    }

    pub(crate) fn timed_out(timeout: Option<Duration>) -> Self {
        let message = match timeout {
            Some(t) => format!("timeout of {}ms exceeded", t.as_millis()),
            None => "timeout exceeded".to_string(),
        };
        Self::new(ErrorKind::Timeout, message)
    }

    pub(crate) fn from_status(response: ErrorResponse) -> Self {
        let mut err = Self::new(
            ErrorKind::Status,
            format!("request failed with status code {}", response.status),
        );
        err.response = Some(response);
        err
    }

    pub(crate) fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub(crate) fn with_config(mut self, config: Arc<RequestConfig>) -> Self {
        self.config = Some(config);
        self
    }

    pub(crate) fn with_request(mut self, request: RequestInfo) -> Self {
        self.request = Some(request);
        self
    }

    pub(crate) fn with_response(mut self, response: ErrorResponse) -> Self {
        self.response = Some(response);
        self
    }

    /// Failure classification.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Machine-readable code (`"timeout"`, `"abort"`, ...).
    pub fn code(&self) -> Option<&'static str> {
        self.kind.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The merged configuration of the failed exchange.
    pub fn request_config(&self) -> Option<&RequestConfig> {
        self.config.as_deref()
    }

    /// The attempt that produced the failure.
    pub fn request(&self) -> Option<&RequestInfo> {
        self.request.as_ref()
    }

    /// The response, when one was received.
    pub fn response(&self) -> Option<&ErrorResponse> {
        self.response.as_ref()
    }

    /// Status of the received response, if any.
    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }

    pub fn is_abort(&self) -> bool {
        self.kind == ErrorKind::Abort
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match err.kind {
            ErrorKind::Timeout => io::ErrorKind::TimedOut,
            ErrorKind::Abort => io::ErrorKind::Interrupted,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// Failures raised by an adapter while moving bytes.
#[derive(Debug, thiserror::Error)]
pub(crate) enum TransportError {
    #[error("request aborted")]
    Aborted,

    #[error("maximum number of redirects ({max}) exceeded")]
    TooManyRedirects { max: u32 },

    #[error("{message}")]
    Network {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    pub(crate) fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn io(context: &str, err: io::Error) -> Self {
        Self::Network {
            message: format!("{context}: {err}"),
            source: Some(Box::new(err)),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            return Self::InvalidRequest(e.to_string());
        }
        Self::Network {
            message: format!("network error: {e}"),
            source: Some(Box::new(e)),
        }
    }
}

/// Everything that can end one attempt, before normalization.
#[derive(Debug)]
pub(crate) enum Failure {
    Transport(TransportError),
    /// Reading the response body failed.
    Body(io::Error),
    Status(ErrorResponse),
    Parse {
        response: ErrorResponse,
        source: BoxError,
    },
}

impl From<TransportError> for Failure {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl Failure {
    /// Map to the public error. A fired token takes precedence over whatever
    /// the transport reported, since the abort is what caused it.
    pub(crate) fn normalize(self, reason: Option<AbortReason>, timeout: Option<Duration>) -> Error {
        match reason {
            Some(AbortReason::Cancelled) => return Error::aborted(),
            Some(AbortReason::DeadlineExceeded) => return Error::timed_out(timeout),
            None => {}
        }

        match self {
            Failure::Transport(TransportError::Aborted) => Error::aborted(),
            Failure::Transport(TransportError::TooManyRedirects { max }) => Error::new(
                ErrorKind::TooManyRedirects,
                format!("maximum number of redirects ({max}) exceeded"),
            ),
            Failure::Transport(TransportError::InvalidRequest(message)) => {
                Error::config(format!("invalid request: {message}"))
            }
            Failure::Transport(TransportError::Network { message, source }) => {
                let err = Error::new(ErrorKind::Network, message);
                match source {
                    Some(source) => err.with_source(source),
                    None => err,
                }
            }
            Failure::Body(e) => Error::new(
                ErrorKind::Network,
                format!("failed to read response body: {e}"),
            )
            .with_source(e),
            Failure::Status(response) => Error::from_status(response),
            Failure::Parse { response, source } => Error::new(
                ErrorKind::Parse,
                format!("failed to parse response body: {source}"),
            )
            .with_response(response)
            .with_source(source),
        }
    }
}
