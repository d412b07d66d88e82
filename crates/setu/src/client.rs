//! The public facade: one method per verb over shared, mutable defaults.

use crate::adapter::{self, Environment, TransferContext, Transport};
use crate::config::RequestConfig;
use crate::error::{ErrorResponse, Failure, RequestInfo, Result, TransportError};
use crate::progress::ProgressTracker;
use crate::request::{build, NormalizedRequest};
use crate::response::{collect, parse, Response};
use crate::retry;
use crate::timeout::{guard, Outcome};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use reqwest::Method;
use setu_config::SetuSettings;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, trace};

/// HTTP client bound to one environment adapter.
///
/// Cloning is cheap and clones share the adapter and the defaults.
/// Defaults are read afresh on every call, so changes made with
/// [`Setu::set_defaults`] or [`Setu::update_defaults`] apply to the next
/// request issued from any clone.
///
/// ```no_run
/// # async fn run() -> setu::Result<()> {
/// use setu::{RequestConfig, Setu};
///
/// let client = Setu::new()?;
/// client.update_defaults(|d| {
///     d.base_url = Some("https://api.example.com".into());
/// });
///
/// let users = client
///     .get("/users", RequestConfig::new().timeout_ms(5_000).retries(2))
///     .await?;
/// println!("{} {:?}", users.status(), users.data().as_json());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Setu {
    transport: Arc<dyn Transport>,
    defaults: Arc<RwLock<RequestConfig>>,
}

impl fmt::Debug for Setu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setu")
            .field("adapter", &self.transport.name())
            .field("defaults", &*self.defaults.read())
            .finish()
    }
}

impl Setu {
    /// Client on the adapter detected for this target.
    pub fn new() -> Result<Self> {
        Self::with_adapter(Environment::detect())
    }

    /// Client on an explicitly chosen adapter.
    pub fn with_adapter(environment: Environment) -> Result<Self> {
        Ok(Self {
            transport: environment.transport()?,
            defaults: Arc::new(RwLock::new(RequestConfig::default())),
        })
    }

    /// Client whose adapter and defaults come from loaded settings.
    pub fn from_settings(settings: &SetuSettings) -> Result<Self> {
        let defaults = RequestConfig::try_from(settings)?;
        let client = Self::with_adapter(Environment::from_setting(settings.adapter))?;
        client.set_defaults(defaults);
        Ok(client)
    }

    /// `"fetch"` or `"socket"`.
    pub fn adapter_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Snapshot of the current defaults.
    pub fn defaults(&self) -> RequestConfig {
        self.defaults.read().clone()
    }

    pub fn set_defaults(&self, defaults: RequestConfig) {
        *self.defaults.write() = defaults;
    }

    /// Mutate the defaults in place.
    pub fn update_defaults(&self, f: impl FnOnce(&mut RequestConfig)) {
        f(&mut self.defaults.write());
    }

    pub async fn get(&self, url: &str, config: impl Into<Option<RequestConfig>>) -> Result<Response> {
        self.request(Method::GET, url, config).await
    }

    pub async fn post(&self, url: &str, config: impl Into<Option<RequestConfig>>) -> Result<Response> {
        self.request(Method::POST, url, config).await
    }

    pub async fn put(&self, url: &str, config: impl Into<Option<RequestConfig>>) -> Result<Response> {
        self.request(Method::PUT, url, config).await
    }

    pub async fn patch(&self, url: &str, config: impl Into<Option<RequestConfig>>) -> Result<Response> {
        self.request(Method::PATCH, url, config).await
    }

    pub async fn delete(&self, url: &str, config: impl Into<Option<RequestConfig>>) -> Result<Response> {
        self.request(Method::DELETE, url, config).await
    }

    pub async fn head(&self, url: &str, config: impl Into<Option<RequestConfig>>) -> Result<Response> {
        self.request(Method::HEAD, url, config).await
    }

    pub async fn options(&self, url: &str, config: impl Into<Option<RequestConfig>>) -> Result<Response> {
        self.request(Method::OPTIONS, url, config).await
    }

    /// Run one exchange: build, then attempt under the retry policy.
    ///
    /// Every failure leaves as a single [`crate::Error`]. Configuration
    /// errors surface before any network activity.
    #[instrument(skip(self, config), fields(adapter = self.transport.name()))]
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        config: impl Into<Option<RequestConfig>>,
    ) -> Result<Response> {
        let call = config.into().unwrap_or_default();
        let defaults = self.defaults.read().clone();
        let req = build(method, url, &defaults, &call)?;

        let upload = req
            .config
            .on_upload_progress
            .clone()
            .map(|cb| ProgressTracker::new("upload", cb));
        let download = req
            .config
            .on_download_progress
            .clone()
            .map(|cb| ProgressTracker::new("download", cb));

        retry::execute(&req.retry, &req.token, |n| {
            self.attempt(&req, upload.clone(), download.clone(), n)
        })
        .await
    }

    async fn attempt(
        &self,
        req: &NormalizedRequest,
        upload: Option<ProgressTracker>,
        download: Option<ProgressTracker>,
        n: u32,
    ) -> Result<Response> {
        debug!(attempt = n, url = %req.url, "attempt starting");

        // Per-attempt token: its deadline must not poison later attempts,
        // while a cancel on the exchange token still reaches it.
        let token = req.token.child();
        let ctx = TransferContext {
            upload,
            download,
            abort: token.clone(),
        };
        let info = RequestInfo {
            method: req.method.clone(),
            url: req.url.clone(),
            attempt: n,
        };

        let exchange = async {
            let raw = adapter::send(self.transport.as_ref(), req, &ctx).await?;
            trace!(status = raw.status, url = %raw.url, "response head received");

            if !(req.validate_status)(raw.status) {
                let data = collect(raw.body).await.map_err(Failure::Body)?;
                return Err(Failure::Status(ErrorResponse {
                    status: raw.status,
                    status_text: raw.status_text,
                    data,
                    headers: raw.headers,
                }));
            }

            let info = RequestInfo {
                url: raw.url.clone(),
                ..info.clone()
            };
            parse(raw, req.response_type, &token, info, req.config.clone()).await
        };

        let result = match guard(&token, req.timeout, exchange).await {
            Outcome::Completed(result) => result,
            Outcome::Interrupted(reason) => {
                debug!(attempt = n, ?reason, "attempt interrupted");
                Err(Failure::Transport(TransportError::Aborted))
            }
        };

        result.map_err(|failure| {
            let err = failure
                .normalize(token.reason(), req.timeout)
                .with_config(req.config.clone())
                .with_request(info);
            debug!(attempt = n, kind = %err.kind(), error = %err, "attempt failed");
            err
        })
    }
}

static GLOBAL: OnceCell<Setu> = OnceCell::new();

/// Process-wide client on the detected adapter, created on first use.
pub fn global() -> Result<&'static Setu> {
    GLOBAL.get_or_try_init(Setu::new)
}

pub async fn get(url: &str, config: impl Into<Option<RequestConfig>>) -> Result<Response> {
    global()?.get(url, config).await
}

pub async fn post(url: &str, config: impl Into<Option<RequestConfig>>) -> Result<Response> {
    global()?.post(url, config).await
}

pub async fn put(url: &str, config: impl Into<Option<RequestConfig>>) -> Result<Response> {
    global()?.put(url, config).await
}

pub async fn patch(url: &str, config: impl Into<Option<RequestConfig>>) -> Result<Response> {
    global()?.patch(url, config).await
}

pub async fn delete(url: &str, config: impl Into<Option<RequestConfig>>) -> Result<Response> {
    global()?.delete(url, config).await
}

pub async fn head(url: &str, config: impl Into<Option<RequestConfig>>) -> Result<Response> {
    global()?.head(url, config).await
}

pub async fn options(url: &str, config: impl Into<Option<RequestConfig>>) -> Result<Response> {
    global()?.options(url, config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_defaults_are_shared_between_clones() {
        let client = Setu::with_adapter(Environment::Server).unwrap();
        let clone = client.clone();
        client.update_defaults(|d| d.retries = Some(3));
        assert_eq!(clone.defaults().retries, Some(3));
        assert_eq!(client.adapter_name(), "socket");
    }

    #[tokio::test]
    async fn test_config_error_before_network() {
        let client = Setu::with_adapter(Environment::Server).unwrap();
        let err = client.get("/relative/without/base", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.request_config().is_some());
    }

    #[tokio::test]
    async fn test_already_cancelled_token_aborts() {
        let client = Setu::with_adapter(Environment::Browser).unwrap();
        let token = crate::CancellationToken::new();
        token.cancel();
        let err = client
            .get(
                "http://127.0.0.1:9/never",
                RequestConfig::new().cancellation_token(token).retries(3),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("abort"));
        assert_eq!(err.request().map(|r| r.attempt), Some(1));
    }

    #[test]
    fn test_global_is_singleton() {
        let a = global().unwrap() as *const Setu;
        let b = global().unwrap() as *const Setu;
        assert_eq!(a, b);
    }
}
