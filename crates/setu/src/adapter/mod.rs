//! Environment adapters and the redirect loop they share.
//!
//! An adapter performs one HTTP round trip. Redirect following, progress
//! accounting and abort wiring live here so both adapters behave alike.

mod fetch;
mod socket;
mod tls;

pub(crate) use fetch::FetchTransport;
pub(crate) use socket::SocketTransport;

use crate::body::BodyStream;
use crate::cancel::CancellationToken;
use crate::error::{Error, TransportError};
use crate::progress::{abortable, track_stream, ProgressTracker};
use crate::request::{NormalizedRequest, RequestBody};
use crate::response::RawTransferResult;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, LOCATION};
use reqwest::Method;
use setu_config::AdapterSetting;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Identifies `setu` in outgoing requests.
pub(crate) const USER_AGENT: &str = concat!("setu/", env!("CARGO_PKG_VERSION"));

/// One request on the wire: the original, or a redirect follow-up.
#[derive(Debug)]
pub(crate) struct Hop<'a> {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<&'a RequestBody>,
}

/// Per-attempt hooks handed to the adapter.
#[derive(Debug, Clone)]
pub(crate) struct TransferContext {
    pub upload: Option<ProgressTracker>,
    pub download: Option<ProgressTracker>,
    pub abort: CancellationToken,
}

impl TransferContext {
    /// Open the hop's body with upload accounting attached.
    pub(crate) async fn open_upload(
        &self,
        hop: &Hop<'_>,
    ) -> Result<Option<(BodyStream, Option<u64>)>, TransportError> {
        let Some(body) = hop.body else {
            return Ok(None);
        };
        let Some((stream, length)) = body.open().await? else {
            return Ok(None);
        };
        let stream = match &self.upload {
            Some(tracker) => track_stream(stream, tracker.pass(length, self.abort.clone())),
            None => stream,
        };
        Ok(Some((stream, length)))
    }
}

/// The capability both environments provide.
#[async_trait]
pub(crate) trait Transport: Send + Sync + fmt::Debug {
    /// Adapter name, for logs.
    fn name(&self) -> &'static str;

    /// Perform one HTTP exchange without following redirects.
    ///
    /// Must give up with [`TransportError::Aborted`] once `ctx.abort` fires.
    async fn round_trip(
        &self,
        hop: &Hop<'_>,
        ctx: &TransferContext,
    ) -> Result<RawTransferResult, TransportError>;
}

/// Which transport an exchange runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Fetch-style transport with native progress events.
    Browser,
    /// Socket-level HTTP/1.1 transport with manual chunk accounting.
    Server,
}

impl Environment {
    /// Pick the environment for the compile target.
    pub fn detect() -> Self {
        if cfg!(target_arch = "wasm32") {
            Environment::Browser
        } else {
            Environment::Server
        }
    }

    /// Resolve an adapter choice from settings.
    pub fn from_setting(setting: AdapterSetting) -> Self {
        match setting {
            AdapterSetting::Auto => Self::detect(),
            AdapterSetting::Fetch => Environment::Browser,
            AdapterSetting::Socket => Environment::Server,
        }
    }

    pub(crate) fn transport(self) -> Result<Arc<dyn Transport>, Error> {
        Ok(match self {
            Environment::Browser => Arc::new(FetchTransport::new()?),
            Environment::Server => Arc::new(SocketTransport::new()),
        })
    }
}

/// Whether a response to `method` with `status` carries a body.
pub(crate) fn response_has_body(method: &Method, status: u16) -> bool {
    !(method == Method::HEAD || (100..200).contains(&status) || status == 204 || status == 304)
}

/// Send `req`, following redirects, and attach download accounting to the
/// final response body.
pub(crate) async fn send(
    transport: &dyn Transport,
    req: &NormalizedRequest,
    ctx: &TransferContext,
) -> Result<RawTransferResult, TransportError> {
    let mut hop = Hop {
        method: req.method.clone(),
        url: req.url.clone(),
        headers: req.headers.clone(),
        body: Some(&req.body),
    };
    let mut followed = 0u32;

    let mut raw = loop {
        debug!(
            adapter = transport.name(),
            method = %hop.method,
            url = %hop.url,
            "sending"
        );
        let raw = transport.round_trip(&hop, ctx).await?;

        if req.max_redirects == 0 {
            break raw;
        }
        let Some(next) = next_hop(&hop, &raw)? else {
            break raw;
        };
        if followed >= req.max_redirects {
            return Err(TransportError::TooManyRedirects {
                max: req.max_redirects,
            });
        }
        followed += 1;
        debug!(
            status = raw.status,
            from = %hop.url,
            to = %next.url,
            redirects = followed,
            "following redirect"
        );
        hop = next;
    };

    let total = if response_has_body(&hop.method, raw.status) {
        raw.headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    } else {
        Some(0)
    };

    let body = std::mem::replace(&mut raw.body, Box::pin(futures_util::stream::empty()));
    let body = match &ctx.download {
        Some(tracker) => track_stream(body, tracker.pass(total, ctx.abort.clone())),
        None => body,
    };
    raw.body = abortable(body, ctx.abort.clone());
    Ok(raw)
}

/// Build the follow-up hop for a redirect response, if it should be followed.
fn next_hop<'a>(
    hop: &Hop<'a>,
    raw: &RawTransferResult,
) -> Result<Option<Hop<'a>>, TransportError> {
    if !matches!(raw.status, 301 | 302 | 303 | 307 | 308) {
        return Ok(None);
    }
    let Some(location) = raw.headers.get(LOCATION) else {
        return Ok(None);
    };
    let location = location
        .to_str()
        .map_err(|_| TransportError::network("redirect location is not valid text"))?;
    let url = hop
        .url
        .join(location)
        .map_err(|e| TransportError::network(format!("invalid redirect location '{location}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(TransportError::network(format!(
            "refusing to follow redirect to scheme '{}'",
            url.scheme()
        )));
    }

    let mut headers = hop.headers.clone();
    let rewrite_to_get = match raw.status {
        303 => hop.method != Method::GET && hop.method != Method::HEAD,
        301 | 302 => hop.method == Method::POST,
        _ => false,
    };

    let (method, body) = if rewrite_to_get {
        headers.remove(CONTENT_TYPE);
        headers.remove(CONTENT_LENGTH);
        (Method::GET, None)
    } else {
        // A body that cannot be sent twice ends the chain here.
        if hop.body.is_some_and(|b| !b.is_replayable()) {
            return Ok(None);
        }
        (hop.method.clone(), hop.body)
    };

    if url.origin() != hop.url.origin() {
        headers.remove(AUTHORIZATION);
        headers.remove(COOKIE);
    }

    Ok(Some(Hop {
        method,
        url,
        headers,
        body,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures_util::stream;
    use reqwest::header::HeaderValue;

    fn redirect(status: u16, location: &'static str) -> RawTransferResult {
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_static(location));
        RawTransferResult {
            status,
            status_text: String::new(),
            headers,
            url: Url::parse("http://a.test/start").unwrap(),
            body: Box::pin(stream::empty()),
        }
    }

    fn hop<'a>(method: Method, body: Option<&'a RequestBody>) -> Hop<'a> {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer t"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Hop {
            method,
            url: Url::parse("http://a.test/start").unwrap(),
            headers,
            body,
        }
    }

    #[test]
    fn test_response_has_body() {
        assert!(response_has_body(&Method::GET, 200));
        assert!(!response_has_body(&Method::HEAD, 200));
        assert!(!response_has_body(&Method::GET, 204));
        assert!(!response_has_body(&Method::GET, 304));
    }

    #[test]
    fn test_303_switches_to_get() {
        let body = RequestBody::Bytes(Bytes::from_static(b"{}"));
        let next = next_hop(&hop(Method::PUT, Some(&body)), &redirect(303, "/done"))
            .unwrap()
            .unwrap();
        assert_eq!(next.method, Method::GET);
        assert!(next.body.is_none());
        assert!(next.headers.get(CONTENT_TYPE).is_none());
        assert_eq!(next.url.as_str(), "http://a.test/done");
    }

    #[test]
    fn test_307_preserves_method_and_body() {
        let body = RequestBody::Bytes(Bytes::from_static(b"{}"));
        let next = next_hop(&hop(Method::POST, Some(&body)), &redirect(307, "/again"))
            .unwrap()
            .unwrap();
        assert_eq!(next.method, Method::POST);
        assert!(next.body.is_some());
        assert!(next.headers.get(AUTHORIZATION).is_some());
    }

    #[test]
    fn test_cross_origin_strips_credentials() {
        let next = next_hop(&hop(Method::GET, None), &redirect(302, "http://b.test/x"))
            .unwrap()
            .unwrap();
        assert!(next.headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_one_shot_body_stops_chain() {
        let body = RequestBody::Stream(
            match crate::body::Body::stream(stream::empty(), None) {
                crate::body::Body::Stream(s) => s,
                _ => unreachable!(),
            },
        );
        let next = next_hop(&hop(Method::PUT, Some(&body)), &redirect(308, "/x")).unwrap();
        assert!(next.is_none());
    }

    #[test]
    fn test_non_redirect_is_final() {
        let mut raw = redirect(200, "/ignored");
        raw.status = 200;
        assert!(next_hop(&hop(Method::GET, None), &raw).unwrap().is_none());
    }

    #[test]
    fn test_environment_detect() {
        assert_eq!(Environment::detect(), Environment::Server);
        assert_eq!(
            Environment::from_setting(AdapterSetting::Fetch),
            Environment::Browser
        );
    }
}
