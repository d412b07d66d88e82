//! Fetch-style adapter backed by `reqwest`.

use super::{Hop, TransferContext, Transport, USER_AGENT};
use crate::error::{Error, TransportError};
use crate::response::RawTransferResult;
use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{redirect, Client};
use std::io;

/// Transport using a pooled `reqwest` client.
///
/// Redirects are disabled on the client; the shared redirect loop owns them.
#[derive(Debug, Clone)]
pub(crate) struct FetchTransport {
    client: Client,
}

impl FetchTransport {
    pub(crate) fn new() -> Result<Self, Error> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")).with_source(e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for FetchTransport {
    fn name(&self) -> &'static str {
        "fetch"
    }

    async fn round_trip(
        &self,
        hop: &Hop<'_>,
        ctx: &TransferContext,
    ) -> Result<RawTransferResult, TransportError> {
        let mut headers = hop.headers.clone();
        headers.remove(CONTENT_LENGTH);
        let mut builder = self
            .client
            .request(hop.method.clone(), hop.url.clone())
            .headers(headers);

        if let Some((stream, length)) = ctx.open_upload(hop).await? {
            if let Some(length) = length {
                builder = builder.header(CONTENT_LENGTH, length);
            }
            builder = builder.body(reqwest::Body::wrap_stream(stream));
        }

        let response = tokio::select! {
            biased;
            _ = ctx.abort.cancelled() => return Err(TransportError::Aborted),
            sent = builder.send() => sent?,
        };

        let status = response.status();
        let status_text = status.canonical_reason().unwrap_or_default().to_string();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes_stream().map_err(io::Error::other);

        Ok(RawTransferResult {
            status: status.as_u16(),
            status_text,
            headers,
            url,
            body: Box::pin(body),
        })
    }
}
