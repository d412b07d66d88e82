//! Response types and body parsing.

use crate::body::BodyStream;
use crate::cancel::{AbortReason, CancellationToken};
use crate::config::{RequestConfig, ResponseType};
use crate::error::{Error, ErrorKind, ErrorResponse, Failure, RequestInfo, Result};
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, TryStreamExt};
use percent_encoding::percent_decode_str;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use url::Url;

/// What an adapter hands back for one exchange.
pub(crate) struct RawTransferResult {
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
    /// URL of the hop that produced this response.
    pub url: Url,
    pub body: BodyStream,
}

impl fmt::Debug for RawTransferResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawTransferResult")
            .field("status", &self.status)
            .field("status_text", &self.status_text)
            .field("url", &self.url.as_str())
            .finish()
    }
}

/// Bytes with the content type they were served as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// Parsed response payload, one variant per [`ResponseType`].
#[derive(Debug)]
pub enum ResponseData {
    Json(Value),
    Text(String),
    Blob(Blob),
    ArrayBuffer(Bytes),
    Stream(ByteStream),
}

impl ResponseData {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Raw bytes of a blob or array buffer.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Blob(blob) => Some(&blob.bytes),
            Self::ArrayBuffer(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn into_stream(self) -> Option<ByteStream> {
        match self {
            Self::Stream(s) => Some(s),
            _ => None,
        }
    }
}

/// A live response body, read once, never buffered by the engine.
///
/// Errors are classified against the exchange's cancellation token, so a
/// cancel mid-stream surfaces as an abort rather than a network error.
pub struct ByteStream {
    inner: BodyStream,
    token: CancellationToken,
    config: Arc<RequestConfig>,
    request: RequestInfo,
    done: bool,
}

impl ByteStream {
    pub(crate) fn new(
        inner: BodyStream,
        token: CancellationToken,
        config: Arc<RequestConfig>,
        request: RequestInfo,
    ) -> Self {
        Self {
            inner,
            token,
            config,
            request,
            done: false,
        }
    }

    fn classify(&self, e: io::Error) -> Error {
        let err = match self.token.reason() {
            Some(AbortReason::Cancelled) => Error::aborted(),
            Some(AbortReason::DeadlineExceeded) => Error::timed_out(self.config.timeout),
            None => Error::new(ErrorKind::Network, format!("response stream failed: {e}")),
        };
        err.with_source(e)
            .with_config(self.config.clone())
            .with_request(self.request.clone())
    }

    /// Read the rest of the stream into memory.
    pub async fn collect_bytes(self) -> Result<Bytes> {
        let collected = self
            .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await?;
        Ok(collected.freeze())
    }

    /// Adapt into an [`AsyncRead`].
    pub fn into_reader(self) -> impl AsyncRead + Send {
        StreamReader::new(self.map_err(io::Error::from))
    }
}

impl Stream for ByteStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Some(Err(e))) => {
                self.done = true;
                Poll::Ready(Some(Err(self.classify(e))))
            }
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream")
            .field("url", &self.request.url.as_str())
            .field("done", &self.done)
            .finish()
    }
}

/// A validated response.
#[derive(Debug)]
pub struct Response<T = ResponseData> {
    status: u16,
    status_text: String,
    headers: HeaderMap,
    data: T,
    filename: Option<String>,
    request: RequestInfo,
    config: Arc<RequestConfig>,
}

impl<T> Response<T> {
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Reason phrase, e.g. `"OK"`.
    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// Response headers. Names are lower-case.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A header value as text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }

    /// File name from `Content-Disposition`, when present.
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// URL of the final hop, after redirects.
    pub fn url(&self) -> &Url {
        &self.request.url
    }

    pub fn request(&self) -> &RequestInfo {
        &self.request
    }

    /// The merged configuration that produced this response.
    pub fn config(&self) -> &RequestConfig {
        &self.config
    }

    /// Transform the payload, keeping status and headers.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        Response {
            status: self.status,
            status_text: self.status_text,
            headers: self.headers,
            data: f(self.data),
            filename: self.filename,
            request: self.request,
            config: self.config,
        }
    }
}

impl Response<ResponseData> {
    /// Deserialize the payload into `T`.
    pub fn json<T: DeserializeOwned>(self) -> Result<Response<T>> {
        let parsed = match &self.data {
            ResponseData::Json(v) => T::deserialize(v).map_err(|e| (e, Bytes::from(v.to_string()))),
            ResponseData::Text(t) => {
                serde_json::from_str(t).map_err(|e| (e, Bytes::from(t.clone())))
            }
            ResponseData::Blob(Blob { bytes, .. }) | ResponseData::ArrayBuffer(bytes) => {
                serde_json::from_slice(bytes).map_err(|e| (e, bytes.clone()))
            }
            ResponseData::Stream(_) => {
                return Err(Error::new(
                    ErrorKind::Parse,
                    "a stream response cannot be deserialized; collect it first",
                )
                .with_config(self.config.clone())
                .with_request(self.request.clone()));
            }
        };

        match parsed {
            Ok(data) => Ok(self.map(|_| data)),
            Err((source, raw)) => {
                let response = ErrorResponse {
                    status: self.status,
                    status_text: self.status_text.clone(),
                    data: raw,
                    headers: self.headers.clone(),
                };
                Err(Failure::Parse {
                    response,
                    source: Box::new(source),
                }
                .normalize(None, None)
                .with_config(self.config)
                .with_request(self.request))
            }
        }
    }
}

/// Read an entire body, failing on the first broken chunk.
pub(crate) async fn collect(body: BodyStream) -> io::Result<Bytes> {
    let collected = body
        .try_fold(BytesMut::new(), |mut acc, chunk| async move {
            acc.extend_from_slice(&chunk);
            Ok(acc)
        })
        .await?;
    Ok(collected.freeze())
}

/// Turn a validated raw response into a [`Response`].
pub(crate) async fn parse(
    raw: RawTransferResult,
    response_type: ResponseType,
    token: &CancellationToken,
    request: RequestInfo,
    config: Arc<RequestConfig>,
) -> std::result::Result<Response, Failure> {
    let RawTransferResult {
        status,
        status_text,
        headers,
        body,
        ..
    } = raw;
    let filename = content_disposition_filename(&headers);

    let data = match response_type {
        ResponseType::Stream => ResponseData::Stream(ByteStream::new(
            body,
            token.clone(),
            config.clone(),
            request.clone(),
        )),
        ResponseType::ArrayBuffer => {
            ResponseData::ArrayBuffer(collect(body).await.map_err(Failure::Body)?)
        }
        ResponseType::Blob => ResponseData::Blob(Blob {
            bytes: collect(body).await.map_err(Failure::Body)?,
            content_type: headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        }),
        ResponseType::Text => {
            let bytes = collect(body).await.map_err(Failure::Body)?;
            ResponseData::Text(String::from_utf8_lossy(&bytes).into_owned())
        }
        ResponseType::Json => {
            let bytes = collect(body).await.map_err(Failure::Body)?;
            match parse_json(&bytes) {
                Ok(value) => ResponseData::Json(value),
                Err(e) => {
                    return Err(Failure::Parse {
                        response: ErrorResponse {
                            status,
                            status_text,
                            data: bytes,
                            headers,
                        },
                        source: Box::new(e),
                    })
                }
            }
        }
    };

    Ok(Response {
        status,
        status_text,
        headers,
        data,
        filename,
        request,
        config,
    })
}

/// An empty (or all-whitespace) body parses as `null`.
fn parse_json(bytes: &[u8]) -> serde_json::Result<Value> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes)
}

/// Extract the file name from a `Content-Disposition` header.
///
/// `filename*` (RFC 5987) wins over `filename`. Parameter names match
/// case-insensitively and surrounding quotes are stripped.
pub fn content_disposition_filename(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CONTENT_DISPOSITION)?;
    let value = String::from_utf8_lossy(value.as_bytes());

    let mut plain = None;
    let mut extended = None;

    for param in value.split(';').skip(1) {
        let Some((name, raw)) = param.split_once('=') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        let raw = raw.trim();

        match name.as_str() {
            "filename*" => {
                // charset'language'percent-encoded
                let encoded = raw.splitn(3, '\'').nth(2).unwrap_or(raw);
                let decoded = percent_decode_str(encoded.trim_matches('"'))
                    .decode_utf8_lossy()
                    .into_owned();
                if !decoded.is_empty() {
                    extended = Some(decoded);
                }
            }
            "filename" => {
                let unquoted = raw.trim_matches('"').trim_matches('\'');
                if !unquoted.is_empty() {
                    plain = Some(unquoted.to_string());
                }
            }
            _ => {}
        }
    }

    extended.or(plain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{stream, StreamExt};
    use reqwest::header::HeaderValue;
    use reqwest::Method;

    fn info() -> RequestInfo {
        RequestInfo {
            method: Method::GET,
            url: Url::parse("http://example.test/file").unwrap(),
            attempt: 1,
        }
    }

    fn raw(status: u16, body: &'static [u8], headers: HeaderMap) -> RawTransferResult {
        RawTransferResult {
            status,
            status_text: "OK".to_string(),
            headers,
            url: Url::parse("http://example.test/file").unwrap(),
            body: Box::pin(stream::iter(vec![Ok(Bytes::from_static(body))])),
        }
    }

    fn disposition(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_DISPOSITION, HeaderValue::from_static(value));
        headers
    }

    async fn parse_as(response_type: ResponseType, body: &'static [u8]) -> std::result::Result<Response, Failure> {
        parse(
            raw(200, body, HeaderMap::new()),
            response_type,
            &CancellationToken::new(),
            info(),
            Arc::new(RequestConfig::default()),
        )
        .await
    }

    #[test]
    fn test_filename_plain() {
        let headers = disposition("attachment; filename=\"report.pdf\"");
        assert_eq!(content_disposition_filename(&headers).as_deref(), Some("report.pdf"));

        let headers = disposition("attachment; FILENAME=data.csv");
        assert_eq!(content_disposition_filename(&headers).as_deref(), Some("data.csv"));
    }

    #[test]
    fn test_filename_extended_wins() {
        let headers = disposition(
            "attachment; filename=\"fallback.txt\"; filename*=UTF-8''na%C3%AFve%20file.txt",
        );
        assert_eq!(
            content_disposition_filename(&headers).as_deref(),
            Some("naïve file.txt")
        );
    }

    #[test]
    fn test_filename_absent() {
        assert_eq!(content_disposition_filename(&disposition("inline")), None);
        assert_eq!(content_disposition_filename(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn test_parse_json() {
        let response = parse_as(ResponseType::Json, br#"[{"id":1}]"#).await.unwrap();
        assert_eq!(response.data().as_json(), Some(&serde_json::json!([{ "id": 1 }])));
    }

    #[tokio::test]
    async fn test_parse_empty_json_is_null() {
        let response = parse_as(ResponseType::Json, b"").await.unwrap();
        assert_eq!(response.data().as_json(), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_parse_malformed_json_fails() {
        let failure = parse_as(ResponseType::Json, b"{not json").await.unwrap_err();
        match failure {
            Failure::Parse { response, .. } => {
                assert_eq!(response.status, 200);
                assert_eq!(&response.data[..], b"{not json");
            }
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_parse_text_and_buffers() {
        let response = parse_as(ResponseType::Text, b"hello").await.unwrap();
        assert_eq!(response.data().as_text(), Some("hello"));

        let response = parse_as(ResponseType::ArrayBuffer, b"\x00\x01").await.unwrap();
        assert_eq!(response.data().as_bytes().map(|b| &b[..]), Some(&b"\x00\x01"[..]));
    }

    #[tokio::test]
    async fn test_parse_blob_keeps_content_type() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("image/png"));
        let response = parse(
            raw(200, b"\x89PNG", headers),
            ResponseType::Blob,
            &CancellationToken::new(),
            info(),
            Arc::new(RequestConfig::default()),
        )
        .await
        .unwrap();

        match response.into_data() {
            ResponseData::Blob(blob) => {
                assert_eq!(blob.content_type.as_deref(), Some("image/png"));
                assert_eq!(&blob.bytes[..], b"\x89PNG");
            }
            other => panic!("unexpected data: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stream_is_not_buffered() {
        let response = parse_as(ResponseType::Stream, b"chunk").await.unwrap();
        let stream = response.into_data().into_stream().unwrap();
        assert_eq!(&stream.collect_bytes().await.unwrap()[..], b"chunk");
    }

    #[tokio::test]
    async fn test_stream_error_after_cancel_is_abort() {
        let token = CancellationToken::new();
        let body: BodyStream = Box::pin(stream::iter(vec![Err(io::Error::from(
            io::ErrorKind::ConnectionReset,
        ))]));
        token.cancel();

        let mut stream = ByteStream::new(body, token, Arc::new(RequestConfig::default()), info());
        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.code(), Some("abort"));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_typed_json() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct User {
            id: u32,
        }

        let response = parse_as(ResponseType::Json, br#"{"id":7}"#).await.unwrap();
        let typed = response.json::<User>().unwrap();
        assert_eq!(typed.data(), &User { id: 7 });
        assert_eq!(typed.status(), 200);

        let response = parse_as(ResponseType::Json, br#"{"id":"x"}"#).await.unwrap();
        let err = response.json::<User>().unwrap_err();
        assert_eq!(err.code(), Some("parse"));
        assert_eq!(err.response().unwrap().status, 200);
    }

    #[tokio::test]
    async fn test_into_reader() {
        use tokio::io::AsyncReadExt;

        let response = parse_as(ResponseType::Stream, b"readable").await.unwrap();
        let mut reader = Box::pin(response.into_data().into_stream().unwrap().into_reader());
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "readable");
    }
}
