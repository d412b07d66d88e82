//! Request payloads.

use bytes::Bytes;
use futures_util::{stream, Stream, StreamExt};
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::io::ReaderStream;

/// A boxed stream of body chunks.
pub type BodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// What a request carries.
#[derive(Clone)]
pub enum Body {
    /// Structured data, serialized as JSON.
    Json(Value),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes, sent untouched.
    Bytes(Bytes),
    /// `multipart/form-data`.
    Multipart(Multipart),
    /// A readable stream. Consumed by the first attempt that sends it.
    Stream(OneShotStream),
}

impl Body {
    /// Wrap a stream of chunks. `length` enables computable upload progress.
    pub fn stream<S>(stream: S, length: Option<u64>) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Body::Stream(OneShotStream::new(stream, length))
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Json(v) => f.debug_tuple("Json").field(v).finish(),
            Body::Text(t) => f.debug_tuple("Text").field(&t.len()).finish(),
            Body::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Body::Multipart(m) => f.debug_tuple("Multipart").field(m).finish(),
            Body::Stream(s) => f.debug_tuple("Stream").field(s).finish(),
        }
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Body::Json(value)
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Text(text)
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Body::Text(text.to_string())
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Bytes(Bytes::from(bytes))
    }
}

impl From<Multipart> for Body {
    fn from(form: Multipart) -> Self {
        Body::Multipart(form)
    }
}

/// A stream body that can be taken exactly once.
#[derive(Clone)]
pub struct OneShotStream {
    inner: Arc<Mutex<Option<BodyStream>>>,
    length: Option<u64>,
    content_type: Option<String>,
}

impl OneShotStream {
    fn new<S>(stream: S, length: Option<u64>) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Some(Box::pin(stream)))),
            length,
            content_type: None,
        }
    }

    /// Attach a content type sent when the caller set none.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn length(&self) -> Option<u64> {
        self.length
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Check if the stream was already sent.
    pub fn is_consumed(&self) -> bool {
        self.inner.lock().is_none()
    }

    pub(crate) fn take(&self) -> Option<BodyStream> {
        self.inner.lock().take()
    }
}

impl fmt::Debug for OneShotStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OneShotStream")
            .field("length", &self.length)
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

#[derive(Debug, Clone)]
enum PartSource {
    Text(String),
    Bytes(Bytes),
    File(PathBuf),
}

/// One field of a multipart form.
#[derive(Debug, Clone)]
pub struct Part {
    source: PartSource,
    file_name: Option<String>,
    mime: Option<String>,
}

impl Part {
    /// A plain text field.
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            source: PartSource::Text(value.into()),
            file_name: None,
            mime: None,
        }
    }

    /// An in-memory file.
    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Self {
            source: PartSource::Bytes(data.into()),
            file_name: None,
            mime: None,
        }
    }

    /// A file streamed from disk when the request is sent.
    pub fn file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        Self {
            source: PartSource::File(path),
            file_name,
            mime: None,
        }
    }

    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    fn head(&self, boundary: &str, name: &str) -> String {
        let mut head = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{}\"",
            escape_quoted(name)
        );
        if let Some(file_name) = &self.file_name {
            head.push_str(&format!("; filename=\"{}\"", escape_quoted(file_name)));
        }
        head.push_str("\r\n");

        let mime = match (&self.mime, &self.source, &self.file_name) {
            (Some(mime), _, _) => Some(mime.as_str()),
            (None, PartSource::Text(_), None) => None,
            _ => Some("application/octet-stream"),
        };
        if let Some(mime) = mime {
            head.push_str(&format!("Content-Type: {mime}\r\n"));
        }
        head.push_str("\r\n");
        head
    }

    async fn data_len(&self) -> io::Result<u64> {
        Ok(match &self.source {
            PartSource::Text(t) => t.len() as u64,
            PartSource::Bytes(b) => b.len() as u64,
            PartSource::File(path) => tokio::fs::metadata(path).await?.len(),
        })
    }

    fn data_stream(&self) -> BodyStream {
        match &self.source {
            PartSource::Text(t) => once(Bytes::from(t.clone())),
            PartSource::Bytes(b) => once(b.clone()),
            PartSource::File(path) => {
                let path = path.clone();
                Box::pin(
                    stream::once(async move { tokio::fs::File::open(path).await })
                        .map(|opened| match opened {
                            Ok(file) => ReaderStream::new(file).left_stream(),
                            Err(e) => stream::once(async move { Err::<Bytes, _>(e) }).right_stream(),
                        })
                        .flatten(),
                )
            }
        }
    }
}

fn once(bytes: Bytes) -> BodyStream {
    Box::pin(stream::once(async move { Ok(bytes) }))
}

fn escape_quoted(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

/// A `multipart/form-data` body.
#[derive(Debug, Clone)]
pub struct Multipart {
    boundary: String,
    parts: Vec<(String, Part)>,
}

impl Multipart {
    pub fn new() -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(24)
            .map(char::from)
            .collect();
        Self {
            boundary: format!("----SetuFormBoundary{suffix}"),
            parts: Vec::new(),
        }
    }

    /// Add a text field.
    pub fn text(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.part(name, Part::text(value))
    }

    /// Add a file read from disk at send time.
    pub fn file(self, name: impl Into<String>, path: impl AsRef<Path>) -> Self {
        self.part(name, Part::file(path))
    }

    pub fn part(mut self, name: impl Into<String>, part: Part) -> Self {
        self.parts.push((name.into(), part));
        self
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    fn closing(&self) -> String {
        format!("--{}--\r\n", self.boundary)
    }

    /// Exact encoded size. File parts are sized from their metadata.
    pub async fn content_length(&self) -> io::Result<u64> {
        let mut total = self.closing().len() as u64;
        for (name, part) in &self.parts {
            total += part.head(&self.boundary, name).len() as u64;
            total += part.data_len().await?;
            total += 2;
        }
        Ok(total)
    }

    pub(crate) fn into_stream(self) -> BodyStream {
        let mut segments: Vec<BodyStream> = Vec::with_capacity(self.parts.len() * 3 + 1);
        for (name, part) in &self.parts {
            segments.push(once(Bytes::from(part.head(&self.boundary, name))));
            segments.push(part.data_stream());
            segments.push(once(Bytes::from_static(b"\r\n")));
        }
        segments.push(once(Bytes::from(self.closing())));
        Box::pin(stream::iter(segments).flatten())
    }
}

impl Default for Multipart {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;

    async fn encode(form: Multipart) -> Vec<u8> {
        form.into_stream()
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_multipart_encoding() {
        let form = Multipart::new()
            .text("title", "report")
            .part(
                "attachment",
                Part::bytes(&b"hello"[..]).file_name("a.txt").mime("text/plain"),
            );
        let boundary = form.boundary().to_string();
        let length = form.content_length().await.unwrap();

        let encoded = String::from_utf8(encode(form).await).unwrap();
        assert_eq!(encoded.len() as u64, length);

        let expected = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nreport\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"attachment\"; filename=\"a.txt\"\r\n\
             Content-Type: text/plain\r\n\r\nhello\r\n--{b}--\r\n",
            b = boundary
        );
        assert_eq!(encoded, expected);
    }

    #[tokio::test]
    async fn test_file_part_streams_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.bin");
        std::fs::write(&path, vec![7u8; 40_000]).unwrap();

        let form = Multipart::new().file("upload", &path);
        let length = form.content_length().await.unwrap();
        let encoded = encode(form).await;

        assert_eq!(encoded.len() as u64, length);
        let head = String::from_utf8_lossy(&encoded[..200]);
        assert!(head.contains("filename=\"upload.bin\""));
        assert!(head.contains("application/octet-stream"));
    }

    #[tokio::test]
    async fn test_missing_file_fails() {
        let form = Multipart::new().file("upload", "/definitely/not/here.bin");
        assert!(form.content_length().await.is_err());

        let result: io::Result<Vec<Bytes>> = form.into_stream().try_collect().await;
        assert!(result.is_err());
    }

    #[test]
    fn test_boundaries_are_unique() {
        let a = Multipart::new();
        let b = Multipart::new();
        assert_ne!(a.boundary(), b.boundary());
        assert!(a.content_type().starts_with("multipart/form-data; boundary=----SetuFormBoundary"));
    }

    #[test]
    fn test_field_names_are_escaped() {
        let head = Part::text("v").head("B", "a\"b");
        assert!(head.contains("name=\"a%22b\""));
    }

    #[test]
    fn test_one_shot_stream_is_taken_once() {
        let body = Body::stream(stream::iter(vec![Ok(Bytes::from_static(b"x"))]), Some(1));
        let Body::Stream(shot) = body.clone() else {
            panic!("expected stream body");
        };
        assert!(shot.take().is_some());
        assert!(shot.is_consumed());
        assert!(shot.take().is_none());
    }
}
