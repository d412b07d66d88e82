//! Socket-level HTTP/1.1 adapter.
//!
//! One connection per exchange (`Connection: close`). Request bodies are
//! framed with `Content-Length` when the size is known and chunked
//! otherwise; responses are read as length-delimited, chunked, or
//! until-close bodies.

use super::{response_has_body, tls, Hop, TransferContext, Transport, USER_AGENT};
use crate::body::BodyStream;
use crate::error::TransportError;
use crate::response::RawTransferResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING,
    USER_AGENT as USER_AGENT_HEADER,
};
use reqwest::{Method, StatusCode};
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use url::{Host, Position, Url};

const MAX_LINE: u64 = 16 * 1024;
const MAX_HEADERS: usize = 128;
const READ_CHUNK: usize = 16 * 1024;

trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

type Conn = BufReader<Box<dyn Connection>>;

/// Transport speaking HTTP/1.1 over a plain or TLS socket.
#[derive(Debug, Clone, Default)]
pub(crate) struct SocketTransport;

impl SocketTransport {
    pub(crate) fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn name(&self) -> &'static str {
        "socket"
    }

    async fn round_trip(
        &self,
        hop: &Hop<'_>,
        ctx: &TransferContext,
    ) -> Result<RawTransferResult, TransportError> {
        let exchange = async {
            let mut conn = connect(&hop.url).await?;
            let upload = ctx.open_upload(hop).await?;
            write_request(&mut conn, hop, upload).await?;
            read_response(conn, hop).await
        };

        tokio::select! {
            biased;
            _ = ctx.abort.cancelled() => Err(TransportError::Aborted),
            result = exchange => result,
        }
    }
}

async fn connect(url: &Url) -> Result<Conn, TransportError> {
    let host = match url.host() {
        Some(Host::Domain(domain)) => domain.to_string(),
        Some(Host::Ipv4(addr)) => addr.to_string(),
        Some(Host::Ipv6(addr)) => addr.to_string(),
        None => {
            return Err(TransportError::InvalidRequest(format!(
                "URL '{url}' has no host"
            )))
        }
    };
    let port = url
        .port_or_known_default()
        .ok_or_else(|| TransportError::InvalidRequest(format!("URL '{url}' has no port")))?;

    let tcp = TcpStream::connect((host.as_str(), port))
        .await
        .map_err(|e| TransportError::io(&format!("failed to connect to {host}:{port}"), e))?;
    let _ = tcp.set_nodelay(true);

    let io: Box<dyn Connection> = if url.scheme() == "https" {
        Box::new(tls::connect(&host, tcp).await?)
    } else {
        Box::new(tcp)
    };
    Ok(BufReader::new(io))
}

/// Serialize the request line and headers.
fn request_head(hop: &Hop<'_>, body_length: Option<Option<u64>>) -> Vec<u8> {
    let mut head = Vec::with_capacity(256);
    head.extend_from_slice(hop.method.as_str().as_bytes());
    head.push(b' ');
    head.extend_from_slice(hop.url[Position::BeforePath..Position::AfterQuery].as_bytes());
    head.extend_from_slice(b" HTTP/1.1\r\nHost: ");
    head.extend_from_slice(hop.url[Position::BeforeHost..Position::AfterPort].as_bytes());
    head.extend_from_slice(b"\r\n");

    for (name, value) in &hop.headers {
        if [HOST, CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING].contains(name) {
            continue;
        }
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    if !hop.headers.contains_key(USER_AGENT_HEADER) {
        head.extend_from_slice(format!("user-agent: {USER_AGENT}\r\n").as_bytes());
    }

    match body_length {
        Some(Some(length)) => {
            head.extend_from_slice(format!("content-length: {length}\r\n").as_bytes())
        }
        Some(None) => head.extend_from_slice(b"transfer-encoding: chunked\r\n"),
        None if matches!(hop.method, Method::POST | Method::PUT | Method::PATCH) => {
            head.extend_from_slice(b"content-length: 0\r\n")
        }
        None => {}
    }

    head.extend_from_slice(b"connection: close\r\n\r\n");
    head
}

async fn write_request(
    conn: &mut Conn,
    hop: &Hop<'_>,
    upload: Option<(BodyStream, Option<u64>)>,
) -> Result<(), TransportError> {
    let head = request_head(hop, upload.as_ref().map(|(_, length)| *length));
    let failed = |e| TransportError::io("failed to send request", e);

    conn.write_all(&head).await.map_err(failed)?;

    if let Some((mut body, length)) = upload {
        let chunked = length.is_none();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| TransportError::io("failed to read request body", e))?;
            if chunk.is_empty() {
                continue;
            }
            if chunked {
                conn.write_all(format!("{:x}\r\n", chunk.len()).as_bytes())
                    .await
                    .map_err(failed)?;
                conn.write_all(&chunk).await.map_err(failed)?;
                conn.write_all(b"\r\n").await.map_err(failed)?;
            } else {
                conn.write_all(&chunk).await.map_err(failed)?;
            }
        }
        if chunked {
            conn.write_all(b"0\r\n\r\n").await.map_err(failed)?;
        }
    }

    conn.flush().await.map_err(failed)
}

/// Read one CRLF- or LF-terminated line without the terminator.
async fn read_line(conn: &mut Conn) -> io::Result<Vec<u8>> {
    let mut line = Vec::new();
    let read = (&mut *conn).take(MAX_LINE).read_until(b'\n', &mut line).await?;
    if read == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed mid-message",
        ));
    }
    if line.last() != Some(&b'\n') {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
    }
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(line)
}

fn trim(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &bytes[start..end]
}

fn invalid(message: impl Into<String>) -> TransportError {
    TransportError::network(format!("invalid HTTP response: {}", message.into()))
}

/// Read a status line and headers.
async fn read_head(conn: &mut Conn) -> Result<(u16, String, HeaderMap), TransportError> {
    let line = read_line(conn)
        .await
        .map_err(|e| TransportError::io("failed to read response", e))?;
    let line = String::from_utf8_lossy(&line);

    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(invalid(format!("bad status line '{line}'")));
    }
    let status = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .filter(|s| (100..1000).contains(s))
        .ok_or_else(|| invalid(format!("bad status line '{line}'")))?;
    let reason = parts.next().unwrap_or_default().trim().to_string();

    let mut headers = HeaderMap::new();
    loop {
        let line = read_line(conn)
            .await
            .map_err(|e| TransportError::io("failed to read response headers", e))?;
        if line.is_empty() {
            break;
        }
        if headers.len() >= MAX_HEADERS {
            return Err(invalid("too many headers"));
        }
        let Some(colon) = line.iter().position(|b| *b == b':') else {
            return Err(invalid("header line without ':'"));
        };
        let name = HeaderName::from_bytes(trim(&line[..colon]))
            .map_err(|_| invalid("bad header name"))?;
        let value = HeaderValue::from_bytes(trim(&line[colon + 1..]))
            .map_err(|_| invalid("bad header value"))?;
        headers.append(name, value);
    }

    Ok((status, reason, headers))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Empty,
    Length(u64),
    Chunked { left: u64, finished: bool },
    UntilClose,
}

impl Framing {
    fn for_response(method: &Method, status: u16, headers: &HeaderMap) -> Result<Self, TransportError> {
        if !response_has_body(method, status) {
            return Ok(Framing::Empty);
        }

        let chunked = headers
            .get_all(TRANSFER_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .last()
            .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
        if chunked {
            return Ok(Framing::Chunked {
                left: 0,
                finished: false,
            });
        }

        match headers.get(CONTENT_LENGTH) {
            Some(value) => {
                let length = value
                    .to_str()
                    .ok()
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .ok_or_else(|| invalid("bad content-length"))?;
                Ok(if length == 0 {
                    Framing::Empty
                } else {
                    Framing::Length(length)
                })
            }
            None => Ok(Framing::UntilClose),
        }
    }
}

struct BodyReader {
    conn: Conn,
    framing: Framing,
}

impl BodyReader {
    async fn fill(&mut self, max: u64) -> io::Result<Bytes> {
        let want = (max.min(READ_CHUNK as u64)) as usize;
        let mut buf = vec![0u8; want];
        let n = self.conn.read(&mut buf).await?;
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }

    async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        loop {
            match self.framing {
                Framing::Empty | Framing::Length(0) => return Ok(None),
                Framing::UntilClose => {
                    let chunk = self.fill(READ_CHUNK as u64).await?;
                    return Ok((!chunk.is_empty()).then_some(chunk));
                }
                Framing::Length(remaining) => {
                    let chunk = self.fill(remaining).await?;
                    if chunk.is_empty() {
                        return Err(premature_eof());
                    }
                    self.framing = Framing::Length(remaining - chunk.len() as u64);
                    return Ok(Some(chunk));
                }
                Framing::Chunked { finished: true, .. } => return Ok(None),
                Framing::Chunked { left: 0, .. } => {
                    let line = read_line(&mut self.conn).await?;
                    let size = std::str::from_utf8(&line)
                        .ok()
                        .and_then(|l| l.split(';').next())
                        .and_then(|s| u64::from_str_radix(s.trim(), 16).ok())
                        .ok_or_else(|| {
                            io::Error::new(io::ErrorKind::InvalidData, "bad chunk size")
                        })?;

                    if size == 0 {
                        // Trailers end with an empty line.
                        while !read_line(&mut self.conn).await?.is_empty() {}
                    }
                    self.framing = Framing::Chunked {
                        left: size,
                        finished: size == 0,
                    };
                }
                Framing::Chunked { left, .. } => {
                    let chunk = self.fill(left).await?;
                    if chunk.is_empty() {
                        return Err(premature_eof());
                    }
                    let left = left - chunk.len() as u64;
                    if left == 0 && !read_line(&mut self.conn).await?.is_empty() {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "missing CRLF after chunk",
                        ));
                    }
                    self.framing = Framing::Chunked {
                        left,
                        finished: false,
                    };
                    return Ok(Some(chunk));
                }
            }
        }
    }
}

fn premature_eof() -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "connection closed before the body was complete",
    )
}

async fn read_response(mut conn: Conn, hop: &Hop<'_>) -> Result<RawTransferResult, TransportError> {
    let (status, reason, headers) = loop {
        let (status, reason, headers) = read_head(&mut conn).await?;
        // Interim responses (100 Continue, 103 Early Hints) precede the real one.
        if (100..200).contains(&status) && status != 101 {
            continue;
        }
        break (status, reason, headers);
    };

    let framing = Framing::for_response(&hop.method, status, &headers)?;
    let status_text = if reason.is_empty() {
        StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default()
            .to_string()
    } else {
        reason
    };

    let reader = BodyReader { conn, framing };
    let body = stream::unfold(Some(reader), |state| async move {
        let mut reader = state?;
        match reader.next_chunk().await {
            Ok(Some(chunk)) => Some((Ok(chunk), Some(reader))),
            Ok(None) => None,
            Err(e) => Some((Err(e), None)),
        }
    });

    Ok(RawTransferResult {
        status,
        status_text,
        headers,
        url: hop.url.clone(),
        body: Box::pin(body),
    })
}
