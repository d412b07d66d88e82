//! Raw TCP servers that misbehave on purpose.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::debug;

/// Behaviour of one accepted connection.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Read the request, then reset the connection without answering.
    Reset,
    /// Send the head and `sent` bytes of a `total`-byte body, then stall.
    StallBody { total: usize, sent: usize },
    /// Answer with a complete raw HTTP/1.1 response.
    Respond(Vec<u8>),
}

/// A TCP server that plays one [`Fault`] per connection, in order.
///
/// Connections beyond the scripted list replay the last entry.
pub struct FaultyServer {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl FaultyServer {
    /// Start serving the given script on an ephemeral port.
    pub async fn start(script: Vec<Fault>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fault server");
        let addr = listener.local_addr().expect("fault server address");
        let accepted = Arc::new(AtomicUsize::new(0));

        let counter = accepted.clone();
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let fault = script
                    .get(n)
                    .or_else(|| script.last())
                    .cloned()
                    .unwrap_or(Fault::Reset);
                tokio::spawn(play(stream, fault));
            }
        });

        Self {
            addr,
            accepted,
            task,
        }
    }

    /// A server that resets `failures` connections, then answers with JSON.
    pub async fn flaky(failures: usize, json: &str) -> Self {
        let mut script = vec![Fault::Reset; failures];
        script.push(Fault::Respond(json_response(200, json)));
        Self::start(script).await
    }

    /// Base URL of the server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// URL for a path on the server.
    pub fn url_for(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Number of connections accepted so far.
    pub fn connections(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

impl Drop for FaultyServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A complete `Connection: close` response carrying a JSON body.
pub fn json_response(status: u16, body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {status} OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

async fn play(mut stream: TcpStream, fault: Fault) {
    read_request_head(&mut stream).await;
    debug!(?fault, "playing fault");

    match fault {
        Fault::Reset => {
            let _ = stream.set_linger(Some(Duration::ZERO));
            drop(stream);
        }
        Fault::StallBody { total, sent } => {
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {total}\r\n\r\n"
            );
            let _ = stream.write_all(head.as_bytes()).await;
            let _ = stream.write_all(&vec![b'x'; sent.min(total)]).await;
            let _ = stream.flush().await;
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        Fault::Respond(bytes) => {
            let _ = stream.write_all(&bytes).await;
            let _ = stream.shutdown().await;
        }
    }
}

/// Consume the request head and a `Content-Length` body, if any.
async fn read_request_head(stream: &mut TcpStream) {
    let mut seen = Vec::new();
    let mut buf = [0u8; 1024];
    let head_end = loop {
        if let Some(pos) = seen.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => seen.extend_from_slice(&buf[..n]),
        }
    };

    let head = String::from_utf8_lossy(&seen[..head_end]).to_ascii_lowercase();
    let body_len = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut remaining = body_len.saturating_sub(seen.len() - head_end);
    while remaining > 0 {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => remaining = remaining.saturating_sub(n),
        }
    }
}
