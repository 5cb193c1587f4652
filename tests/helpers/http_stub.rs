//! One-shot HTTP server on a loopback port.
//!
//! Accepts a single connection, captures the raw request, then writes a
//! scripted response in pieces so clients see arbitrary chunk boundaries.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use ocr_assistant_lib::llm::LlmConnection;

pub struct StubServer {
    pub base_url: String,
    request: JoinHandle<String>,
}

impl StubServer {
    /// The raw request the client sent.
    pub async fn request(self) -> String {
        self.request.await.unwrap()
    }
}

/// Parse the JSON body of a captured request.
pub fn body_json(request: &str) -> serde_json::Value {
    let body = request.split_once("\r\n\r\n").map(|(_, b)| b).unwrap_or("");
    serde_json::from_str(body).unwrap()
}

/// Status line and headers for a close-delimited streaming body.
pub fn stream_head(content_type: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nConnection: close\r\n\r\n",
        content_type
    )
    .into_bytes()
}

/// A complete response with a Content-Length body.
pub fn full_response(status: &str, content_type: &str, body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        content_type,
        body.len(),
        body
    )
    .into_bytes()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];
    loop {
        let n = stream.read(&mut tmp).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(end) = find(&buf, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Answer one request with `pieces`, written one at a time.
pub async fn serve(pieces: Vec<Vec<u8>>) -> StubServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let request = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_request(&mut stream).await;
        for piece in pieces {
            if stream.write_all(&piece).await.is_err() {
                break;
            }
            let _ = stream.flush().await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let _ = stream.shutdown().await;
        request
    });
    StubServer {
        base_url: format!("http://{}", addr),
        request,
    }
}

/// Read the request, then never answer.
pub async fn hang() -> StubServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let request = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_request(&mut stream).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(stream);
        request
    });
    StubServer {
        base_url: format!("http://{}", addr),
        request,
    }
}

/// A loopback address nothing listens on.
pub async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

/// Shared connection that ignores proxy environment variables.
pub fn direct_connection() -> Arc<LlmConnection> {
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    Arc::new(LlmConnection::from_client(client))
}
