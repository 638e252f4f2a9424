//! Shared fixtures for unit tests.

use crate::config::Config;
use crate::handler::{EchoHandler, Handler};
use crate::http::{Request, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;

/// Config bound to an ephemeral loopback port.
pub fn test_config() -> Config {
    Config {
        listen: "127.0.0.1:0".parse().unwrap(),
        shutdown_timeout: Duration::from_secs(5),
        max_connections: 64,
        workers: None,
        max_header_size: 64 * 1024,
        max_body_size: Some(1024 * 1024),
        log_level: "info".to_string(),
    }
}

/// Echo handler that signals when a request arrives, then stalls.
pub struct SlowHandler {
    delay: Duration,
    started: Arc<Notify>,
}

impl SlowHandler {
    pub fn new(delay: Duration, started: Arc<Notify>) -> Self {
        Self { delay, started }
    }
}

impl Handler for SlowHandler {
    async fn handle(&self, request: Request) -> Response {
        self.started.notify_one();
        tokio::time::sleep(self.delay).await;
        EchoHandler.handle(request).await
    }
}

/// Send raw bytes and read until the server closes the connection.
/// A reset connection yields whatever arrived before it.
pub async fn exchange(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut response = Vec::new();
    let _ = stream.read_to_end(&mut response).await;
    response
}

/// Minimal response parser for assertions.
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn parse(raw: &[u8]) -> Self {
        let split = raw
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("response head terminator");
        let head = std::str::from_utf8(&raw[..split]).unwrap();
        let mut lines = head.split("\r\n");

        let status_line = lines.next().unwrap();
        let status = status_line
            .split(' ')
            .nth(1)
            .and_then(|code| code.parse().ok())
            .expect("status code");

        let headers = lines
            .map(|line| {
                let (name, value) = line.split_once(": ").unwrap();
                (name.to_string(), value.to_string())
            })
            .collect();

        Self {
            status,
            headers,
            body: raw[split + 4..].to_vec(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
