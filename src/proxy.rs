//! HTTP CONNECT proxy support for the client driver.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::Error;

#[derive(Debug, Clone)]
pub struct Proxy {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Proxy {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }

    /// Opens a TCP connection to the proxy, then issues an HTTP CONNECT
    /// tunnel request for `(target_host, target_port)`. On success the
    /// returned socket is a transparent byte pipe to the target, ready for
    /// the WebSocket handshake (and TLS wrapping, if `wss`).
    pub async fn connect(&self, target_host: &str, target_port: u16) -> Result<TcpStream, Error> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;

        let mut request = format!(
            "CONNECT {target_host}:{target_port} HTTP/1.1\r\nHost: {target_host}:{target_port}\r\n"
        );
        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            let credentials = base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                format!("{user}:{pass}"),
            );
            request.push_str(&format!("Proxy-Authorization: Basic {credentials}\r\n"));
        }
        request.push_str("\r\n");

        stream.write_all(request.as_bytes()).await?;

        let mut response = Vec::new();
        let mut byte = [0u8; 1];
        // Read until the blank line terminating the CONNECT response headers.
        while !response.ends_with(b"\r\n\r\n") {
            let n = stream.read(&mut byte).await?;
            if n == 0 {
                return Err(Error::IncompleteHTTPRequest);
            }
            response.push(byte[0]);
        }

        let response_text = String::from_utf8_lossy(&response);
        let status_line = response_text.lines().next().unwrap_or_default();
        if !status_line.contains("200") {
            return Err(Error::IllegalState("proxy CONNECT was rejected"));
        }

        Ok(stream)
    }
}
