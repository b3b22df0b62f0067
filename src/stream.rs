//! A plain-or-TLS socket, so the reactor and client driver can hold one
//! concrete type regardless of whether a connection is `ws://` or `wss://`.
//! Framing lives entirely in [`crate::connection::Connection`], so this
//! type only needs to be an `AsyncRead + AsyncWrite` byte pipe.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{self, AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsStream;

pub enum EngineStream {
    Plain(TcpStream),
    Secure(TlsStream<TcpStream>),
}

/// Negotiated TLS parameters captured off a live [`EngineStream::Secure`]
/// before it is split into read/write halves — `tokio_rustls::TlsStream`
/// only exposes `get_ref()` on the unsplit stream, so this has to be read
/// eagerly right after the handshake rather than on demand.
#[derive(Debug, Clone)]
pub struct TlsSessionInfo {
    pub protocol_version: String,
    pub cipher_suite: String,
}

impl EngineStream {
    pub fn is_secure(&self) -> bool {
        matches!(self, EngineStream::Secure(_))
    }

    /// `None` for a plain socket; `Some` once a TLS handshake has completed
    /// on this stream (always true for `Secure`, since wrapping happens
    /// only after `connect`/`accept` resolves).
    pub fn tls_session_info(&self) -> Option<TlsSessionInfo> {
        let (protocol_version, cipher_suite) = match self {
            EngineStream::Plain(_) => return None,
            EngineStream::Secure(TlsStream::Client(stream)) => {
                let (_, conn) = stream.get_ref();
                (conn.protocol_version(), conn.negotiated_cipher_suite())
            }
            EngineStream::Secure(TlsStream::Server(stream)) => {
                let (_, conn) = stream.get_ref();
                (conn.protocol_version(), conn.negotiated_cipher_suite())
            }
        };
        Some(TlsSessionInfo {
            protocol_version: protocol_version
                .map(|v| format!("{v:?}"))
                .unwrap_or_default(),
            cipher_suite: cipher_suite
                .map(|cs| format!("{:?}", cs.suite()))
                .unwrap_or_default(),
        })
    }
}

impl AsyncRead for EngineStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            EngineStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            EngineStream::Secure(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for EngineStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            EngineStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            EngineStream::Secure(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            EngineStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            EngineStream::Secure(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            EngineStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            EngineStream::Secure(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
