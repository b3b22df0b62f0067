//! Pluggable handshake/framing policy.
//!
//! Only one draft ships — [`Rfc6455`] — but the policy surface is a trait
//! rather than free functions so a future draft (e.g. a pre-RFC Hixie
//! variant) has somewhere to slot in without touching the connection state
//! machine or the reactor.

use crate::error::Error;
use crate::frame::Frame;
use crate::handshake::{
    build_client_request, build_server_response, is_connection_upgrade_header,
    is_upgrade_header, parse_request, parse_response, SEC_WEBSOCKET_VERSION,
};
use crate::message::Message;
use crate::utils::{generate_websocket_accept_value, generate_websocket_key};

/// Result of successfully accepting an inbound handshake as a server: the
/// raw HTTP response to write back, and the request path the client asked
/// for (callers may use it for routing).
pub struct ServerAccept {
    pub response: String,
    pub path: String,
}

/// Result of building an outbound handshake as a client: the raw HTTP
/// request, the value to check the response's `Sec-WebSocket-Accept`
/// against, and connection metadata extracted from the URL.
pub struct ClientHandshakeRequest {
    pub request: String,
    pub expected_accept: String,
    pub host_with_port: String,
    pub host: String,
    pub use_tls: bool,
}

pub trait Draft: Send + Sync {
    /// Validates an inbound upgrade request and builds the `101` response.
    fn accept_handshake_as_server(&self, request_bytes: &[u8]) -> Result<ServerAccept, Error>;

    /// Builds the outbound upgrade request for `ws_url`.
    fn build_handshake_as_client(
        &self,
        ws_url: &str,
        extra_headers: &[(String, String)],
    ) -> Result<ClientHandshakeRequest, Error>;

    /// Validates the server's `101` response against the key this client
    /// sent.
    fn accept_handshake_as_client(
        &self,
        response_bytes: &[u8],
        expected_accept: &str,
    ) -> Result<(), Error>;

    /// Splits `message` into frames no larger than `max_frame_size`,
    /// applying this draft's framing rules.
    fn create_frames(&self, message: Message, max_frame_size: usize) -> Vec<Frame>;

    /// Clears any per-connection negotiation state so the draft can be
    /// reused on a fresh socket (RFC 6455 is stateless here; the hook
    /// exists for drafts that negotiate per-connection extensions).
    fn reset(&self);
}

/// The RFC 6455 handshake and framing rules — the only draft this engine
/// ships (permessage-deflate and other extensions are out of scope).
#[derive(Debug, Default, Clone, Copy)]
pub struct Rfc6455;

impl Draft for Rfc6455 {
    fn accept_handshake_as_server(&self, request_bytes: &[u8]) -> Result<ServerAccept, Error> {
        let request = parse_request(request_bytes)?;

        if !request.method.eq_ignore_ascii_case("GET") {
            return Err(Error::InvalidHTTPHandshake);
        }
        request.header("host").ok_or(Error::NoHostHeaderPresent)?;
        let connection = request
            .header("connection")
            .ok_or(Error::NoConnectionHeaderPresent)?;
        if !is_connection_upgrade_header(connection) {
            return Err(Error::NoConnectionHeaderPresent);
        }
        let upgrade = request
            .header("upgrade")
            .ok_or(Error::NoUpgradeHeaderPresent)?;
        if !is_upgrade_header(upgrade) {
            return Err(Error::NoUpgradeHeaderPresent);
        }
        let version = request.header("sec-websocket-version");
        if version != Some(SEC_WEBSOCKET_VERSION) {
            return Err(Error::UnsupportedVersion);
        }
        let key = request.header("sec-websocket-key").ok_or(Error::NoSecWebsocketKey)?;

        let accept_value = generate_websocket_accept_value(key);
        Ok(ServerAccept {
            response: build_server_response(&accept_value),
            path: request.path,
        })
    }

    fn build_handshake_as_client(
        &self,
        ws_url: &str,
        extra_headers: &[(String, String)],
    ) -> Result<ClientHandshakeRequest, Error> {
        let key = generate_websocket_key();
        let expected_accept = generate_websocket_accept_value(&key);
        let (request, host_with_port, host, use_tls) =
            build_client_request(ws_url, &key, extra_headers)?;

        Ok(ClientHandshakeRequest {
            request,
            expected_accept,
            host_with_port,
            host,
            use_tls,
        })
    }

    fn accept_handshake_as_client(
        &self,
        response_bytes: &[u8],
        expected_accept: &str,
    ) -> Result<(), Error> {
        let response = parse_response(response_bytes)?;
        if response.status != 101 {
            return Err(Error::NoUpgrade);
        }
        let upgrade = response.header("upgrade").ok_or(Error::NoUpgradeHeaderPresent)?;
        if !is_upgrade_header(upgrade) {
            return Err(Error::NoUpgradeHeaderPresent);
        }
        let connection = response
            .header("connection")
            .ok_or(Error::NoConnectionHeaderPresent)?;
        if !is_connection_upgrade_header(connection) {
            return Err(Error::NoConnectionHeaderPresent);
        }
        let accept = response
            .header("sec-websocket-accept")
            .ok_or(Error::InvalidAcceptKey)?;
        if accept != expected_accept {
            return Err(Error::InvalidAcceptKey);
        }
        Ok(())
    }

    fn create_frames(&self, message: Message, max_frame_size: usize) -> Vec<Frame> {
        message.to_frames(max_frame_size)
    }

    fn reset(&self) {
        // RFC 6455 negotiates nothing per-connection beyond the handshake.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request(key: &str) -> String {
        format!(
            "GET /chat HTTP/1.1\r\n\
             Host: example.com\r\n\
             Connection: Upgrade\r\n\
             Upgrade: websocket\r\n\
             Sec-WebSocket-Key: {key}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             \r\n"
        )
    }

    #[test]
    fn server_accepts_well_formed_handshake() {
        let draft = Rfc6455;
        let request = sample_request("dGhlIHNhbXBsZSBub25jZQ==");
        let accept = draft.accept_handshake_as_server(request.as_bytes()).unwrap();
        assert_eq!(accept.path, "/chat");
        assert!(accept.response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    }

    #[test]
    fn server_rejects_missing_key() {
        let draft = Rfc6455;
        let request = "GET /chat HTTP/1.1\r\nHost: example.com\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Version: 13\r\n\r\n";
        assert!(matches!(
            draft.accept_handshake_as_server(request.as_bytes()),
            Err(Error::NoSecWebsocketKey)
        ));
    }

    #[test]
    fn server_rejects_unsupported_version() {
        let draft = Rfc6455;
        let request = "GET /chat HTTP/1.1\r\nHost: example.com\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Key: abc\r\nSec-WebSocket-Version: 8\r\n\r\n";
        assert!(matches!(
            draft.accept_handshake_as_server(request.as_bytes()),
            Err(Error::UnsupportedVersion)
        ));
    }

    #[test]
    fn client_round_trips_with_server() {
        let draft = Rfc6455;
        let built = draft
            .build_handshake_as_client("ws://localhost:9000/socket", &[])
            .unwrap();
        let accept = draft
            .accept_handshake_as_server(built.request.as_bytes())
            .unwrap();
        draft
            .accept_handshake_as_client(accept.response.as_bytes(), &built.expected_accept)
            .unwrap();
    }

    #[test]
    fn client_rejects_mismatched_accept() {
        let draft = Rfc6455;
        let response = "HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Accept: bogus\r\n\r\n";
        assert!(matches!(
            draft.accept_handshake_as_client(response.as_bytes(), "expected"),
            Err(Error::InvalidAcceptKey)
        ));
    }

    #[test]
    fn client_rejects_non_101_status() {
        let draft = Rfc6455;
        let response = "HTTP/1.1 400 Bad Request\r\n\r\n";
        assert!(matches!(
            draft.accept_handshake_as_client(response.as_bytes(), "expected"),
            Err(Error::NoUpgrade)
        ));
    }
}
