//! Raw HTTP request/response construction and parsing for the RFC 6455
//! upgrade handshake. [`crate::draft`] layers handshake *policy* (which
//! headers are mandatory, how to compute the accept value) on top of the
//! parsing primitives here.

use std::collections::HashMap;

use url::Url;

use crate::error::Error;

pub const SEC_WEBSOCKET_VERSION: &str = "13";

#[derive(Debug)]
pub struct ParsedRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
}

impl ParsedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }
}

#[derive(Debug)]
pub struct ParsedResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
}

impl ParsedResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }
}

/// Parses a complete HTTP request (headers only, no body expected for an
/// upgrade request) using `httparse`.
pub fn parse_request(buf: &[u8]) -> Result<ParsedRequest, Error> {
    let mut header_storage = [httparse::EMPTY_HEADER; 32];
    let mut req = httparse::Request::new(&mut header_storage);
    match req.parse(buf)? {
        httparse::Status::Complete(_) => {}
        httparse::Status::Partial => return Err(Error::IncompleteHTTPRequest),
    }

    let method = req.method.ok_or(Error::InvalidHTTPHandshake)?.to_string();
    let path = req.path.ok_or(Error::InvalidHTTPHandshake)?.to_string();
    let mut headers = HashMap::new();
    for header in req.headers.iter() {
        headers.insert(
            header.name.to_ascii_lowercase(),
            String::from_utf8_lossy(header.value).trim().to_string(),
        );
    }

    Ok(ParsedRequest {
        method,
        path,
        headers,
    })
}

/// Parses a complete HTTP response (the 101 Switching Protocols reply).
pub fn parse_response(buf: &[u8]) -> Result<ParsedResponse, Error> {
    let mut header_storage = [httparse::EMPTY_HEADER; 32];
    let mut resp = httparse::Response::new(&mut header_storage);
    match resp.parse(buf)? {
        httparse::Status::Complete(_) => {}
        httparse::Status::Partial => return Err(Error::IncompleteHTTPRequest),
    }

    let status = resp.code.ok_or(Error::InvalidHTTPHandshake)?;
    let mut headers = HashMap::new();
    for header in resp.headers.iter() {
        headers.insert(
            header.name.to_ascii_lowercase(),
            String::from_utf8_lossy(header.value).trim().to_string(),
        );
    }

    Ok(ParsedResponse { status, headers })
}

fn header_contains_token(value: &str, token: &str) -> bool {
    value
        .split(|c| c == ',' || c == ' ')
        .any(|part| part.eq_ignore_ascii_case(token))
}

pub fn is_upgrade_header(value: &str) -> bool {
    header_contains_token(value, "websocket")
}

pub fn is_connection_upgrade_header(value: &str) -> bool {
    header_contains_token(value, "upgrade")
}

/// Builds the client's `GET ... HTTP/1.1` upgrade request. Returns
/// `(request_text, host_with_port, host, use_tls)`.
pub fn build_client_request(
    ws_url: &str,
    key: &str,
    extra_headers: &[(String, String)],
) -> Result<(String, String, String, bool), Error> {
    let parsed_url = Url::parse(ws_url)?;

    let (default_port, use_tls) = match parsed_url.scheme() {
        "ws" => (80, false),
        "wss" => (443, true),
        _ => return Err(Error::InvalidSchemeURL),
    };

    let host = parsed_url.host_str().ok_or(Error::URLNoHost)?;
    let port = parsed_url.port().unwrap_or(default_port);

    let request_host_field = match parsed_url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let host_with_port = format!("{host}:{port}");

    let request_path = match parsed_url.query() {
        Some(query) => format!("{}?{}", parsed_url.path(), query),
        None => parsed_url.path().to_string(),
    };

    let mut request = format!(
        "GET {request_path} HTTP/1.1\r\n\
         Host: {request_host_field}\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: {SEC_WEBSOCKET_VERSION}\r\n"
    );
    for (name, value) in extra_headers {
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    request.push_str("\r\n");

    Ok((request, host_with_port, host.to_string(), use_tls))
}

/// Builds the server's `101 Switching Protocols` response.
pub fn build_server_response(accept_value: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Accept: {accept_value}\r\n\
         \r\n"
    )
}
