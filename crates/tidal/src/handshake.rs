//! WebSocket HTTP upgrade handshake (RFC 6455 Section 4.2).
//!
//! Parses the client's upgrade request from raw bytes (request line plus
//! headers), validates it against the RFC requirements, computes the
//! `Sec-WebSocket-Accept` value, and writes the `101 Switching Protocols`
//! response. Validation is strictly one-pass: a failed handshake is answered
//! with `400 Bad Request` by the container and never yields a session.
//!
//! The handshake strategy is a trait ([`HandshakeHandler`]) so applications
//! can substitute their own (for example to inspect cookies or subprotocol
//! offers); [`BasicHandshake`] is the default.

use std::io::{BufRead, Write};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha1::{Digest, Sha1};

use crate::error::HandshakeError;

/// RFC 6455 magic GUID concatenated with the client key for Sec-WebSocket-Accept.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The parsed first line of the upgrade request, e.g. `GET /chat HTTP/1.1`.
#[derive(Debug, Clone)]
pub struct RequestLine {
    pub method: String,
    /// The request target as sent, possibly including a query string.
    pub target: String,
    pub version: String,
}

/// A parsed HTTP upgrade request: request line plus headers.
///
/// Models only what the handshake needs, not a general HTTP layer.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub request_line: RequestLine,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    /// Case-insensitive header lookup; returns the first match.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The request path with any query string stripped -- this is what the
    /// endpoint registry is keyed on.
    pub fn path(&self) -> &str {
        match self.request_line.target.split_once('?') {
            Some((path, _)) => path,
            None => &self.request_line.target,
        }
    }
}

/// Read and parse the upgrade request: one request line, then headers until
/// the blank line.
///
/// The caller hands in a `BufRead` and keeps it afterwards -- any bytes the
/// reader buffered beyond the blank line stay available for frame I/O.
pub fn read_request<R: BufRead>(reader: &mut R) -> Result<HttpRequest, HandshakeError> {
    let mut request_line = String::new();
    if reader.read_line(&mut request_line)? == 0 {
        return Err(HandshakeError::UnexpectedEof);
    }

    let trimmed = request_line.trim_end();
    let mut parts = trimmed.splitn(3, ' ');
    let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v)) if !m.is_empty() && !t.is_empty() && !v.is_empty() => {
            (m.to_string(), t.to_string(), v.to_string())
        }
        _ => return Err(HandshakeError::MalformedRequestLine(trimmed.to_string())),
    };

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Err(HandshakeError::UnexpectedEof);
        }
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    Ok(HttpRequest {
        request_line: RequestLine {
            method,
            target,
            version,
        },
        headers,
    })
}

/// Compute the `Sec-WebSocket-Accept` value per RFC 6455 Section 4.2.2:
/// base64(SHA-1(client key + [`WS_GUID`])).
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Validate the upgrade request per RFC 6455 Section 4.2.1.
///
/// Returns the client's `Sec-WebSocket-Key` on success.
pub fn validate_upgrade(request: &HttpRequest) -> Result<String, HandshakeError> {
    let line = &request.request_line;
    if !line.method.eq_ignore_ascii_case("GET") {
        return Err(HandshakeError::UnsupportedMethod(line.method.clone()));
    }
    if !line.version.eq_ignore_ascii_case("HTTP/1.1") {
        return Err(HandshakeError::UnsupportedVersion(line.version.clone()));
    }

    // Upgrade must name the websocket protocol; Connection must carry the
    // "upgrade" token (both may be comma-separated lists).
    match request.header("Upgrade") {
        Some(v) if contains_token(v, "websocket") => {}
        Some(_) => return Err(HandshakeError::InvalidHeader("Upgrade")),
        None => return Err(HandshakeError::MissingHeader("Upgrade")),
    }
    match request.header("Connection") {
        Some(v) if contains_token(v, "upgrade") => {}
        Some(_) => return Err(HandshakeError::InvalidHeader("Connection")),
        None => return Err(HandshakeError::MissingHeader("Connection")),
    }

    let key = match request.header("Sec-WebSocket-Key") {
        Some(k) if !k.is_empty() => k.to_string(),
        Some(_) => return Err(HandshakeError::InvalidHeader("Sec-WebSocket-Key")),
        None => return Err(HandshakeError::MissingHeader("Sec-WebSocket-Key")),
    };

    match request.header("Sec-WebSocket-Version") {
        Some("13") => {}
        Some(_) => return Err(HandshakeError::InvalidHeader("Sec-WebSocket-Version")),
        None => return Err(HandshakeError::MissingHeader("Sec-WebSocket-Version")),
    }

    Ok(key)
}

/// Case-insensitive token match within a comma-separated header value.
fn contains_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|part| part.trim().eq_ignore_ascii_case(token))
}

/// Write the `101 Switching Protocols` response.
pub fn write_upgrade_response<W: Write + ?Sized>(
    writer: &mut W,
    accept_key: &str,
) -> std::io::Result<()> {
    write!(
        writer,
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_key
    )?;
    writer.flush()
}

/// Write a `400 Bad Request` response with the given reason.
pub fn write_bad_request<W: Write + ?Sized>(writer: &mut W, reason: &str) -> std::io::Result<()> {
    let body = format!("Bad Request: {}", reason);
    write!(
        writer,
        "HTTP/1.1 400 Bad Request\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        body.len(),
        body
    )?;
    writer.flush()
}

/// Pluggable handshake strategy.
///
/// Given the parsed request and the response stream, either complete the
/// upgrade (write the 101 response) or fail. On failure the container
/// answers with 400 and closes the connection without creating a session.
pub trait HandshakeHandler: Send + Sync {
    fn negotiate(
        &self,
        request: &HttpRequest,
        response: &mut dyn Write,
    ) -> Result<(), HandshakeError>;
}

/// The default RFC 6455 Section 4.2 handshake.
#[derive(Debug, Default)]
pub struct BasicHandshake;

impl HandshakeHandler for BasicHandshake {
    fn negotiate(
        &self,
        request: &HttpRequest,
        response: &mut dyn Write,
    ) -> Result<(), HandshakeError> {
        let client_key = validate_upgrade(request)?;
        let accept_key = compute_accept_key(&client_key);
        write_upgrade_response(response, &accept_key)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

    fn sample_request(method: &str, version: &str, skip: &str) -> HttpRequest {
        let all = [
            ("Upgrade", "websocket"),
            ("Connection", "Upgrade"),
            ("Sec-WebSocket-Key", SAMPLE_KEY),
            ("Sec-WebSocket-Version", "13"),
        ];
        HttpRequest {
            request_line: RequestLine {
                method: method.to_string(),
                target: "/chat".to_string(),
                version: version.to_string(),
            },
            headers: all
                .iter()
                .filter(|(k, _)| !k.eq_ignore_ascii_case(skip))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_accept_key_rfc_vector() {
        // RFC 6455 Section 4.2.2 reference vector.
        assert_eq!(
            compute_accept_key(SAMPLE_KEY),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_read_request_parses_line_and_headers() {
        let raw = "GET /chat?room=1 HTTP/1.1\r\n\
                   Host: example.com\r\n\
                   Upgrade: websocket\r\n\
                   \r\n";
        let request = read_request(&mut BufReader::new(raw.as_bytes())).unwrap();
        assert_eq!(request.request_line.method, "GET");
        assert_eq!(request.request_line.target, "/chat?room=1");
        assert_eq!(request.path(), "/chat");
        assert_eq!(request.request_line.version, "HTTP/1.1");
        assert_eq!(request.header("host"), Some("example.com"));
        assert_eq!(request.header("UPGRADE"), Some("websocket"));
    }

    #[test]
    fn test_read_request_rejects_garbage() {
        let err = read_request(&mut BufReader::new("nonsense\r\n\r\n".as_bytes())).unwrap_err();
        assert!(matches!(err, HandshakeError::MalformedRequestLine(_)));
    }

    #[test]
    fn test_read_request_rejects_eof() {
        let err = read_request(&mut BufReader::new("".as_bytes())).unwrap_err();
        assert!(matches!(err, HandshakeError::UnexpectedEof));
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        let key = validate_upgrade(&sample_request("GET", "HTTP/1.1", "")).unwrap();
        assert_eq!(key, SAMPLE_KEY);
    }

    #[test]
    fn test_validate_rejects_method_and_version() {
        let err = validate_upgrade(&sample_request("POST", "HTTP/1.1", "")).unwrap_err();
        assert!(matches!(err, HandshakeError::UnsupportedMethod(_)));

        let err = validate_upgrade(&sample_request("GET", "HTTP/1.0", "")).unwrap_err();
        assert!(matches!(err, HandshakeError::UnsupportedVersion(_)));
    }

    #[test]
    fn test_validate_rejects_each_missing_header() {
        for header in [
            "Upgrade",
            "Connection",
            "Sec-WebSocket-Key",
            "Sec-WebSocket-Version",
        ] {
            let err = validate_upgrade(&sample_request("GET", "HTTP/1.1", header)).unwrap_err();
            assert!(
                matches!(err, HandshakeError::MissingHeader(h) if h == header),
                "expected MissingHeader({}), got {:?}",
                header,
                err
            );
        }
    }

    #[test]
    fn test_validate_rejects_wrong_version_value() {
        let mut request = sample_request("GET", "HTTP/1.1", "Sec-WebSocket-Version");
        request
            .headers
            .push(("Sec-WebSocket-Version".to_string(), "8".to_string()));
        let err = validate_upgrade(&request).unwrap_err();
        assert!(matches!(
            err,
            HandshakeError::InvalidHeader("Sec-WebSocket-Version")
        ));
    }

    #[test]
    fn test_connection_header_token_list() {
        let mut request = sample_request("GET", "HTTP/1.1", "Connection");
        request
            .headers
            .push(("Connection".to_string(), "keep-alive, Upgrade".to_string()));
        assert!(validate_upgrade(&request).is_ok());
    }

    #[test]
    fn test_negotiate_writes_101() {
        let request = sample_request("GET", "HTTP/1.1", "");
        let mut response = Vec::new();
        BasicHandshake.negotiate(&request, &mut response).unwrap();

        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_negotiate_failure_writes_nothing() {
        let request = sample_request("POST", "HTTP/1.1", "");
        let mut response = Vec::new();
        assert!(BasicHandshake.negotiate(&request, &mut response).is_err());
        assert!(response.is_empty(), "no partial response on failure");
    }

    #[test]
    fn test_bad_request_response() {
        let mut response = Vec::new();
        write_bad_request(&mut response, "missing required header Upgrade").unwrap();
        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(text.contains("missing required header Upgrade"));
    }
}
