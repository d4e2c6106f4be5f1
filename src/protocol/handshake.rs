//! WebSocket opening handshake, client side (RFC 6455 Section 4.1).
//!
//! The request is built and serialized here and the server's `101` response
//! head is validated here. Moving the bytes over a transport is left to the
//! connection layer.

use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};

use crate::config::ConnectionOptions;
use crate::error::{Error, Result};

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this client speaks.
pub const WS_VERSION: &str = "13";

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Tokens a `101` response must contain, compared case-insensitively.
const REQUIRED_TOKENS: [&str; 4] = [
    "101 switching protocols",
    "upgrade: websocket",
    "connection: upgrade",
    "sec-websocket-accept",
];

/// Parse HTTP header lines into a map keyed by lowercase name.
///
/// Lines without a colon are skipped. Parsing stops at the first empty line.
fn parse_headers<'a, I>(lines: I) -> HashMap<String, String>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_lowercase(), value.trim().to_string());
        }
    }
    headers
}

/// Validate that a header value does not contain CR or LF characters.
///
/// # Errors
/// Returns `Error::InvalidHeaderValue` if the value contains `\r` or `\n`.
pub fn validate_header_value(header_name: &str, value: &str) -> Result<()> {
    if value.contains('\r') || value.contains('\n') {
        return Err(Error::InvalidHeaderValue {
            header: header_name.to_string(),
            reason: "contains CR or LF characters".to_string(),
        });
    }
    Ok(())
}

/// Computes the Sec-WebSocket-Accept value from the client's Sec-WebSocket-Key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID))
///
/// # Example
///
/// ```
/// use wsclient::protocol::handshake::compute_accept_key;
///
/// let key = "dGhlIHNhbXBsZSBub25jZQ==";
/// let accept = compute_accept_key(key);
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let hash = hasher.finalize();
    BASE64.encode(hash)
}

/// A fresh `Sec-WebSocket-Key`: base64 of 16 random bytes.
#[must_use]
pub fn generate_key() -> String {
    let mut nonce = [0u8; 16];
    if getrandom::getrandom(&mut nonce).is_err() {
        use std::time::{SystemTime, UNIX_EPOCH};
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        nonce = nanos.to_le_bytes();
    }
    BASE64.encode(nonce)
}

/// Offset just past the `\r\n\r\n` that ends an HTTP head, if present.
#[must_use]
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
        .map(|pos| pos + HEADER_TERMINATOR.len())
}

/// The client's HTTP Upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Request target, e.g. "/chat?room=1".
    pub path: String,
    /// `Host` header value, port included only when not the scheme default.
    pub host: String,
    /// Subprotocols, one `Sec-WebSocket-Protocol` header each.
    pub protocols: Vec<String>,
    /// The `Sec-WebSocket-Key` header value.
    pub key: String,
}

impl HandshakeRequest {
    /// Create a request with a freshly generated key.
    #[must_use]
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            host: host.into(),
            protocols: Vec::new(),
            key: generate_key(),
        }
    }

    /// Build the request for a connection.
    #[must_use]
    pub fn from_options(options: &ConnectionOptions) -> Self {
        Self {
            protocols: options.protocols.clone(),
            ..Self::new(options.host_header(), options.endpoint.clone())
        }
    }

    /// Offer a subprotocol.
    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Replace the generated key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// The `Sec-WebSocket-Accept` value a conforming server answers with.
    #[must_use]
    pub fn expected_accept(&self) -> String {
        compute_accept_key(&self.key)
    }

    /// Write the HTTP request to a buffer.
    ///
    /// Headers are emitted in a fixed order: Host, Connection, Upgrade,
    /// Sec-WebSocket-Protocol (zero or more), Sec-WebSocket-Version,
    /// Sec-WebSocket-Key.
    ///
    /// # Errors
    /// Returns `Error::InvalidHeaderValue` if any value contains CR/LF.
    pub fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        validate_header_value("Request-Target", &self.path)?;
        validate_header_value("Host", &self.host)?;
        if self.path.contains(' ') {
            return Err(Error::InvalidHeaderValue {
                header: "Request-Target".to_string(),
                reason: "contains a space".to_string(),
            });
        }

        buf.extend_from_slice(format!("GET {} HTTP/1.1\r\n", self.path).as_bytes());
        buf.extend_from_slice(format!("Host: {}\r\n", self.host).as_bytes());
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        for protocol in &self.protocols {
            validate_header_value("Sec-WebSocket-Protocol", protocol)?;
            buf.extend_from_slice(format!("Sec-WebSocket-Protocol: {protocol}\r\n").as_bytes());
        }
        buf.extend_from_slice(format!("Sec-WebSocket-Version: {WS_VERSION}\r\n").as_bytes());
        buf.extend_from_slice(format!("Sec-WebSocket-Key: {}\r\n", self.key).as_bytes());
        buf.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Serialize into a new buffer.
    ///
    /// # Errors
    /// See [`HandshakeRequest::write`].
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(256);
        self.write(&mut buf)?;
        Ok(buf)
    }
}

/// The server's `101 Switching Protocols` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// The Sec-WebSocket-Accept value.
    pub accept: String,
    /// The Sec-WebSocket-Protocol selected by the server, if any.
    pub protocol: Option<String>,
}

impl HandshakeResponse {
    /// Validate and parse a response head (everything up to and including
    /// the blank line).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if:
    /// - The head is not valid UTF-8.
    /// - Any of `101 Switching Protocols`, `Upgrade: websocket`,
    ///   `Connection: Upgrade`, `Sec-WebSocket-Accept` is missing
    ///   (compared case-insensitively).
    pub fn parse(head: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(head)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;

        let lower = text.to_ascii_lowercase();
        if let Some(missing) = REQUIRED_TOKENS.iter().find(|token| !lower.contains(*token)) {
            let status = text.lines().next().unwrap_or_default();
            return Err(Error::InvalidHandshake(format!(
                "response is missing \"{missing}\" (status: {status})"
            )));
        }

        let mut lines = text.lines();
        lines.next();
        let headers = parse_headers(lines);

        let accept = headers
            .get("sec-websocket-accept")
            .cloned()
            .ok_or_else(|| Error::InvalidHandshake("Missing Sec-WebSocket-Accept header".into()))?;
        let protocol = headers
            .get("sec-websocket-protocol")
            .filter(|p| !p.is_empty())
            .cloned();

        Ok(Self { accept, protocol })
    }

    /// Check `Sec-WebSocket-Accept` against the key that was sent.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHandshake`] on mismatch.
    pub fn verify_accept(&self, request: &HandshakeRequest) -> Result<()> {
        let expected = request.expected_accept();
        if self.accept != expected {
            return Err(Error::InvalidHandshake(format!(
                "Sec-WebSocket-Accept mismatch: expected {expected}, got {}",
                self.accept
            )));
        }
        Ok(())
    }

    /// Check the selected subprotocol was one the client offered.
    ///
    /// # Errors
    /// Returns [`Error::InvalidHandshake`] if the server picked something else.
    pub fn verify_protocol(&self, request: &HandshakeRequest) -> Result<()> {
        match &self.protocol {
            Some(selected) if !request.protocols.iter().any(|p| p == selected) => {
                Err(Error::InvalidHandshake(format!(
                    "server selected unrequested subprotocol {selected}"
                )))
            }
            _ => Ok(()),
        }
    }
}
