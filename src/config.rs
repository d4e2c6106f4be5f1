//! Connection options, limits and timeouts for WebSocket clients.

use std::borrow::Cow;
use std::net::Ipv6Addr;
use std::time::Duration;

use url::{Host, Url};

use crate::error::{Error, Result};

/// Configuration limits for WebSocket connections.
///
/// These limits prevent resource exhaustion and ensure bounded memory usage
/// when a peer announces huge frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum size of a single frame payload in bytes.
    ///
    /// Default: 16 MB (16 * 1024 * 1024)
    pub max_frame_size: usize,

    /// Maximum size of a complete message in bytes.
    ///
    /// This applies to the total size after reassembling all fragments.
    ///
    /// Default: 64 MB (64 * 1024 * 1024)
    pub max_message_size: usize,

    /// Maximum number of fragments in a single message.
    ///
    /// Default: 1024
    pub max_fragment_count: usize,

    /// Maximum size of the handshake response head in bytes.
    ///
    /// Default: 8 KB (8192)
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,   // 16 MB
            max_message_size: 64 * 1024 * 1024, // 64 MB
            max_fragment_count: 1024,
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    #[must_use]
    pub const fn new(
        max_frame_size: usize,
        max_message_size: usize,
        max_fragment_count: usize,
        max_handshake_size: usize,
    ) -> Self {
        Self {
            max_frame_size,
            max_message_size,
            max_fragment_count,
            max_handshake_size,
        }
    }

    /// Validate that message size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<()> {
        if size > self.max_message_size {
            Err(Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that frame size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_frame_size(&self, size: usize) -> Result<()> {
        if size > self.max_frame_size {
            Err(Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that fragment count is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyFragments`] if `count` exceeds the configured maximum.
    pub const fn check_fragment_count(&self, count: usize) -> Result<()> {
        if count > self.max_fragment_count {
            Err(Error::TooManyFragments {
                count,
                max: self.max_fragment_count,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that handshake size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_handshake_size(&self, size: usize) -> Result<()> {
        if size > self.max_handshake_size {
            Err(Error::HandshakeTooLarge {
                size,
                max: self.max_handshake_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Timeouts applied by the client.
///
/// `connect` bounds opening the transport, `read` bounds waiting for the
/// handshake response and `write` bounds every handshake or frame write.
/// Reads of WebSocket frames are not bounded; an idle connection stays open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Opening the transport.
    ///
    /// Default: 15 seconds
    pub connect: Duration,

    /// Reading the handshake response.
    ///
    /// Default: same as `connect`
    pub read: Duration,

    /// Writing the handshake request and each outgoing frame.
    ///
    /// Default: same as `connect`
    pub write: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::uniform(Duration::from_secs(15))
    }
}

impl Timeouts {
    /// Create new timeouts with custom values.
    #[must_use]
    pub const fn new(connect: Duration, read: Duration, write: Duration) -> Self {
        Self {
            connect,
            read,
            write,
        }
    }

    /// Use the same duration for every operation.
    #[must_use]
    pub const fn uniform(timeout: Duration) -> Self {
        Self::new(timeout, timeout, timeout)
    }
}

/// Everything a [`WebSocketClient`](crate::WebSocketClient) needs to reach a
/// server and run the connection.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Host name or address of the server.
    pub host: String,

    /// Server port.
    ///
    /// Default: 443
    pub port: u16,

    /// Request target of the upgrade request, including any query.
    ///
    /// Default: "/"
    pub endpoint: String,

    /// Subprotocols offered with one `Sec-WebSocket-Protocol` header each.
    pub protocols: Vec<String>,

    /// Connect over TLS.
    ///
    /// Default: `port == 443`
    pub tls: bool,

    /// Timeout configuration.
    pub timeouts: Timeouts,

    /// Resource limits.
    pub limits: Limits,

    /// Split outgoing text and binary payloads larger than this into
    /// continuation frames.
    ///
    /// Default: None (every message is a single frame)
    pub fragment_size: Option<usize>,

    /// Capacity of the incoming message broadcast channel.
    ///
    /// Subscribers that fall further behind than this miss messages.
    /// Default: 256
    pub message_buffer: usize,

    /// Require `Sec-WebSocket-Accept` to match the key that was sent.
    ///
    /// Default: false (the header only has to be present)
    pub verify_accept: bool,
}

impl ConnectionOptions {
    /// Options for `host` on the default TLS port.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 443,
            endpoint: "/".to_string(),
            protocols: Vec::new(),
            tls: true,
            timeouts: Timeouts::default(),
            limits: Limits::default(),
            fragment_size: None,
            message_buffer: 256,
            verify_accept: false,
        }
    }

    /// Parse a `ws://` or `wss://` URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] for other schemes, URLs without a host,
    /// or unparsable input.
    pub fn from_url(input: &str) -> Result<Self> {
        let url = Url::parse(input)?;
        let tls = match url.scheme() {
            "wss" => true,
            "ws" => false,
            other => {
                return Err(Error::InvalidUrl(format!(
                    "unsupported scheme {other}, expected ws or wss"
                )));
            }
        };
        // IPv6 literals are stored without brackets so they resolve as addresses.
        let host = match url.host() {
            Some(Host::Ipv6(addr)) => addr.to_string(),
            Some(host) => host.to_string(),
            None => return Err(Error::InvalidUrl(format!("{input} has no host"))),
        };
        let port = url
            .port_or_known_default()
            .unwrap_or(if tls { 443 } else { 80 });

        let mut endpoint = url.path().to_string();
        if endpoint.is_empty() {
            endpoint.push('/');
        }
        if let Some(query) = url.query() {
            endpoint.push('?');
            endpoint.push_str(query);
        }

        Ok(Self {
            port,
            endpoint,
            tls,
            ..Self::new(host)
        })
    }

    /// Rebuild the `ws://` / `wss://` URL these options point at.
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!(
            "{scheme}://{}:{}{}",
            self.authority_host(),
            self.port,
            self.endpoint
        )
    }

    /// Set the port. TLS follows the port (443 means TLS) until set explicitly.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self.tls = port == 443;
        self
    }

    /// Set the request target.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Offer a subprotocol.
    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Enable or disable TLS.
    #[must_use]
    pub const fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Set timeout configuration.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set custom limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Fragment outgoing messages larger than `size` bytes.
    #[must_use]
    pub const fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = Some(size);
        self
    }

    /// Set the incoming message channel capacity.
    #[must_use]
    pub const fn with_message_buffer(mut self, capacity: usize) -> Self {
        self.message_buffer = capacity;
        self
    }

    /// Check `Sec-WebSocket-Accept` against the sent key.
    #[must_use]
    pub const fn with_verify_accept(mut self, verify: bool) -> Self {
        self.verify_accept = verify;
        self
    }

    /// `Host` header value; the port is omitted when it is the scheme default.
    #[must_use]
    pub fn host_header(&self) -> String {
        let host = self.authority_host();
        if (self.tls && self.port == 443) || (!self.tls && self.port == 80) {
            host.into_owned()
        } else {
            format!("{host}:{}", self.port)
        }
    }

    /// The host as written in a URL authority: IPv6 addresses get brackets.
    fn authority_host(&self) -> Cow<'_, str> {
        if self.host.parse::<Ipv6Addr>().is_ok() {
            Cow::Owned(format!("[{}]", self.host))
        } else {
            Cow::Borrowed(&self.host)
        }
    }
}
