//! Error types for the WebSocket client.
//!
//! Every failure a connection can hit is one of these variants. Protocol
//! level failures know which close code the client answers with, see
//! [`Error::close_code`].

use thiserror::Error;

use crate::message::CloseCode;

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during WebSocket operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Invalid frame structure or header.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Protocol violation detected.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Invalid UTF-8 in a text message or close reason.
    #[error("Invalid UTF-8 in text frame")]
    InvalidUtf8,

    /// Frame size exceeds configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Message size exceeds configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Too many fragments in a single message.
    #[error("Too many fragments: {count} (max: {max})")]
    TooManyFragments {
        /// Actual fragment count.
        count: usize,
        /// Maximum allowed fragments.
        max: usize,
    },

    /// Declared payload length cannot be addressed on this platform.
    #[error("Payload of {size} bytes is unsupported (max: {max})")]
    PayloadTooLargeForPlatform {
        /// Declared payload length.
        size: u64,
        /// Largest addressable length.
        max: u64,
    },

    /// Connection has been closed.
    #[error("Connection closed: {0:?}")]
    ConnectionClosed(Option<u16>),

    /// Invalid WebSocket handshake.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Handshake response exceeded the configured size limit.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Bytes received so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// A header value would break the request framing.
    #[error("Invalid value for header {header}: {reason}")]
    InvalidHeaderValue {
        /// Header name.
        header: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// An operation did not finish within its configured timeout.
    #[error("Timed out during {0}")]
    Timeout(&'static str),

    /// Invalid close code.
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Control frame fragmented (RFC violation).
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload too large (>125 bytes).
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Masked server frame (security violation).
    #[error("Server frame must not be masked")]
    MaskedServerFrame,

    /// Reserved bits set without extension.
    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    /// Incomplete frame data.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// Invalid opcode value.
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    /// The connection URL could not be used.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// TLS setup or negotiation failed.
    #[error("TLS error: {0}")]
    Tls(String),
}

impl Error {
    /// The close code the client sends when this error ends a connection.
    ///
    /// Returns `None` for failures where no Close frame should be attempted
    /// (transport errors, timeouts, handshake failures).
    #[must_use]
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            Error::InvalidFrame(_)
            | Error::ProtocolViolation(_)
            | Error::InvalidCloseCode(_)
            | Error::ReservedOpcode(_)
            | Error::InvalidOpcode(_)
            | Error::FragmentedControlFrame
            | Error::ControlFrameTooLarge(_)
            | Error::MaskedServerFrame
            | Error::ReservedBitsSet => Some(CloseCode::ProtocolError),
            Error::InvalidUtf8 => Some(CloseCode::InvalidPayload),
            Error::FrameTooLarge { .. }
            | Error::MessageTooLarge { .. }
            | Error::TooManyFragments { .. }
            | Error::PayloadTooLargeForPlatform { .. } => Some(CloseCode::MessageTooBig),
            _ => None,
        }
    }

    /// Reason text sent alongside [`Error::close_code`].
    #[must_use]
    pub fn close_reason(&self) -> String {
        match self {
            Error::InvalidUtf8 => "Invalid UTF-8 Message".to_string(),
            Error::ReservedBitsSet => "Invalid RSV".to_string(),
            Error::ReservedOpcode(op) | Error::InvalidOpcode(op) => {
                format!("Invalid OpCode {op:#x}")
            }
            Error::ControlFrameTooLarge(_) => {
                "Control frames are only allowed to have payload up to and including 125 octets"
                    .to_string()
            }
            other => {
                // Close reasons are limited to 123 bytes.
                let mut text = other.to_string();
                if text.len() > 123 {
                    let mut end = 123;
                    while !text.is_char_boundary(end) {
                        end -= 1;
                    }
                    text.truncate(end);
                }
                text
            }
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::InvalidUrl(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::FrameTooLarge {
            size: 20_000_000,
            max: 16_000_000,
        };
        assert_eq!(
            err.to_string(),
            "Frame too large: 20000000 bytes (max: 16000000)"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let ws_err: Error = io_err.into();
        assert!(matches!(ws_err, Error::Io(_)));
        assert_eq!(ws_err.close_code(), None);
    }

    #[test]
    fn test_protocol_errors_close_with_1002() {
        for err in [
            Error::ReservedBitsSet,
            Error::ReservedOpcode(0x3),
            Error::MaskedServerFrame,
            Error::FragmentedControlFrame,
            Error::ControlFrameTooLarge(126),
            Error::InvalidCloseCode(1005),
            Error::ProtocolViolation("x".into()),
        ] {
            assert_eq!(err.close_code(), Some(CloseCode::ProtocolError), "{err}");
        }
    }

    #[test]
    fn test_utf8_error_closes_with_1007() {
        assert_eq!(Error::InvalidUtf8.close_code(), Some(CloseCode::InvalidPayload));
        assert_eq!(Error::InvalidUtf8.close_reason(), "Invalid UTF-8 Message");
    }

    #[test]
    fn test_close_reason_fits_control_frame() {
        let err = Error::ProtocolViolation("x".repeat(300));
        assert!(err.close_reason().len() <= 123);
    }

    #[test]
    fn test_error_clone() {
        let err = Error::Timeout("handshake");
        let cloned = err.clone();
        assert_eq!(err, cloned);
    }
}
