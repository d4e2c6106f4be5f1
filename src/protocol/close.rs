//! Close frame payloads (RFC 6455 Sections 5.5.1 and 7.4).

use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseFrame};
use crate::protocol::frame::MAX_CONTROL_FRAME_PAYLOAD;

/// Longest reason that fits in a Close frame next to the two code bytes.
pub const MAX_CLOSE_REASON: usize = MAX_CONTROL_FRAME_PAYLOAD - 2;

/// Outcome of validating a Close frame received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerClose {
    /// What the application is told the peer sent.
    pub received: CloseFrame,
    /// The Close frame the client answers with.
    pub reply: CloseFrame,
    /// Whether the peer's payload broke the protocol.
    pub violation: bool,
}

impl PeerClose {
    /// Validate a peer Close payload and decide the reply.
    ///
    /// - empty: reported as 1005, answered with a bare 1000
    /// - one byte: answered with 1002
    /// - a code outside 1000-1003, 1007-1015, 3000-4999: answered with 1002
    /// - a reason that is not UTF-8: answered with 1002
    /// - otherwise the code and reason are echoed back
    #[must_use]
    pub fn parse(payload: &[u8]) -> Self {
        match payload {
            [] => Self {
                received: CloseFrame::new(CloseCode::NoStatusReceived, ""),
                reply: CloseFrame::new(CloseCode::Normal, ""),
                violation: false,
            },
            [_] => Self::violation(format!(
                "Invalid close payload length ({})",
                payload.len()
            )),
            [hi, lo, reason @ ..] => {
                let code = CloseCode::from_u16(u16::from_be_bytes([*hi, *lo]));
                if !code.is_valid() {
                    return Self::violation(format!("Invalid Server close code {code}"));
                }
                match std::str::from_utf8(reason) {
                    Ok(reason) => {
                        let frame = CloseFrame::new(code, reason);
                        Self {
                            received: frame.clone(),
                            reply: frame,
                            violation: false,
                        }
                    }
                    Err(_) => Self::violation("Invalid UTF-8 Message in payload".to_string()),
                }
            }
        }
    }

    fn violation(reason: String) -> Self {
        let frame = CloseFrame::new(CloseCode::ProtocolError, reason);
        Self {
            received: frame.clone(),
            reply: frame,
            violation: true,
        }
    }
}

/// Build the payload of a Close frame the client initiates.
///
/// The reason is cut to [`MAX_CLOSE_REASON`] bytes on a character boundary.
///
/// # Errors
///
/// Returns `Error::InvalidCloseCode` for codes an endpoint must not send
/// (1004-1006, and anything outside the valid ranges).
pub fn close_payload(code: CloseCode, reason: &str) -> Result<Vec<u8>> {
    if code.is_reserved() || !code.is_valid() {
        return Err(Error::InvalidCloseCode(code.as_u16()));
    }
    let mut end = reason.len().min(MAX_CLOSE_REASON);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    Ok(CloseFrame::new(code, &reason[..end]).to_payload())
}
