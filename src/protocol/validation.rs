//! Validation of frames received from a server (RFC 6455).
//!
//! Checks run on the header alone, before the payload is buffered:
//! - RSV bits (Section 5.2)
//! - Control frame fragmentation and size (Section 5.5)
//! - Masking rules (Section 5.1)
//! - Configured frame size limit

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::protocol::frame::{FrameHeader, MAX_CONTROL_FRAME_PAYLOAD};

/// Validator for incoming WebSocket frames on the client side.
#[derive(Debug, Clone)]
pub struct FrameValidator {
    limits: Limits,
}

impl FrameValidator {
    /// Create a new frame validator.
    #[must_use]
    pub fn new(limits: Limits) -> Self {
        Self { limits }
    }

    /// Validate an incoming frame header.
    ///
    /// # Errors
    ///
    /// - `Error::ReservedBitsSet` - RSV bits set without negotiated extension
    /// - `Error::FragmentedControlFrame` - control frame without FIN
    /// - `Error::MaskedServerFrame` - server frames must not be masked
    /// - `Error::ControlFrameTooLarge` - control frame with an extended length
    /// - `Error::FrameTooLarge` - frame exceeds size limit
    pub fn validate_incoming(&self, header: &FrameHeader) -> Result<()> {
        validate_rsv_bits(header.rsv1, header.rsv2, header.rsv3)?;

        if header.opcode.is_control() && !header.fin {
            return Err(Error::FragmentedControlFrame);
        }

        if header.masking_key.key().is_some() {
            return Err(Error::MaskedServerFrame);
        }

        if header.opcode.is_control()
            && (header.length_field as usize > MAX_CONTROL_FRAME_PAYLOAD
                || header.payload_len > MAX_CONTROL_FRAME_PAYLOAD)
        {
            return Err(Error::ControlFrameTooLarge(header.payload_len));
        }

        self.limits.check_frame_size(header.payload_len)
    }
}

/// RSV bits MUST be 0 unless an extension defines them, and none is negotiated.
fn validate_rsv_bits(rsv1: bool, rsv2: bool, rsv3: bool) -> Result<()> {
    if rsv1 || rsv2 || rsv3 {
        return Err(Error::ReservedBitsSet);
    }
    Ok(())
}
