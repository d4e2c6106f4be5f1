//! Reassembly of fragmented WebSocket messages (RFC 6455 Section 5.4).

use bytes::BytesMut;

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::message::WebSocketMessage;
use crate::protocol::{Frame, OpCode};

/// Reassembles fragmented WebSocket messages.
///
/// Control frames may arrive between fragments; they are not part of the
/// message and are ignored here, so the connection can handle them inline
/// without disturbing the partial message.
pub struct MessageAssembler {
    buffer: BytesMut,
    fragment_count: usize,
    opcode: Option<OpCode>,
    limits: Limits,
}

impl MessageAssembler {
    pub fn new(limits: Limits) -> Self {
        Self {
            buffer: BytesMut::new(),
            fragment_count: 0,
            opcode: None,
            limits,
        }
    }

    /// Add a frame to the message being assembled.
    /// Returns Some(complete_message) when FIN=1, None otherwise.
    ///
    /// # Errors
    ///
    /// - `Error::ProtocolViolation` for a continuation with nothing to
    ///   continue, or a new data frame while a message is still open
    /// - `Error::MessageTooLarge` / `Error::TooManyFragments` past the limits
    pub fn push(&mut self, frame: Frame) -> Result<Option<AssembledMessage>> {
        if frame.opcode.is_control() {
            return Ok(None);
        }

        let opcode = match (frame.opcode, self.opcode) {
            (OpCode::Continuation, Some(started)) => started,
            (OpCode::Continuation, None) => {
                return Err(Error::ProtocolViolation(
                    "Unexpected continuation frame".into(),
                ));
            }
            (_, Some(_)) => {
                return Err(Error::ProtocolViolation(
                    "Expected continuation frame".into(),
                ));
            }
            (first, None) => first,
        };

        self.limits.check_fragment_count(self.fragment_count + 1)?;
        let new_size = self.buffer.len() + frame.payload().len();
        self.limits.check_message_size(new_size)?;

        // Unfragmented messages skip the buffer.
        if frame.fin && self.opcode.is_none() {
            return Ok(Some(AssembledMessage {
                opcode,
                payload: frame.into_payload(),
            }));
        }

        self.opcode = Some(opcode);
        self.buffer.extend_from_slice(frame.payload());
        self.fragment_count += 1;

        if frame.fin {
            let payload = self.buffer.split().to_vec();
            self.reset();
            Ok(Some(AssembledMessage { opcode, payload }))
        } else {
            Ok(None)
        }
    }

    /// Whether a fragmented message is in progress.
    pub fn is_assembling(&self) -> bool {
        self.opcode.is_some()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.fragment_count = 0;
        self.opcode = None;
    }
}

/// A fully assembled WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledMessage {
    /// Text or Binary, taken from the first fragment.
    pub opcode: OpCode,
    pub payload: Vec<u8>,
}

impl AssembledMessage {
    /// # Errors
    /// Returns `Error::InvalidUtf8` if the payload is not UTF-8.
    pub fn into_text(self) -> Result<String> {
        String::from_utf8(self.payload).map_err(|_| Error::InvalidUtf8)
    }

    pub fn into_binary(self) -> Vec<u8> {
        self.payload
    }

    /// Decode into the application message, validating UTF-8 for text.
    ///
    /// # Errors
    /// Returns `Error::InvalidUtf8` for a text message that is not UTF-8.
    pub fn into_message(self) -> Result<WebSocketMessage> {
        match self.opcode {
            OpCode::Text => self.into_text().map(WebSocketMessage::Text),
            _ => Ok(WebSocketMessage::Binary(self.payload)),
        }
    }
}
