//! Message fragmentation for outgoing WebSocket messages (RFC 6455).

use crate::protocol::{Frame, OpCode};

/// Iterator that splits a data message into frames.
///
/// The first frame carries the message opcode and every later frame is a
/// `Continuation`; only the last one has FIN set. Without a fragment size,
/// or when the payload fits, the payload is moved into a single frame.
pub struct MessageFragmenter {
    payload: Vec<u8>,
    opcode: OpCode,
    fragment_size: usize,
    offset: usize,
    done: bool,
}

impl MessageFragmenter {
    /// Create a new fragmenter for the given payload.
    #[must_use]
    pub fn new(payload: Vec<u8>, opcode: OpCode, fragment_size: Option<usize>) -> Self {
        Self {
            payload,
            opcode,
            fragment_size: fragment_size.unwrap_or(usize::MAX).max(1),
            offset: 0,
            done: false,
        }
    }

    /// Check if fragmentation is needed (payload exceeds fragment_size).
    #[inline]
    #[must_use]
    pub fn needs_fragmentation(&self) -> bool {
        self.payload.len() > self.fragment_size
    }

    /// Get remaining bytes to send.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.payload.len().saturating_sub(self.offset)
    }
}

impl Iterator for MessageFragmenter {
    type Item = Frame;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if self.offset == 0 && !self.needs_fragmentation() {
            self.done = true;
            self.offset = self.payload.len();
            return Some(Frame::new(true, self.opcode, std::mem::take(&mut self.payload)));
        }

        let end = self.payload.len().min(self.offset + self.fragment_size);
        let chunk = self.payload[self.offset..end].to_vec();
        let opcode = if self.offset == 0 {
            self.opcode
        } else {
            OpCode::Continuation
        };
        self.offset = end;
        self.done = end == self.payload.len();

        Some(Frame::new(self.done, opcode, chunk))
    }
}
