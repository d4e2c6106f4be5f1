//! WebSocket frame encoding and decoding (RFC 6455 Section 5.2).

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::protocol::OpCode;
use crate::protocol::mask::{MaskingKey, apply_mask};

/// Maximum payload size for control frames (RFC 6455).
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// Largest payload whose length fits in the 7-bit field.
const MAX_LITERAL_LEN: usize = 125;
const LEN_16_SENTINEL: u8 = 126;
const LEN_64_SENTINEL: u8 = 127;

/// The fixed part of a frame, everything before the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    pub opcode: OpCode,
    pub masking_key: MaskingKey,
    /// The raw 7-bit length field (0-125, or a 126/127 sentinel).
    pub length_field: u8,
    /// Resolved payload length.
    pub payload_len: usize,
    /// Bytes occupied by the header, including extended length and mask.
    pub header_len: usize,
}

impl FrameHeader {
    /// Parse a frame header from the start of `buf`.
    ///
    /// Only the structure is checked here; protocol rules that depend on the
    /// role of the endpoint live in [`FrameValidator`](crate::protocol::FrameValidator).
    ///
    /// # Errors
    ///
    /// - `Error::IncompleteFrame` if `buf` ends before the header does
    /// - `Error::ReservedOpcode` / `Error::InvalidOpcode` for unknown opcodes
    /// - `Error::PayloadTooLargeForPlatform` if the 64-bit length does not fit in `usize`
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 2 {
            return Err(Error::IncompleteFrame {
                needed: 2 - buf.len(),
            });
        }

        let byte0 = buf[0];
        let byte1 = buf[1];

        let fin = byte0 & 0x80 != 0;
        let rsv1 = byte0 & 0x40 != 0;
        let rsv2 = byte0 & 0x20 != 0;
        let rsv3 = byte0 & 0x10 != 0;
        let opcode = OpCode::from_u8(byte0 & 0x0F)?;

        let masked = byte1 & 0x80 != 0;
        let length_field = byte1 & 0x7F;

        let (payload_len, mut header_len) = match length_field {
            LEN_16_SENTINEL => {
                let ext = read_array::<2>(buf, 2)?;
                (u16::from_be_bytes(ext) as usize, 4)
            }
            LEN_64_SENTINEL => {
                let ext = read_array::<8>(buf, 2)?;
                let len = u64::from_be_bytes(ext);
                let len = usize::try_from(len).map_err(|_| Error::PayloadTooLargeForPlatform {
                    size: len,
                    max: usize::MAX as u64,
                })?;
                (len, 10)
            }
            literal => (literal as usize, 2),
        };

        let masking_key = if masked {
            let key = read_array::<4>(buf, header_len)?;
            header_len += 4;
            MaskingKey::FourByte(key)
        } else {
            MaskingKey::NoMasking
        };

        Ok(Self {
            fin,
            rsv1,
            rsv2,
            rsv3,
            opcode,
            masking_key,
            length_field,
            payload_len,
            header_len,
        })
    }

    /// Total bytes of the frame on the wire.
    ///
    /// # Errors
    ///
    /// Returns `Error::PayloadTooLargeForPlatform` if the sum overflows.
    pub fn frame_len(&self) -> Result<usize> {
        self.header_len
            .checked_add(self.payload_len)
            .ok_or(Error::PayloadTooLargeForPlatform {
                size: self.payload_len as u64,
                max: (usize::MAX - self.header_len) as u64,
            })
    }
}

fn read_array<const N: usize>(buf: &[u8], at: usize) -> Result<[u8; N]> {
    let end = at + N;
    if buf.len() < end {
        return Err(Error::IncompleteFrame {
            needed: end - buf.len(),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[at..end]);
    Ok(out)
}

/// The 7-bit length field for a payload of `len` bytes.
#[inline]
#[must_use]
pub const fn length_field_for(len: usize) -> u8 {
    if len <= MAX_LITERAL_LEN {
        len as u8
    } else if len <= u16::MAX as usize {
        LEN_16_SENTINEL
    } else {
        LEN_64_SENTINEL
    }
}

/// Extended length bytes that follow a given length field.
#[inline]
const fn extended_len_size(length_field: u8) -> usize {
    match length_field {
        LEN_16_SENTINEL => 2,
        LEN_64_SENTINEL => 8,
        _ => 0,
    }
}

/// A WebSocket frame as defined in RFC 6455.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
/// |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
/// |N|V|V|V|       |S|             |   (if payload len==126/127)   |
/// | |1|2|3|       |K|             |                               |
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |                 Masking key (if MASK set)                     |
/// +---------------------------------------------------------------+
/// |                     Payload data                              |
/// +---------------------------------------------------------------+
/// ```
///
/// `payload` always holds the unmasked bytes; masking happens while encoding
/// and is undone while parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag. True if this is the last fragment of a message.
    pub fin: bool,
    /// Reserved bit 1. Must be 0 unless extension is negotiated.
    pub rsv1: bool,
    /// Reserved bit 2. Must be 0 unless extension is negotiated.
    pub rsv2: bool,
    /// Reserved bit 3. Must be 0 unless extension is negotiated.
    pub rsv3: bool,
    /// Frame opcode defining the interpretation of payload data.
    pub opcode: OpCode,
    /// Key the payload is masked with on the wire.
    pub masking_key: MaskingKey,
    /// Unmasked payload.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create an unmasked frame with all reserved bits cleared.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            masking_key: MaskingKey::NoMasking,
            payload,
        }
    }

    /// Create a final text frame.
    #[must_use]
    pub fn text(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Text, data.into())
    }

    /// Create a final binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Binary, data.into())
    }

    /// Create a close frame with optional status code and reason.
    #[must_use]
    pub fn close(code: Option<u16>, reason: &str) -> Self {
        let payload = match code {
            Some(code) => {
                let mut data = code.to_be_bytes().to_vec();
                data.extend_from_slice(reason.as_bytes());
                data
            }
            None => Vec::new(),
        };
        Self::new(true, OpCode::Close, payload)
    }

    /// Create a ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Ping, data.into())
    }

    /// Create a pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Pong, data.into())
    }

    /// Set the masking key used when encoding.
    #[must_use]
    pub fn masked(mut self, key: MaskingKey) -> Self {
        self.masking_key = key;
        self
    }

    /// Borrow the payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take ownership of the payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// The 7-bit length field this frame encodes with.
    #[must_use]
    pub fn length_field(&self) -> u8 {
        length_field_for(self.payload.len())
    }

    /// Encoded size: 2 + extended length (0/2/8) + mask (0/4) + payload.
    #[must_use]
    pub fn wire_size(&self) -> usize {
        2 + extended_len_size(self.length_field())
            + self.masking_key.wire_len()
            + self.payload.len()
    }

    /// Parse one frame from the start of `buf`.
    ///
    /// Returns the frame and the number of bytes consumed. A masked frame is
    /// unmasked; its key is kept in `masking_key`.
    ///
    /// # Errors
    ///
    /// - `Error::IncompleteFrame` if not enough data is available
    /// - `Error::InvalidOpcode` / `Error::ReservedOpcode` for unknown opcodes
    /// - `Error::PayloadTooLargeForPlatform` for unaddressable lengths
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        let header = FrameHeader::parse(buf)?;
        Self::parse_with_header(&header, buf)
    }

    /// Parse the payload of a frame whose header was already parsed from `buf`.
    ///
    /// # Errors
    ///
    /// - `Error::IncompleteFrame` if the payload has not fully arrived
    pub fn parse_with_header(header: &FrameHeader, buf: &[u8]) -> Result<(Self, usize)> {
        let total = header.frame_len()?;
        if buf.len() < total {
            return Err(Error::IncompleteFrame {
                needed: total - buf.len(),
            });
        }

        let mut payload = buf[header.header_len..total].to_vec();
        if let Some(key) = header.masking_key.key() {
            apply_mask(&mut payload, key, 0);
        }

        let frame = Frame {
            fin: header.fin,
            rsv1: header.rsv1,
            rsv2: header.rsv2,
            rsv3: header.rsv3,
            opcode: header.opcode,
            masking_key: header.masking_key,
            payload,
        };
        Ok((frame, total))
    }

    /// Append the wire encoding of this frame to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(self.wire_size());

        let mut byte0 = self.opcode.as_u8();
        if self.fin {
            byte0 |= 0x80;
        }
        if self.rsv1 {
            byte0 |= 0x40;
        }
        if self.rsv2 {
            byte0 |= 0x20;
        }
        if self.rsv3 {
            byte0 |= 0x10;
        }
        buf.put_u8(byte0);

        let length_field = self.length_field();
        let mask_bit = if self.masking_key.key().is_some() { 0x80 } else { 0 };
        buf.put_u8(mask_bit | length_field);

        match length_field {
            LEN_16_SENTINEL => buf.put_u16(self.payload.len() as u16),
            LEN_64_SENTINEL => buf.put_u64(self.payload.len() as u64),
            _ => {}
        }

        match self.masking_key {
            MaskingKey::FourByte(key) => {
                buf.put_slice(&key);
                let start = buf.len();
                buf.put_slice(&self.payload);
                apply_mask(&mut buf[start..], key, 0);
            }
            MaskingKey::NoMasking => buf.put_slice(&self.payload),
        }
    }

    /// Encode this frame into a new buffer.
    #[must_use]
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        self.encode_into(&mut buf);
        buf
    }
}
