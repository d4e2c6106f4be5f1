//! WebSocket protocol core implementation (RFC 6455).
//!
//! Everything in here is transport-agnostic: it works on byte slices and
//! buffers and never performs I/O.

pub mod assembler;
pub mod close;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;
pub mod validation;

pub use assembler::{AssembledMessage, MessageAssembler};
pub use close::{PeerClose, close_payload};
pub use frame::{Frame, FrameHeader};
pub use handshake::{HandshakeRequest, HandshakeResponse, WS_GUID, compute_accept_key};
pub use mask::{MaskingKey, apply_mask};
pub use opcode::OpCode;
pub use validation::FrameValidator;
