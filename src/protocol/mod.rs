//! WebSocket wire protocol primitives (RFC 6455).

pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;
pub mod prepared;
pub mod utf8;
pub mod validation;

pub use frame::{Frame, FrameHeader, HeaderPrefix, MAX_CONTROL_FRAME_PAYLOAD};
pub use handshake::{
    Accept, ConnectingRequest, ConnectionRequest, ConnectionResponse, Deny, HttpHeaders, WS_GUID,
    compute_accept_key,
};
pub use mask::{XorMasker, apply_mask, apply_mask_fast};
pub use opcode::OpCode;
pub use prepared::PreparedMessage;
pub use utf8::{Utf8Status, Utf8Validator, is_valid_utf8};
pub use validation::FrameValidator;
