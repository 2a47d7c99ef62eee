//! Pre-framed messages for broadcasting the same payload to many peers.

use bytes::Bytes;

use crate::protocol::frame::encode_frame;
use crate::protocol::mask::random_mask;
use crate::protocol::opcode::OpCode;

/// A message framed once and sent on any number of connections.
///
/// The frame is a single unfragmented data frame. Connections with a
/// negotiated compression extension cannot reuse the framed bytes and
/// re-send the original payload through the regular path instead, unless
/// the message was marked `do_not_compress`.
#[derive(Debug, Clone)]
pub struct PreparedMessage {
    payload: Bytes,
    is_binary: bool,
    do_not_compress: bool,
    framed: Bytes,
}

impl PreparedMessage {
    /// Frame `payload`, masking it with a fresh random key if `apply_mask`
    /// is set (as required for client-to-server messages).
    #[must_use]
    pub fn new(
        payload: impl Into<Bytes>,
        is_binary: bool,
        apply_mask: bool,
        do_not_compress: bool,
    ) -> Self {
        let payload = payload.into();
        let mask = apply_mask.then(random_mask);
        let framed = encode_frame(
            OpCode::for_message(is_binary).as_u8(),
            &payload,
            true,
            0,
            mask,
        )
        .freeze();
        Self {
            payload,
            is_binary,
            do_not_compress,
            framed,
        }
    }

    /// The unframed payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The complete encoded frame.
    #[must_use]
    pub fn framed(&self) -> &[u8] {
        &self.framed
    }

    /// `true` for binary messages.
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        self.is_binary
    }

    /// `true` if the message must never be compressed.
    #[must_use]
    pub const fn do_not_compress(&self) -> bool {
        self.do_not_compress
    }
}
