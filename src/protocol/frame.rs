//! Frame header decoding and frame encoding (RFC 6455 Section 5.2).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                 Masking key (if MASK is set)                  |
//! +---------------------------------------------------------------+
//! |                          Payload data                         |
//! +---------------------------------------------------------------+
//! ```
//!
//! Decoding is split in two steps. [`HeaderPrefix`] only needs the first two
//! octets, which is enough for the connection to run its role-dependent
//! checks as early as possible. [`decode_header`] then waits for the full
//! header. Neither step consumes input: both are pure functions of the bytes
//! buffered so far and can be re-run after more data arrives.

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::protocol::mask::apply_mask_fast;
use crate::protocol::opcode;

/// Maximum payload size for control frames.
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// Largest payload length a frame may announce (2^63 - 1).
pub const MAX_PAYLOAD_LENGTH: u64 = 0x7FFF_FFFF_FFFF_FFFF;

/// The first two octets of a frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderPrefix {
    /// FIN bit.
    pub fin: bool,
    /// RSV1-3 as a 3-bit value (RSV1 is `4`).
    pub rsv: u8,
    /// Raw opcode nibble.
    pub opcode: u8,
    /// MASK bit.
    pub masked: bool,
    /// The 7-bit length field (126 and 127 announce extended lengths).
    pub len7: u8,
}

impl HeaderPrefix {
    /// Read the prefix, or `None` if fewer than two octets are buffered.
    #[must_use]
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let (&b0, &b1) = (buf.first()?, buf.get(1)?);
        Some(Self {
            fin: b0 & 0x80 != 0,
            rsv: (b0 & 0x70) >> 4,
            opcode: b0 & 0x0f,
            masked: b1 & 0x80 != 0,
            len7: b1 & 0x7f,
        })
    }

    /// `true` for opcodes 8..=15.
    #[must_use]
    pub const fn is_control(&self) -> bool {
        opcode::is_control(self.opcode)
    }

    /// Total header size implied by this prefix, mask key included.
    #[must_use]
    pub const fn header_len(&self) -> usize {
        let ext = match self.len7 {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        2 + ext + if self.masked { 4 } else { 0 }
    }
}

/// A fully decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Raw opcode nibble.
    pub opcode: u8,
    /// FIN bit.
    pub fin: bool,
    /// RSV1-3 as a 3-bit value.
    pub rsv: u8,
    /// Announced payload length.
    pub length: u64,
    /// Masking key, if the MASK bit was set.
    pub mask: Option<[u8; 4]>,
}

impl FrameHeader {
    /// Build a header for an outgoing frame.
    #[must_use]
    pub const fn new(opcode: u8, fin: bool, rsv: u8, length: u64, mask: Option<[u8; 4]>) -> Self {
        Self {
            opcode,
            fin,
            rsv,
            length,
            mask,
        }
    }

    /// `true` for opcodes 8..=15.
    #[must_use]
    pub const fn is_control(&self) -> bool {
        opcode::is_control(self.opcode)
    }

    /// Number of octets [`encode`](Self::encode) writes.
    #[must_use]
    pub const fn encoded_len(&self) -> usize {
        let ext = if self.length < 126 {
            0
        } else if self.length < 0x1_0000 {
            2
        } else {
            8
        };
        2 + ext + if self.mask.is_some() { 4 } else { 0 }
    }

    /// Append the header, using the shortest length encoding.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u8(((self.fin as u8) << 7) | ((self.rsv % 8) << 4) | (self.opcode & 0x0f));

        let mask_bit = if self.mask.is_some() { 0x80 } else { 0 };
        if self.length < 126 {
            dst.put_u8(mask_bit | self.length as u8);
        } else if self.length < 0x1_0000 {
            dst.put_u8(mask_bit | 126);
            dst.put_u16(self.length as u16);
        } else {
            dst.put_u8(mask_bit | 127);
            dst.put_u64(self.length);
        }

        if let Some(mask) = self.mask {
            dst.put_slice(&mask);
        }
    }
}

/// Decode a complete header from the start of `buf`.
///
/// Returns the header and its size, or `None` when more data is needed.
/// No validation beyond the wire layout is performed; see
/// [`length_violation`] for the minimal-encoding checks.
#[must_use]
pub fn decode_header(buf: &[u8]) -> Option<(FrameHeader, usize)> {
    let prefix = HeaderPrefix::parse(buf)?;
    let header_len = prefix.header_len();
    if buf.len() < header_len {
        return None;
    }

    let (length, mut offset) = match prefix.len7 {
        126 => (u64::from(u16::from_be_bytes([buf[2], buf[3]])), 4),
        127 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[2..10]);
            (u64::from_be_bytes(raw), 10)
        }
        n => (u64::from(n), 2),
    };

    let mask = if prefix.masked {
        let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
        offset += 4;
        Some(key)
    } else {
        None
    };
    debug_assert_eq!(offset, header_len);

    Some((
        FrameHeader {
            opcode: prefix.opcode,
            fin: prefix.fin,
            rsv: prefix.rsv,
            length,
            mask,
        },
        header_len,
    ))
}

/// Check that an extended length uses the minimal encoding and stays
/// within 2^63 - 1. Returns the violation reason, if any.
#[must_use]
pub const fn length_violation(len7: u8, length: u64) -> Option<&'static str> {
    match len7 {
        126 if length < 126 => {
            Some("invalid data frame length (not using minimal length encoding)")
        }
        127 if length > MAX_PAYLOAD_LENGTH => Some("invalid data frame length (>2^63)"),
        127 if length < 0x1_0000 => {
            Some("invalid data frame length (not using minimal length encoding)")
        }
        _ => None,
    }
}

/// Encode a whole frame: header, then the payload masked with `mask`.
#[must_use]
pub fn encode_frame(opcode: u8, payload: &[u8], fin: bool, rsv: u8, mask: Option<[u8; 4]>) -> BytesMut {
    let header = FrameHeader::new(opcode, fin, rsv, payload.len() as u64, mask);
    let mut out = BytesMut::with_capacity(header.encoded_len() + payload.len());
    header.encode(&mut out);
    let start = out.len();
    out.put_slice(payload);
    if let Some(mask) = mask {
        apply_mask_fast(&mut out[start..], mask);
    }
    out
}

/// A complete, unmasked frame.
///
/// The connection itself streams payloads and never materializes this type;
/// it exists for tooling and tests that handle whole frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw opcode nibble.
    pub opcode: u8,
    /// FIN bit.
    pub fin: bool,
    /// RSV1-3 as a 3-bit value.
    pub rsv: u8,
    /// Unmasked payload.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a frame.
    #[must_use]
    pub fn new(opcode: u8, fin: bool, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode,
            fin,
            rsv: 0,
            payload: payload.into(),
        }
    }

    /// Set the RSV bits.
    #[must_use]
    pub fn with_rsv(mut self, rsv: u8) -> Self {
        self.rsv = rsv;
        self
    }

    /// Parse one complete frame, unmasking its payload.
    ///
    /// Returns `Ok(None)` while the frame is incomplete.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] for a non-minimal or oversized
    /// length encoding, and [`Error::FrameTooLarge`] if the payload cannot be
    /// addressed on this platform.
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        let Some((header, header_len)) = decode_header(buf) else {
            return Ok(None);
        };
        if let Some(prefix) = HeaderPrefix::parse(buf) {
            if let Some(reason) = length_violation(prefix.len7, header.length) {
                return Err(Error::ProtocolViolation(reason.to_string()));
            }
        }

        let length = usize::try_from(header.length).map_err(|_| Error::FrameTooLarge {
            size: usize::MAX,
            max: usize::MAX - header_len,
        })?;
        let total = header_len.checked_add(length).ok_or(Error::FrameTooLarge {
            size: length,
            max: usize::MAX - header_len,
        })?;
        if buf.len() < total {
            return Ok(None);
        }

        let mut payload = buf[header_len..total].to_vec();
        if let Some(mask) = header.mask {
            apply_mask_fast(&mut payload, mask);
        }
        Ok(Some((
            Self {
                opcode: header.opcode,
                fin: header.fin,
                rsv: header.rsv,
                payload,
            },
            total,
        )))
    }

    /// Encode the frame, masking the payload when `mask` is given.
    #[must_use]
    pub fn encode(&self, mask: Option<[u8; 4]>) -> BytesMut {
        encode_frame(self.opcode, &self.payload, self.fin, self.rsv, mask)
    }

    /// Size of the encoded frame.
    #[must_use]
    pub fn wire_size(&self, masked: bool) -> usize {
        let header = FrameHeader::new(
            self.opcode,
            self.fin,
            self.rsv,
            self.payload.len() as u64,
            masked.then_some([0; 4]),
        );
        header.encoded_len() + self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --------------------------------------------------------------------------
    // Test 1: Unmasked text frame
    // --------------------------------------------------------------------------
    #[test]
    fn test_parse_unmasked_text_frame() {
        let data = [0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f];
        let (frame, len) = Frame::parse(&data).unwrap().unwrap();
        assert_eq!(len, 7);
        assert!(frame.fin);
        assert_eq!(frame.rsv, 0);
        assert_eq!(frame.opcode, 0x1);
        assert_eq!(frame.payload, b"Hello");
    }

    // --------------------------------------------------------------------------
    // Test 2: Masked text frame (RFC 6455 Section 5.7)
    // --------------------------------------------------------------------------
    #[test]
    fn test_parse_masked_text_frame() {
        let data = [
            0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
        ];
        let (header, header_len) = decode_header(&data).unwrap();
        assert_eq!(header_len, 6);
        assert_eq!(header.mask, Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(header.length, 5);

        let (frame, len) = Frame::parse(&data).unwrap().unwrap();
        assert_eq!(len, 11);
        assert_eq!(frame.payload, b"Hello");
    }

    // --------------------------------------------------------------------------
    // Test 3: Prefix fields
    // --------------------------------------------------------------------------
    #[test]
    fn test_prefix_fields() {
        let prefix = HeaderPrefix::parse(&[0x4a, 0xfe]).unwrap();
        assert!(!prefix.fin);
        assert_eq!(prefix.rsv, 4);
        assert_eq!(prefix.opcode, 0xa);
        assert!(prefix.masked);
        assert_eq!(prefix.len7, 126);
        assert!(prefix.is_control());
        assert_eq!(prefix.header_len(), 8);

        assert!(HeaderPrefix::parse(&[0x81]).is_none());
    }

    // --------------------------------------------------------------------------
    // Test 4: Extended lengths
    // --------------------------------------------------------------------------
    #[test]
    fn test_decode_extended_length_126() {
        let mut data = vec![0x82, 126, 0x01, 0x00];
        data.extend(vec![0u8; 256]);
        let (header, header_len) = decode_header(&data).unwrap();
        assert_eq!(header.length, 256);
        assert_eq!(header_len, 4);
    }

    #[test]
    fn test_decode_extended_length_127() {
        let data = [0x82, 127, 0, 0, 0, 0, 0, 1, 0, 0];
        let (header, header_len) = decode_header(&data).unwrap();
        assert_eq!(header.length, 65536);
        assert_eq!(header_len, 10);
    }

    // --------------------------------------------------------------------------
    // Test 5: Incomplete headers never decode
    // --------------------------------------------------------------------------
    #[test]
    fn test_decode_incomplete_header() {
        assert!(decode_header(&[]).is_none());
        assert!(decode_header(&[0x81]).is_none());
        assert!(decode_header(&[0x82, 126, 0x01]).is_none());
        assert!(decode_header(&[0x82, 127, 0, 0, 0, 0, 0, 1, 0]).is_none());
        assert!(decode_header(&[0x81, 0x85, 0x37, 0xfa, 0x21]).is_none());
    }

    #[test]
    fn test_parse_incomplete_payload() {
        let data = [0x81, 0x05, b'H', b'e'];
        assert!(Frame::parse(&data).unwrap().is_none());
    }

    // --------------------------------------------------------------------------
    // Test 6: Minimal length encoding
    // --------------------------------------------------------------------------
    #[test]
    fn test_length_violation() {
        assert!(length_violation(126, 125).is_some());
        assert!(length_violation(126, 126).is_none());
        assert!(length_violation(127, 65535).is_some());
        assert!(length_violation(127, 65536).is_none());
        assert_eq!(
            length_violation(127, u64::MAX),
            Some("invalid data frame length (>2^63)")
        );
        assert!(length_violation(5, 5).is_none());
    }

    #[test]
    fn test_parse_rejects_non_minimal() {
        let data = [0x82, 126, 0x00, 0x05, 1, 2, 3, 4, 5];
        assert!(matches!(
            Frame::parse(&data),
            Err(Error::ProtocolViolation(_))
        ));
    }

    // --------------------------------------------------------------------------
    // Test 7: Encoding picks the shortest length form
    // --------------------------------------------------------------------------
    #[test]
    fn test_encode_length_tiers() {
        for (len, header_len) in [(0, 2), (125, 2), (126, 4), (65535, 4), (65536, 10)] {
            let payload = vec![0u8; len];
            let out = encode_frame(0x2, &payload, true, 0, None);
            assert_eq!(out.len(), header_len + len, "payload length {len}");
        }
    }

    #[test]
    fn test_encode_masked_hello() {
        let out = encode_frame(0x1, b"Hello", true, 0, Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(
            &out[..],
            &[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );
    }

    #[test]
    fn test_encode_first_byte() {
        let out = encode_frame(0x0, b"", false, 4, None);
        assert_eq!(&out[..], &[0x40, 0x00]);

        // RSV wraps into 3 bits.
        let out = encode_frame(0x9, b"", true, 9, None);
        assert_eq!(out[0], 0x80 | 0x10 | 0x09);
    }

    // --------------------------------------------------------------------------
    // Test 8: Round trips
    // --------------------------------------------------------------------------
    #[test]
    fn test_roundtrip_masked() {
        let frame = Frame::new(0x2, false, vec![7u8; 300]).with_rsv(4);
        let wire = frame.encode(Some([1, 2, 3, 4]));
        assert_eq!(wire.len(), frame.wire_size(true));
        let (parsed, consumed) = Frame::parse(&wire).unwrap().unwrap();
        assert_eq!(consumed, wire.len());
        assert_eq!(parsed, frame);
    }

    #[test]
    fn test_parse_two_frames_back_to_back() {
        let mut wire = encode_frame(0x1, b"one", true, 0, None);
        wire.extend_from_slice(&encode_frame(0x9, b"two", true, 0, None));
        let (first, used) = Frame::parse(&wire).unwrap().unwrap();
        let (second, _) = Frame::parse(&wire[used..]).unwrap().unwrap();
        assert_eq!(first.payload, b"one");
        assert_eq!(second.opcode, 0x9);
    }

    #[test]
    fn test_header_encoded_len_matches_encode() {
        let header = FrameHeader::new(0x1, true, 0, 70_000, Some([9, 9, 9, 9]));
        let mut out = BytesMut::new();
        header.encode(&mut out);
        assert_eq!(out.len(), header.encoded_len());
        assert_eq!(out.len(), 14);
        assert!(!header.is_control());
    }
}
