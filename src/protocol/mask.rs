//! Payload masking (RFC 6455 Section 5.3).
//!
//! [`apply_mask`] and [`apply_mask_fast`] mask a complete buffer in one go.
//! [`XorMasker`] is the streaming form used by the frame parser: it keeps a
//! position so that a payload arriving in arbitrary chunks is unmasked as if
//! it had arrived whole.

/// Payloads shorter than this use the byte-loop strategy; longer ones use the
/// rotated-mask table.
pub const SHIFTED_MASK_THRESHOLD: u64 = 128;

/// Byte-by-byte XOR masking.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Word-at-a-time XOR masking.
///
/// Produces exactly the same output as [`apply_mask`].
#[inline]
pub fn apply_mask_fast(data: &mut [u8], mask: [u8; 4]) {
    let mask_u32 = u32::from_ne_bytes(mask);
    let mut chunks = data.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let val = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        chunk.copy_from_slice(&(val ^ mask_u32).to_ne_bytes());
    }
    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= mask[i];
    }
}

/// Generate a fresh masking key.
///
/// Falls back to a clock-derived key if the OS RNG is unavailable; masking
/// keys only need to be unpredictable to script running in a browser.
pub fn random_mask() -> [u8; 4] {
    let mut buf = [0u8; 4];
    if getrandom::getrandom(&mut buf).is_err() {
        use std::time::{SystemTime, UNIX_EPOCH};
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0x1234_5678);
        buf = nanos.wrapping_mul(0x9E37_79B9).to_le_bytes();
    }
    buf
}

/// Streaming XOR masker.
///
/// Every variant tracks how many payload octets it has processed; the frame
/// parser relies on [`pointer`](Self::pointer) to know when a frame's payload
/// is complete, including for unmasked frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XorMasker {
    /// Leaves data untouched.
    Null {
        /// Octets processed so far.
        pointer: u64,
    },
    /// Looks up `mask[position % 4]` for every byte.
    Simple {
        /// Masking key.
        mask: [u8; 4],
        /// Octets processed so far.
        pointer: u64,
    },
    /// Picks one of four pre-rotated keys per chunk and masks word-wise.
    Shifted {
        /// `rotations[k]` is the key rotated left by `k` bytes.
        rotations: [[u8; 4]; 4],
        /// Octets processed so far.
        pointer: u64,
    },
}

impl XorMasker {
    /// A masker that only counts octets.
    #[must_use]
    pub const fn null() -> Self {
        XorMasker::Null { pointer: 0 }
    }

    /// A byte-loop masker for `mask`.
    #[must_use]
    pub const fn simple(mask: [u8; 4]) -> Self {
        XorMasker::Simple { mask, pointer: 0 }
    }

    /// A rotated-table masker for `mask`.
    #[must_use]
    pub const fn shifted(mask: [u8; 4]) -> Self {
        let mut rotations = [[0u8; 4]; 4];
        let mut k = 0;
        while k < 4 {
            let mut j = 0;
            while j < 4 {
                rotations[k][j] = mask[(j + k) & 3];
                j += 1;
            }
            k += 1;
        }
        XorMasker::Shifted {
            rotations,
            pointer: 0,
        }
    }

    /// Pick a strategy for a payload of `length` octets.
    #[must_use]
    pub const fn for_payload(mask: [u8; 4], length: u64) -> Self {
        if length < SHIFTED_MASK_THRESHOLD {
            Self::simple(mask)
        } else {
            Self::shifted(mask)
        }
    }

    /// Octets processed since creation or the last reset.
    #[must_use]
    pub const fn pointer(&self) -> u64 {
        match self {
            XorMasker::Null { pointer }
            | XorMasker::Simple { pointer, .. }
            | XorMasker::Shifted { pointer, .. } => *pointer,
        }
    }

    /// `true` for the pass-through variant.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, XorMasker::Null { .. })
    }

    /// Restart at position zero.
    pub fn reset(&mut self) {
        match self {
            XorMasker::Null { pointer }
            | XorMasker::Simple { pointer, .. }
            | XorMasker::Shifted { pointer, .. } => *pointer = 0,
        }
    }

    /// Mask or unmask `data` in place and advance the position.
    pub fn process(&mut self, data: &mut [u8]) {
        match self {
            XorMasker::Null { pointer } => {
                *pointer += data.len() as u64;
            }
            XorMasker::Simple { mask, pointer } => {
                for byte in data.iter_mut() {
                    *byte ^= mask[(*pointer & 3) as usize];
                    *pointer += 1;
                }
            }
            XorMasker::Shifted { rotations, pointer } => {
                let key = rotations[(*pointer & 3) as usize];
                apply_mask_fast(data, key);
                *pointer += data.len() as u64;
            }
        }
    }
}
