//! Incremental UTF-8 validation for text messages (RFC 6455 Section 8.1).
//!
//! Text payloads may be split across frames and across reads at arbitrary
//! byte positions, so validation has to carry state between chunks. The
//! validator is a table-driven DFA (Bjoern Hoehrmann's decoder) that looks
//! at one octet at a time and never needs to buffer partial code points.

/// DFA state when the input consumed so far ends on a code point boundary.
pub const UTF8_ACCEPT: u8 = 0;

/// Sink state: the input consumed so far can never become valid UTF-8.
pub const UTF8_REJECT: u8 = 1;

/// Byte classes (first 256 entries) followed by the transition table,
/// indexed as `256 + state * 16 + class`.
#[rustfmt::skip]
static UTF8_DFA: [u8; 400] = [
    0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0, // 00..1f
    0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0, // 20..3f
    0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0, // 40..5f
    0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0, // 60..7f
    1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,9,9,9,9,9,9,9,9,9,9,9,9,9,9,9,9, // 80..9f
    7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7,7, // a0..bf
    8,8,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2,2, // c0..df
    0xa,0x3,0x3,0x3,0x3,0x3,0x3,0x3,0x3,0x3,0x3,0x3,0x3,0x4,0x3,0x3, // e0..ef
    0xb,0x6,0x6,0x6,0x5,0x8,0x8,0x8,0x8,0x8,0x8,0x8,0x8,0x8,0x8,0x8, // f0..ff
    0x0,0x1,0x2,0x3,0x5,0x8,0x7,0x1,0x1,0x1,0x4,0x6,0x1,0x1,0x1,0x1, // s0
    1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,0,1,1,1,1,1,0,1,0,1,1,1,1,1,1, // s1..s2
    1,2,1,1,1,1,1,2,1,2,1,1,1,1,1,1,1,1,1,1,1,1,1,2,1,1,1,1,1,1,1,1, // s3..s4
    1,2,1,1,1,1,1,1,1,2,1,1,1,1,1,1,1,1,1,1,1,1,1,3,1,3,1,1,1,1,1,1, // s5..s6
    1,3,1,1,1,1,1,3,1,3,1,1,1,1,1,1,1,3,1,1,1,1,1,1,1,1,1,1,1,1,1,1, // s7..s8
];

/// Outcome of feeding one chunk to a [`Utf8Validator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Utf8Status {
    /// `false` as soon as an octet makes the sequence invalid.
    pub valid: bool,
    /// `true` if the sequence consumed so far ends on a code point boundary.
    pub ends_on_codepoint: bool,
    /// Octets of this chunk consumed before stopping (the whole chunk when valid).
    pub consumed: usize,
    /// Octets consumed over the validator's lifetime.
    pub total: usize,
}

/// Streaming UTF-8 validator.
///
/// Feed chunks with [`validate`](Self::validate); the validator remembers
/// partially received code points between calls. A message is valid when
/// every chunk was valid and the last chunk left the validator on a code
/// point boundary.
#[derive(Debug, Clone, Default)]
pub struct Utf8Validator {
    state: u8,
    index: usize,
}

impl Utf8Validator {
    /// Create a validator in the accepting state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: UTF8_ACCEPT,
            index: 0,
        }
    }

    /// Reset to the initial state, forgetting any partial code point.
    pub fn reset(&mut self) {
        self.state = UTF8_ACCEPT;
        self.index = 0;
    }

    /// Current DFA state.
    #[must_use]
    pub const fn state(&self) -> u8 {
        self.state
    }

    /// Total number of octets consumed since the last reset.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.index
    }

    /// Advance the DFA by a single octet and return the new state.
    #[inline]
    pub fn decode(&mut self, byte: u8) -> u8 {
        let class = UTF8_DFA[byte as usize] as usize;
        self.state = UTF8_DFA[256 + ((self.state as usize) << 4) + class];
        self.state
    }

    /// Validate the next chunk of a stream.
    ///
    /// Stops at the first octet that renders the sequence invalid; once
    /// rejected, the validator stays rejected until [`reset`](Self::reset).
    pub fn validate(&mut self, data: &[u8]) -> Utf8Status {
        let mut i = 0;
        while i < data.len() {
            // ASCII runs never leave the accepting state.
            if self.state == UTF8_ACCEPT && data[i] < 0x80 {
                i += 1;
                continue;
            }
            if self.decode(data[i]) == UTF8_REJECT {
                self.index += i;
                return Utf8Status {
                    valid: false,
                    ends_on_codepoint: false,
                    consumed: i,
                    total: self.index,
                };
            }
            i += 1;
        }
        self.index += data.len();
        Utf8Status {
            valid: true,
            ends_on_codepoint: self.state == UTF8_ACCEPT,
            consumed: data.len(),
            total: self.index,
        }
    }
}

/// Validate a complete byte sequence in one call.
#[must_use]
pub fn is_valid_utf8(data: &[u8]) -> bool {
    let status = Utf8Validator::new().validate(data);
    status.valid && status.ends_on_codepoint
}
