//! Close codes, close frame payloads and whole messages.

use crate::error::{Error, Result};

/// Longest close reason that fits a control frame next to the 2-octet code.
pub const MAX_CLOSE_REASON: usize = 123;

/// WebSocket close status code per RFC 6455 Section 7.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum CloseCode {
    /// Normal closure (1000).
    #[default]
    Normal,
    /// Going away (1001), e.g. server shutdown or browser navigating away.
    GoingAway,
    /// Protocol error (1002).
    ProtocolError,
    /// Unsupported data (1003).
    UnsupportedData,
    /// No status received (1005). Never put on the wire.
    NoStatus,
    /// Abnormal closure (1006). Never put on the wire.
    Abnormal,
    /// Invalid frame payload data (1007), e.g. non-UTF-8 text.
    InvalidPayload,
    /// Policy violation (1008).
    PolicyViolation,
    /// Message too big (1009).
    MessageTooBig,
    /// Mandatory extension (1010). Client expected server to negotiate an extension.
    MandatoryExtension,
    /// Internal error (1011).
    InternalError,
    /// Service restart (1012).
    ServiceRestart,
    /// Try again later (1013).
    TryAgainLater,
    /// TLS handshake failure (1015). Never put on the wire.
    TlsHandshake,
    /// Any other code.
    Other(u16),
}

impl CloseCode {
    /// Create a `CloseCode` from its numeric value.
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnsupportedData,
            1005 => CloseCode::NoStatus,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::InternalError,
            1012 => CloseCode::ServiceRestart,
            1013 => CloseCode::TryAgainLater,
            1015 => CloseCode::TlsHandshake,
            other => CloseCode::Other(other),
        }
    }

    /// Get the numeric value of this close code.
    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnsupportedData => 1003,
            CloseCode::NoStatus => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::ServiceRestart => 1012,
            CloseCode::TryAgainLater => 1013,
            CloseCode::TlsHandshake => 1015,
            CloseCode::Other(code) => *code,
        }
    }

    /// Whether a code received in a close frame is acceptable.
    ///
    /// Codes below 1000 or at/above 5000 are invalid. In 1000-2999 only the
    /// registered codes that may appear on the wire are allowed; 3000-4999
    /// are open to libraries and applications.
    #[must_use]
    pub const fn is_valid_received(code: u16) -> bool {
        match code {
            1000..=1003 | 1007..=1013 => true,
            1000..=2999 => false,
            3000..=4999 => true,
            _ => false,
        }
    }

    /// Whether the application may start a closing handshake with `code`.
    ///
    /// Only 1000 and the 3000-4999 range are accepted from the send API.
    #[must_use]
    pub const fn is_sendable(code: u16) -> bool {
        matches!(code, 1000 | 3000..=4999)
    }

    /// Reserved codes that MUST NOT be set in a close frame.
    #[must_use]
    pub const fn is_reserved(&self) -> bool {
        matches!(self.as_u16(), 1004..=1006 | 1015)
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        CloseCode::from_u16(code)
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}

/// Truncate `reason` to at most `limit` UTF-8 octets without splitting a
/// code point.
#[must_use]
pub fn truncate_utf8(reason: &str, limit: usize) -> &str {
    if reason.len() <= limit {
        return reason;
    }
    let mut end = limit;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

/// Decoded close frame body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CloseFrame {
    /// Status code, absent for an empty close body.
    pub code: Option<u16>,
    /// Raw reason octets following the code. Not yet UTF-8 validated.
    pub reason: Option<Vec<u8>>,
}

impl CloseFrame {
    /// Split a close frame payload into code and raw reason.
    ///
    /// A body of length 1 is caught by header validation before we get
    /// here; it is treated as empty.
    #[must_use]
    pub fn parse(payload: &[u8]) -> Self {
        if payload.len() < 2 {
            return Self::default();
        }
        let code = u16::from_be_bytes([payload[0], payload[1]]);
        let reason = (payload.len() > 2).then(|| payload[2..].to_vec());
        Self {
            code: Some(code),
            reason,
        }
    }

    /// Encode a close body. A reason without a code is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CloseReasonWithoutCode`] if `reason` is set without
    /// `code`, and [`Error::ControlFrameTooLarge`] if the reason exceeds
    /// [`MAX_CLOSE_REASON`] octets.
    pub fn encode(code: Option<u16>, reason: Option<&[u8]>) -> Result<Vec<u8>> {
        match (code, reason) {
            (None, None) => Ok(Vec::new()),
            (None, Some(_)) => Err(Error::CloseReasonWithoutCode),
            (Some(code), reason) => {
                let reason = reason.unwrap_or_default();
                if reason.len() > MAX_CLOSE_REASON {
                    return Err(Error::ControlFrameTooLarge(reason.len() + 2));
                }
                let mut body = Vec::with_capacity(2 + reason.len());
                body.extend_from_slice(&code.to_be_bytes());
                body.extend_from_slice(reason);
                Ok(body)
            }
        }
    }
}

/// A complete application message, as used by the async driver.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Message {
    /// A text message (UTF-8 encoded).
    Text(String),
    /// A binary message (arbitrary bytes).
    Binary(Vec<u8>),
    /// A ping frame (control frame, payload <= 125 bytes).
    Ping(Vec<u8>),
    /// A pong frame (control frame, payload <= 125 bytes).
    Pong(Vec<u8>),
}

impl Message {
    /// Create a text message.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Message::Text(s.into())
    }

    /// Create a binary message.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Message::Binary(data.into())
    }

    /// Returns `true` if this is a data message (text or binary).
    #[must_use]
    pub const fn is_data(&self) -> bool {
        matches!(self, Message::Text(_) | Message::Binary(_))
    }

    /// Returns `true` for binary messages.
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        matches!(self, Message::Binary(_))
    }

    /// Borrow the text content, if this is a text message.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The payload octets.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Message::Text(s) => s.as_bytes(),
            Message::Binary(data) | Message::Ping(data) | Message::Pong(data) => data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_from_u16() {
        assert_eq!(CloseCode::from_u16(1000), CloseCode::Normal);
        assert_eq!(CloseCode::from_u16(1001), CloseCode::GoingAway);
        assert_eq!(CloseCode::from_u16(1007), CloseCode::InvalidPayload);
        assert_eq!(CloseCode::from_u16(1013), CloseCode::TryAgainLater);
        assert_eq!(CloseCode::from_u16(3000), CloseCode::Other(3000));
        assert_eq!(CloseCode::from_u16(4999), CloseCode::Other(4999));
        assert_eq!(u16::from(CloseCode::ServiceRestart), 1012);
    }

    #[test]
    fn test_received_close_code_validity() {
        for code in [1000, 1001, 1002, 1003, 1007, 1008, 1009, 1010, 1011, 3000, 4000, 4999] {
            assert!(CloseCode::is_valid_received(code), "{code} should be valid");
        }
        for code in [0, 999, 1004, 1005, 1006, 1014, 1015, 1016, 2000, 2999, 5000, 65535] {
            assert!(!CloseCode::is_valid_received(code), "{code} should be invalid");
        }
    }

    #[test]
    fn test_sendable_close_codes() {
        assert!(CloseCode::is_sendable(1000));
        assert!(CloseCode::is_sendable(3000));
        assert!(CloseCode::is_sendable(4999));
        assert!(!CloseCode::is_sendable(1001));
        assert!(!CloseCode::is_sendable(2999));
        assert!(!CloseCode::is_sendable(5000));
    }

    #[test]
    fn test_close_code_reserved() {
        assert!(CloseCode::Other(1004).is_reserved());
        assert!(CloseCode::NoStatus.is_reserved());
        assert!(CloseCode::Abnormal.is_reserved());
        assert!(CloseCode::TlsHandshake.is_reserved());
        assert!(!CloseCode::Normal.is_reserved());
        assert!(!CloseCode::ServiceRestart.is_reserved());
    }

    // --------------------------------------------------------------------------
    // Close reason truncation
    // --------------------------------------------------------------------------

    #[test]
    fn test_truncate_short_reason_untouched() {
        assert_eq!(truncate_utf8("bye", MAX_CLOSE_REASON), "bye");
    }

    #[test]
    fn test_truncate_does_not_split_codepoint() {
        // 'ä' is two octets: 61 * 2 = 122 octets, the 62nd would cross 123.
        let reason = "ä".repeat(62);
        let truncated = truncate_utf8(&reason, MAX_CLOSE_REASON);
        assert_eq!(truncated.len(), 122);
        assert_eq!(truncated.chars().count(), 61);

        let reason = "x".repeat(200);
        assert_eq!(truncate_utf8(&reason, MAX_CLOSE_REASON).len(), 123);
    }

    // --------------------------------------------------------------------------
    // Close frame body
    // --------------------------------------------------------------------------

    #[test]
    fn test_close_frame_parse() {
        assert_eq!(CloseFrame::parse(&[]), CloseFrame::default());
        let frame = CloseFrame::parse(&[0x03, 0xe8]);
        assert_eq!(frame.code, Some(1000));
        assert_eq!(frame.reason, None);

        let frame = CloseFrame::parse(&[0x03, 0xe8, b'b', b'y', b'e']);
        assert_eq!(frame.reason.as_deref(), Some(&b"bye"[..]));
    }

    #[test]
    fn test_close_frame_encode() {
        assert!(CloseFrame::encode(None, None).unwrap().is_empty());
        assert_eq!(
            CloseFrame::encode(Some(1000), Some(b"bye")).unwrap(),
            vec![0x03, 0xe8, b'b', b'y', b'e']
        );
        assert_eq!(
            CloseFrame::encode(None, Some(b"bye")),
            Err(Error::CloseReasonWithoutCode)
        );
        assert!(matches!(
            CloseFrame::encode(Some(1000), Some(&[b'x'; 124])),
            Err(Error::ControlFrameTooLarge(126))
        ));
    }

    #[test]
    fn test_message_accessors() {
        let msg = Message::text("hello");
        assert_eq!(msg.as_text(), Some("hello"));
        assert_eq!(msg.as_bytes(), b"hello");
        assert!(msg.is_data());
        assert!(!msg.is_binary());

        let msg = Message::binary(vec![1, 2, 3]);
        assert!(msg.is_binary());
        assert_eq!(msg.as_text(), None);
        assert!(!Message::Ping(vec![]).is_data());
    }
}
