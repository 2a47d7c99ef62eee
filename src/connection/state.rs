//! Connection and send-side state machines.

use std::fmt;

/// Lifecycle state of a connection.
///
/// Transitions only move forward:
/// `ProxyConnecting -> Connecting -> Open -> Closing -> Closed`, where
/// `ProxyConnecting` is used only by clients tunnelling through an HTTP
/// proxy and any state may jump straight to `Closed` when the transport
/// goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Waiting for the proxy to confirm the CONNECT tunnel.
    ProxyConnecting,
    /// Opening handshake in progress.
    #[default]
    Connecting,
    /// Handshake complete; data flows in both directions.
    Open,
    /// A close frame has been sent; waiting for the peer's.
    Closing,
    /// Terminal: no further input is processed.
    Closed,
}

impl ConnectionState {
    /// `true` until the connection reaches `Closed`.
    #[must_use]
    #[inline]
    pub const fn is_active(&self) -> bool {
        !matches!(self, ConnectionState::Closed)
    }

    /// Application data may only be sent while `Open`.
    #[must_use]
    #[inline]
    pub const fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Frames are parsed while `Open` or `Closing`.
    #[must_use]
    #[inline]
    pub const fn can_receive(&self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::Closing)
    }

    /// Still before the end of the opening handshake.
    #[must_use]
    #[inline]
    pub const fn is_opening(&self) -> bool {
        matches!(
            self,
            ConnectionState::ProxyConnecting | ConnectionState::Connecting
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::ProxyConnecting => write!(f, "ProxyConnecting"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closing => write!(f, "Closing"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

/// Position of the outgoing side within the streaming send API.
///
/// ```text
/// Ground --begin_message--> MessageBegin --begin_message_frame--> InsideMessageFrame
///   ^                                                               |   ^
///   |                                      frame payload complete   v   | begin_message_frame
///   +------------------------end_message----------------------- InsideMessage
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SendState {
    /// No message in progress.
    #[default]
    Ground,
    /// `begin_message` called, no frame started yet.
    MessageBegin,
    /// Between frames of a message.
    InsideMessage,
    /// A frame header was sent and its payload is still being written.
    InsideMessageFrame,
}

impl fmt::Display for SendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SendState::Ground => "Ground",
            SendState::MessageBegin => "MessageBegin",
            SendState::InsideMessage => "InsideMessage",
            SendState::InsideMessageFrame => "InsideMessageFrame",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        assert_eq!(ConnectionState::default(), ConnectionState::Connecting);
        assert_eq!(SendState::default(), SendState::Ground);
    }

    #[test]
    fn test_can_send_in_each_state() {
        assert!(!ConnectionState::ProxyConnecting.can_send());
        assert!(!ConnectionState::Connecting.can_send());
        assert!(ConnectionState::Open.can_send());
        assert!(!ConnectionState::Closing.can_send());
        assert!(!ConnectionState::Closed.can_send());
    }

    #[test]
    fn test_can_receive_in_each_state() {
        assert!(!ConnectionState::Connecting.can_receive());
        assert!(ConnectionState::Open.can_receive());
        assert!(ConnectionState::Closing.can_receive());
        assert!(!ConnectionState::Closed.can_receive());
    }

    #[test]
    fn test_is_active_and_opening() {
        assert!(ConnectionState::ProxyConnecting.is_active());
        assert!(ConnectionState::ProxyConnecting.is_opening());
        assert!(ConnectionState::Connecting.is_opening());
        assert!(!ConnectionState::Open.is_opening());
        assert!(!ConnectionState::Closed.is_active());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::ProxyConnecting.to_string(), "ProxyConnecting");
        assert_eq!(ConnectionState::Closing.to_string(), "Closing");
        assert_eq!(SendState::InsideMessageFrame.to_string(), "InsideMessageFrame");
    }
}
