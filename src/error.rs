//! Error types.
//!
//! Only errors that belong to the caller surface as [`Error`]: calling a
//! send API in the wrong state, passing an invalid close code, supplying a
//! bad option or URL. Problems caused by the peer (protocol violations,
//! invalid payloads, failed handshakes) are handled inside the connection
//! and reported through the handler's `on_close` callback instead.

use thiserror::Error;

use crate::connection::{ConnectionState, SendState};

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the public API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A frame violates RFC 6455 framing rules.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Invalid UTF-8 where UTF-8 is required.
    #[error("Invalid UTF-8")]
    InvalidUtf8,

    /// Frame size exceeds what can be handled.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Outgoing message exceeds the configured maximum message size.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// The connection is not in a state that allows the operation.
    #[error("Connection not open (state: {0})")]
    NotOpen(ConnectionState),

    /// A streaming send API was called out of sequence.
    #[error("{operation} invalid in sending state {state}")]
    InvalidSendState {
        /// The API that was called.
        operation: &'static str,
        /// The send state at the time of the call.
        state: SendState,
    },

    /// Close code the application may not send.
    #[error("Invalid close code: {0} (must be 1000 or 3000-4999)")]
    InvalidCloseCode(u16),

    /// Close reason given without a close code.
    #[error("Close reason without close code")]
    CloseReasonWithoutCode,

    /// Control frame payload too large (>125 bytes).
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Declared frame length does not fit the wire format.
    #[error("Invalid frame length: {0}")]
    InvalidFrameLength(u64),

    /// Fragment size must be at least one octet.
    #[error("Invalid fragment size: {0}")]
    InvalidFragmentSize(usize),

    /// Rejected configuration value.
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// Malformed WebSocket URL.
    #[error("Invalid WebSocket URL: {0}")]
    InvalidUrl(String),

    /// Invalid opening handshake.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Extension negotiation or parameter error.
    #[error("Invalid extension: {0}")]
    InvalidExtension(String),

    /// Compression codec failure.
    #[error("Extension error: {0}")]
    Extension(String),

    /// Connection has been closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Error::InvalidUtf8
    }
}
