//! Application callbacks and the channel they talk back through.

use crate::connection::{CloseStatus, ConnectionState, Role};
use crate::error::Result;
use crate::message::Message;
use crate::protocol::PreparedMessage;
use crate::protocol::handshake::{
    Accept, ConnectingRequest, ConnectionRequest, ConnectionResponse, Deny,
};
use crate::stats::TrafficStats;

/// Per-call options for [`WebSocketChannel::send_message_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendOptions {
    /// Fragment into frames of at most this many octets. Overrides
    /// `auto_fragment_size`.
    pub fragment_size: Option<usize>,
    /// Flush after every frame.
    pub sync: bool,
    /// Skip the negotiated compression extension.
    pub do_not_compress: bool,
}

/// Options for [`WebSocketChannel::send_frame`].
///
/// Raw frames are written as given: no state or consistency checks apply,
/// which makes this the entry point for fuzzing peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOptions {
    /// FIN bit.
    pub fin: bool,
    /// RSV bits as a 3-bit value.
    pub rsv: u8,
    /// Mask with this key even if the role would not mask.
    pub mask: Option<[u8; 4]>,
    /// Repeat the payload cyclically until this many octets were produced.
    pub payload_len: Option<u64>,
    /// Write the frame in chunks of this size, flushing after each.
    pub chopsize: Option<usize>,
    /// Flush after writing.
    pub sync: bool,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self {
            fin: true,
            rsv: 0,
            mask: None,
            payload_len: None,
            chopsize: None,
            sync: false,
        }
    }
}

/// The sending half of a connection, as seen from inside callbacks.
///
/// Sends on a connection that is not open are silently ignored, except for
/// [`send_message`](Self::send_message), which reports
/// [`Error::NotOpen`](crate::Error::NotOpen).
pub trait WebSocketChannel {
    /// Current lifecycle state.
    fn state(&self) -> ConnectionState;

    /// Which end we are.
    fn role(&self) -> Role;

    /// Remote address as reported by the transport.
    fn peer(&self) -> &str;

    /// Negotiated subprotocol.
    fn protocol_in_use(&self) -> Option<&str>;

    /// Send a complete message.
    ///
    /// # Errors
    ///
    /// `NotOpen` unless open, `MessageTooLarge` above the configured
    /// message limit, `InvalidFragmentSize` for a fragment size of zero,
    /// and `Extension` if compression fails.
    fn send_message(&mut self, payload: &[u8], is_binary: bool) -> Result<()> {
        self.send_message_with(payload, is_binary, SendOptions::default())
    }

    /// [`send_message`](Self::send_message) with per-call options.
    ///
    /// # Errors
    ///
    /// See [`send_message`](Self::send_message).
    fn send_message_with(&mut self, payload: &[u8], is_binary: bool, options: SendOptions)
    -> Result<()>;

    /// Send a message framed ahead of time.
    ///
    /// # Errors
    ///
    /// See [`send_message`](Self::send_message); only reachable when the
    /// message has to be re-framed for compression.
    fn send_prepared_message(&mut self, message: &PreparedMessage) -> Result<()>;

    /// Send a ping.
    ///
    /// # Errors
    ///
    /// `ControlFrameTooLarge` for payloads above 125 octets.
    fn send_ping(&mut self, payload: &[u8]) -> Result<()>;

    /// Send a pong.
    ///
    /// # Errors
    ///
    /// `ControlFrameTooLarge` for payloads above 125 octets.
    fn send_pong(&mut self, payload: &[u8]) -> Result<()>;

    /// Start the closing handshake.
    ///
    /// # Errors
    ///
    /// `InvalidCloseCode` for codes other than 1000 and 3000-4999,
    /// `CloseReasonWithoutCode`, and `NotOpen` before the opening
    /// handshake has finished.
    fn send_close(&mut self, code: Option<u16>, reason: Option<&str>) -> Result<()>;

    /// Start a streamed message.
    ///
    /// # Errors
    ///
    /// `InvalidSendState` if a message is already in progress.
    fn begin_message(&mut self, is_binary: bool, do_not_compress: bool) -> Result<()>;

    /// Start a frame of `length` payload octets within the streamed message.
    ///
    /// # Errors
    ///
    /// `InvalidSendState` outside a message or inside an unfinished frame,
    /// `InvalidFrameLength` above 2^63 - 1.
    fn begin_message_frame(&mut self, length: u64) -> Result<()>;

    /// Write payload for the current frame.
    ///
    /// Returns how much the frame still needs (positive), `0` when the data
    /// completed it exactly, or the negated number of octets that did not
    /// fit and were dropped.
    ///
    /// # Errors
    ///
    /// `InvalidSendState` outside a frame.
    fn send_message_frame_data(&mut self, payload: &[u8], sync: bool) -> Result<i64>;

    /// Finish the streamed message.
    ///
    /// # Errors
    ///
    /// `InvalidSendState` outside a message, `Extension` if flushing the
    /// compressor fails.
    fn end_message(&mut self) -> Result<()>;

    /// Send one complete frame of the streamed message.
    ///
    /// # Errors
    ///
    /// As for [`begin_message_frame`](Self::begin_message_frame).
    fn send_message_frame(&mut self, payload: &[u8], sync: bool) -> Result<()>;

    /// Write a raw frame.
    ///
    /// # Errors
    ///
    /// `InvalidFrameLength` for an empty payload with `payload_len` set or a
    /// length above 2^63 - 1.
    fn send_frame(&mut self, opcode: u8, payload: &[u8], options: FrameOptions) -> Result<()>;

    /// Fail the connection with `code` and `reason`.
    fn fail_connection(&mut self, code: u16, reason: &str);

    /// Close the transport without a closing handshake.
    fn drop_connection(&mut self, abort: bool);

    /// Traffic counters.
    fn traffic_stats(&self) -> &TrafficStats;

    /// How the connection is being closed.
    fn close_status(&self) -> &CloseStatus;
}

/// Application callbacks. Every method has a default.
///
/// With the default [`buffer_messages`](Self::buffer_messages), incoming
/// frames are collected and handed to [`on_message`](Self::on_message)
/// once complete. The streaming hooks fire either way.
#[allow(unused_variables)]
pub trait Handler {
    /// Server: decide on an upgrade request.
    ///
    /// Returning `Ok` accepts with an optional subprotocol and extra
    /// headers. `Deny` answers with its HTTP code and closes.
    fn on_connect(&mut self, request: &ConnectionRequest) -> std::result::Result<Accept, Deny> {
        Ok(Accept::new())
    }

    /// Client: override what the opening handshake asks for.
    fn on_connecting(&mut self) -> Option<ConnectingRequest> {
        None
    }

    /// Client: inspect the server's answer. `Err` fails the connection
    /// with the given reason.
    fn on_connect_response(&mut self, response: &ConnectionResponse) -> std::result::Result<(), String> {
        Ok(())
    }

    /// The opening handshake finished.
    fn on_open(&mut self, channel: &mut dyn WebSocketChannel) {}

    /// A data message starts.
    fn on_message_begin(&mut self, channel: &mut dyn WebSocketChannel, is_binary: bool) {}

    /// A frame of `length` octets starts within the current message.
    fn on_message_frame_begin(&mut self, channel: &mut dyn WebSocketChannel, length: u64) {}

    /// Payload of the current frame, unmasked and decompressed.
    fn on_message_frame_data(&mut self, channel: &mut dyn WebSocketChannel, payload: &[u8]) {}

    /// The current frame ended.
    fn on_message_frame_end(&mut self, channel: &mut dyn WebSocketChannel) {}

    /// A complete frame, when buffering.
    fn on_message_frame(&mut self, channel: &mut dyn WebSocketChannel, payload: &[u8]) {}

    /// The current message ended.
    fn on_message_end(&mut self, channel: &mut dyn WebSocketChannel) {}

    /// A complete message, when buffering.
    fn on_message(&mut self, channel: &mut dyn WebSocketChannel, message: Message) {}

    /// A ping arrived. The pong is sent automatically.
    fn on_ping(&mut self, channel: &mut dyn WebSocketChannel, payload: &[u8]) {}

    /// A pong arrived.
    fn on_pong(&mut self, channel: &mut dyn WebSocketChannel, payload: &[u8]) {}

    /// The transport is gone. Called exactly once per connection that
    /// reached `connection_made`.
    fn on_close(&mut self, was_clean: bool, code: Option<u16>, reason: Option<&str>) {}

    /// Collect frames into messages for [`on_message`](Self::on_message).
    fn buffer_messages(&self) -> bool {
        true
    }
}

/// A handler that ignores everything.
impl Handler for () {}
