//! The sending half of a connection and its close bookkeeping.
//!
//! Everything in here is independent of the application handler, so that
//! callbacks can be given the session as a `&mut dyn WebSocketChannel`
//! while the connection still owns the handler.

use std::time::Duration;

use bytes::BytesMut;
use tracing::{debug, trace, warn};

use crate::config::ProtocolOptions;
use crate::connection::handler::{FrameOptions, SendOptions, WebSocketChannel};
use crate::connection::timer::{Clock, TimerKind, Timers};
use crate::connection::transport::Transport;
use crate::connection::{ConnectionState, Role, SendState};
use crate::error::{Error, Result};
use crate::extensions::PerMessageCompress;
use crate::message::{CloseCode, CloseFrame, MAX_CLOSE_REASON, truncate_utf8};
use crate::protocol::frame::{FrameHeader, MAX_CONTROL_FRAME_PAYLOAD, MAX_PAYLOAD_LENGTH};
use crate::protocol::handshake::newid;
use crate::protocol::mask::{XorMasker, random_mask};
use crate::protocol::opcode::OpCode;
use crate::protocol::validation::RSV_COMPRESSED;
use crate::protocol::PreparedMessage;
use crate::stats::TrafficStats;

/// How a connection is being, or was, closed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseStatus {
    /// The closing handshake completed on both sides.
    pub was_clean: bool,
    /// We sent the first close frame.
    pub closed_by_me: bool,
    /// We failed the connection.
    pub failed_by_me: bool,
    /// We closed the transport.
    pub dropped_by_me: bool,
    /// Code of the close frame we sent.
    pub local_code: Option<u16>,
    /// Reason of the close frame we sent.
    pub local_reason: Option<String>,
    /// Code of the close frame we received.
    pub remote_code: Option<u16>,
    /// Reason of the close frame we received.
    pub remote_reason: Option<String>,
    /// Why the close was not clean, if known.
    pub was_not_clean_reason: Option<String>,
    /// The opening handshake timed out.
    pub open_handshake_timed_out: bool,
    /// The closing handshake timed out.
    pub close_handshake_timed_out: bool,
    /// The server did not drop TCP in time after the closing handshake.
    pub server_connection_drop_timed_out: bool,
    /// The peer did not answer an automatic ping in time.
    pub auto_ping_timed_out: bool,
}

/// Progress of a message sent with the streaming API.
#[derive(Debug)]
struct OutgoingMessage {
    state: SendState,
    opcode: u8,
    compressed: bool,
    frame_length: u64,
    masker: XorMasker,
}

impl Default for OutgoingMessage {
    fn default() -> Self {
        Self {
            state: SendState::Ground,
            opcode: OpCode::Text.as_u8(),
            compressed: false,
            frame_length: 0,
            masker: XorMasker::null(),
        }
    }
}

/// Connection state shared by the send and receive paths.
pub struct Session<T> {
    pub(crate) transport: T,
    role: Role,
    pub(crate) options: ProtocolOptions,
    mask_outgoing: bool,
    pub(crate) state: ConnectionState,
    peer: String,
    pub(crate) protocol_in_use: Option<String>,
    pub(crate) compression: Option<Box<dyn PerMessageCompress>>,
    pub(crate) close: CloseStatus,
    pub(crate) stats: TrafficStats,
    pub(crate) timers: Timers,
    clock: Box<dyn Clock>,
    pub(crate) auto_ping_pending: Option<Vec<u8>>,
    outgoing: OutgoingMessage,
}

impl<T: Transport> Session<T> {
    pub(crate) fn new(
        transport: T,
        role: Role,
        options: ProtocolOptions,
        mask_outgoing: bool,
        clock: Box<dyn Clock>,
    ) -> Self {
        let peer = transport.peer();
        Self {
            transport,
            role,
            options,
            mask_outgoing,
            state: ConnectionState::Connecting,
            peer,
            protocol_in_use: None,
            compression: None,
            close: CloseStatus::default(),
            stats: TrafficStats::default(),
            timers: Timers::default(),
            clock,
            auto_ping_pending: None,
            outgoing: OutgoingMessage::default(),
        }
    }

    pub(crate) fn peer_str(&self) -> &str {
        &self.peer
    }

    pub(crate) fn set_peer(&mut self, peer: String) {
        self.peer = peer;
    }

    /// Apply `update` to the traffic counters, if tracking is on.
    pub(crate) fn track(&mut self, update: impl FnOnce(&mut TrafficStats)) {
        if self.options.track_traffic_stats {
            update(&mut self.stats);
        }
    }

    pub(crate) fn now(&self) -> std::time::Instant {
        self.clock.now()
    }

    /// Arm `kind` to fire after `after`. A zero duration leaves it disarmed.
    pub(crate) fn arm(&mut self, kind: TimerKind, after: Duration) {
        if after.is_zero() {
            return;
        }
        debug!(peer = %self.peer, timer = %kind, ?after, "arming timer");
        let deadline = self.clock.now() + after;
        self.timers.arm(kind, deadline);
    }

    pub(crate) fn cancel(&mut self, kind: TimerKind) {
        if self.timers.cancel(kind) {
            trace!(peer = %self.peer, timer = %kind, "timer cancelled");
        }
    }

    // ------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------

    /// Write octets to the transport, counting them as wire traffic.
    pub(crate) fn send_data(&mut self, data: &[u8], sync: bool, chopsize: Option<usize>) {
        if self.state == ConnectionState::Closed {
            trace!(peer = %self.peer, len = data.len(), "skipping write on closed connection");
            return;
        }
        match chopsize {
            Some(size) if size > 0 && data.len() > size => {
                for chunk in data.chunks(size) {
                    self.write_counted(chunk);
                    self.transport.flush();
                }
            }
            _ => {
                self.write_counted(data);
                if sync {
                    self.transport.flush();
                }
            }
        }
    }

    fn write_counted(&mut self, data: &[u8]) {
        let len = data.len() as u64;
        match self.state {
            ConnectionState::Open => self.track(|s| s.outgoing_octets_wire_level += len),
            ConnectionState::Connecting | ConnectionState::ProxyConnecting => {
                self.track(|s| s.preopen_outgoing_octets_wire_level += len);
            }
            _ => {}
        }
        self.transport.write(data);
    }

    /// Frame and write `payload`.
    pub(crate) fn write_frame(&mut self, opcode: u8, payload: &[u8], options: FrameOptions) -> Result<()> {
        let repeated;
        let payload = match options.payload_len {
            Some(len) => {
                if payload.is_empty() {
                    return Err(Error::InvalidFrameLength(len));
                }
                let len = usize::try_from(len).map_err(|_| Error::InvalidFrameLength(len))?;
                repeated = payload.iter().copied().cycle().take(len).collect::<Vec<u8>>();
                repeated.as_slice()
            }
            None => payload,
        };
        let length = payload.len() as u64;
        if length > MAX_PAYLOAD_LENGTH {
            return Err(Error::InvalidFrameLength(length));
        }

        let mask = options
            .mask
            .or_else(|| self.mask_outgoing.then(random_mask));
        let header = FrameHeader::new(opcode, options.fin, options.rsv, length, mask);

        let mut raw = BytesMut::with_capacity(header.encoded_len() + payload.len());
        header.encode(&mut raw);
        let start = raw.len();
        raw.extend_from_slice(payload);
        if let Some(mask) = mask {
            if length > 0 && self.options.apply_mask {
                XorMasker::for_payload(mask, length).process(&mut raw[start..]);
            }
        }

        if OpCode::from_u8(opcode).is_some_and(OpCode::is_data) {
            self.track(|s| s.outgoing_websocket_frames += 1);
        }
        trace!(
            peer = %self.peer,
            opcode,
            fin = options.fin,
            rsv = options.rsv,
            length,
            masked = mask.is_some(),
            "sending frame"
        );
        self.send_data(&raw, options.sync, options.chopsize);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Closing
    // ------------------------------------------------------------------

    /// Send a close frame and move to `Closing`.
    ///
    /// `is_reply` marks the answer to the peer's close frame.
    pub(crate) fn send_close_frame(
        &mut self,
        code: Option<u16>,
        reason: Option<&str>,
        is_reply: bool,
    ) -> Result<()> {
        match self.state {
            ConnectionState::Closing => {
                debug!(peer = %self.peer, "ignoring sendCloseFrame since connection is closing");
                Ok(())
            }
            ConnectionState::Closed => {
                debug!(peer = %self.peer, "ignoring sendCloseFrame since connection already closed");
                Ok(())
            }
            ConnectionState::Connecting | ConnectionState::ProxyConnecting => {
                Err(Error::NotOpen(self.state))
            }
            ConnectionState::Open => {
                let payload = CloseFrame::encode(code, reason.map(str::as_bytes))?;
                self.write_frame(OpCode::Close.as_u8(), &payload, FrameOptions::default())?;

                self.state = ConnectionState::Closing;
                self.close.closed_by_me = !is_reply;
                self.close.local_code = code;
                self.close.local_reason = reason.map(str::to_string);
                debug!(peer = %self.peer, ?code, is_reply, "sent close frame");

                if self.close.closed_by_me {
                    self.arm(
                        TimerKind::CloseHandshake,
                        self.options.timeouts.close_handshake,
                    );
                }
                Ok(())
            }
        }
    }

    /// Close the transport and enter `Closed`.
    pub(crate) fn drop_transport(&mut self, abort: bool) {
        if self.state == ConnectionState::Closed {
            debug!(peer = %self.peer, "dropping connection to peer skipped - connection already closed");
            return;
        }
        if self.close.was_clean {
            debug!(peer = %self.peer, abort, "dropping connection to peer");
        } else {
            warn!(
                peer = %self.peer,
                abort,
                reason = self.close.was_not_clean_reason.as_deref().unwrap_or(""),
                "dropping connection to peer"
            );
        }
        self.close.dropped_by_me = true;
        self.state = ConnectionState::Closed;
        self.transport.close(abort);
    }

    /// Fail the connection: drop right away with `fail_by_drop`, otherwise
    /// start a closing handshake.
    pub(crate) fn fail(&mut self, code: u16, reason: &str) {
        if self.state == ConnectionState::Closed {
            debug!(peer = %self.peer, "skip failing of connection since connection is already closed");
            return;
        }
        warn!(peer = %self.peer, code, reason, "failing connection");
        self.close.failed_by_me = true;

        if self.options.fail_by_drop {
            self.close.was_clean = false;
            self.close.was_not_clean_reason =
                Some(format!("I dropped the WebSocket TCP connection: {reason}"));
            self.drop_transport(true);
        } else if self.state != ConnectionState::Closing {
            let reason = truncate_utf8(reason, MAX_CLOSE_REASON);
            if let Err(e) = self.send_close_frame(Some(code), Some(reason), false) {
                // opening handshake not finished: nothing to close gracefully
                debug!(peer = %self.peer, error = %e, "close frame not sent");
                self.drop_transport(false);
            }
        } else {
            debug!(peer = %self.peer, "dropping connection to peer: already closing");
            self.drop_transport(false);
        }
    }

    /// Fail with 1002. Returns `true` if processing must stop.
    pub(crate) fn protocol_violation(&mut self, reason: &str) -> bool {
        debug!(peer = %self.peer, reason, "protocol violation");
        self.fail(CloseCode::ProtocolError.as_u16(), reason);
        self.options.fail_by_drop
    }

    /// Fail with 1007. Returns `true` if processing must stop.
    pub(crate) fn invalid_payload(&mut self, reason: &str) -> bool {
        debug!(peer = %self.peer, reason, "invalid payload");
        self.fail(CloseCode::InvalidPayload.as_u16(), reason);
        self.options.fail_by_drop
    }

    // ------------------------------------------------------------------
    // Auto-ping
    // ------------------------------------------------------------------

    pub(crate) fn schedule_auto_ping(&mut self) {
        self.arm(TimerKind::AutoPing, self.options.auto_ping.interval);
    }

    pub(crate) fn send_auto_ping(&mut self) {
        let payload = newid(self.options.auto_ping.size).into_bytes();
        debug!(peer = %self.peer, "auto-ping: sending ping");
        if let Err(e) = self.send_ping(&payload) {
            warn!(peer = %self.peer, error = %e, "auto-ping failed");
            return;
        }
        self.auto_ping_pending = Some(payload);
        self.arm(TimerKind::AutoPingTimeout, self.options.auto_ping.timeout);
    }

    /// Any sign of life: the outstanding ping no longer matters.
    pub(crate) fn auto_ping_satisfied(&mut self) {
        self.cancel(TimerKind::AutoPingTimeout);
        self.auto_ping_pending = None;
        self.cancel(TimerKind::AutoPing);
        self.schedule_auto_ping();
    }

    fn not_open(&self, operation: &str) -> bool {
        if self.state == ConnectionState::Open {
            return false;
        }
        trace!(peer = %self.peer, operation, state = %self.state, "ignored on connection that is not open");
        true
    }

    fn expect_send_state(&self, operation: &'static str, allowed: &[SendState]) -> Result<()> {
        if allowed.contains(&self.outgoing.state) {
            Ok(())
        } else {
            Err(Error::InvalidSendState {
                operation,
                state: self.outgoing.state,
            })
        }
    }

    /// Mutable access to the transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Current sending state of the streaming API.
    pub fn send_state(&self) -> SendState {
        self.outgoing.state
    }
}

impl<T: Transport> WebSocketChannel for Session<T> {
    fn state(&self) -> ConnectionState {
        self.state
    }

    fn role(&self) -> Role {
        self.role
    }

    fn peer(&self) -> &str {
        &self.peer
    }

    fn protocol_in_use(&self) -> Option<&str> {
        self.protocol_in_use.as_deref()
    }

    fn send_message_with(&mut self, payload: &[u8], is_binary: bool, options: SendOptions) -> Result<()> {
        if self.state != ConnectionState::Open {
            return Err(Error::NotOpen(self.state));
        }
        let opcode = OpCode::for_message(is_binary).as_u8();
        self.track(|s| s.outgoing_websocket_messages += 1);

        let app_len = payload.len() as u64;
        let compressed;
        let owned;
        let payload = match self.compression.as_mut().filter(|_| !options.do_not_compress) {
            Some(codec) => {
                codec.start_compress_message();
                let mut data = codec.compress_message_data(payload)?;
                data.extend(codec.end_compress_message()?);
                compressed = true;
                owned = data;
                owned.as_slice()
            }
            None => {
                compressed = false;
                payload
            }
        };
        let wire_len = payload.len() as u64;
        self.track(|s| {
            s.outgoing_octets_app_level += app_len;
            s.outgoing_octets_websocket_level += wire_len;
        });

        if let Err(e) = self.options.limits.check_message_size(payload.len()) {
            warn!(peer = %self.peer, error = %e, "tried to send message exceeding payload limit");
            return Err(e);
        }

        let rsv = if compressed { RSV_COMPRESSED } else { 0 };
        let fragment_size = options.fragment_size.or_else(|| {
            let auto = self.options.auto_fragment_size;
            (auto > 0).then_some(auto)
        });

        match fragment_size {
            Some(size) if payload.len() > size => {
                if size < 1 {
                    return Err(Error::InvalidFragmentSize(size));
                }
                let count = payload.len().div_ceil(size);
                for (i, chunk) in payload.chunks(size).enumerate() {
                    let first = i == 0;
                    let frame = FrameOptions {
                        fin: i + 1 == count,
                        rsv: if first { rsv } else { 0 },
                        sync: options.sync,
                        ..FrameOptions::default()
                    };
                    let op = if first { opcode } else { OpCode::Continuation.as_u8() };
                    self.write_frame(op, chunk, frame)?;
                }
                Ok(())
            }
            _ => self.write_frame(
                opcode,
                payload,
                FrameOptions {
                    rsv,
                    sync: options.sync,
                    ..FrameOptions::default()
                },
            ),
        }
    }

    fn send_prepared_message(&mut self, message: &PreparedMessage) -> Result<()> {
        if self.compression.is_none() || message.do_not_compress() {
            if self.state != ConnectionState::Open {
                return Err(Error::NotOpen(self.state));
            }
            self.send_data(message.framed(), false, None);
            Ok(())
        } else {
            self.send_message(message.payload(), message.is_binary())
        }
    }

    fn send_ping(&mut self, payload: &[u8]) -> Result<()> {
        if self.not_open("send_ping") {
            return Ok(());
        }
        if payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
            return Err(Error::ControlFrameTooLarge(payload.len()));
        }
        self.write_frame(OpCode::Ping.as_u8(), payload, FrameOptions::default())
    }

    fn send_pong(&mut self, payload: &[u8]) -> Result<()> {
        if self.not_open("send_pong") {
            return Ok(());
        }
        if payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
            return Err(Error::ControlFrameTooLarge(payload.len()));
        }
        self.write_frame(OpCode::Pong.as_u8(), payload, FrameOptions::default())
    }

    fn send_close(&mut self, code: Option<u16>, reason: Option<&str>) -> Result<()> {
        if let Some(code) = code {
            if !CloseCode::is_sendable(code) {
                return Err(Error::InvalidCloseCode(code));
            }
        }
        if reason.is_some() && code.is_none() {
            return Err(Error::CloseReasonWithoutCode);
        }
        let reason = reason.map(|r| truncate_utf8(r, MAX_CLOSE_REASON));
        self.send_close_frame(code, reason, false)
    }

    fn begin_message(&mut self, is_binary: bool, do_not_compress: bool) -> Result<()> {
        if self.not_open("begin_message") {
            return Ok(());
        }
        self.expect_send_state("begin_message", &[SendState::Ground])?;

        self.outgoing.opcode = OpCode::for_message(is_binary).as_u8();
        self.outgoing.state = SendState::MessageBegin;
        self.outgoing.compressed = false;
        if let Some(codec) = self.compression.as_mut().filter(|_| !do_not_compress) {
            codec.start_compress_message();
            self.outgoing.compressed = true;
        }
        self.track(|s| s.outgoing_websocket_messages += 1);
        Ok(())
    }

    fn begin_message_frame(&mut self, length: u64) -> Result<()> {
        if self.not_open("begin_message_frame") {
            return Ok(());
        }
        self.expect_send_state(
            "begin_message_frame",
            &[SendState::MessageBegin, SendState::InsideMessage],
        )?;
        if length > MAX_PAYLOAD_LENGTH {
            return Err(Error::InvalidFrameLength(length));
        }

        self.outgoing.frame_length = length;
        self.track(|s| s.outgoing_websocket_frames += 1);

        let mask = self.mask_outgoing.then(random_mask);
        self.outgoing.masker = match mask {
            Some(mask) if length > 0 && self.options.apply_mask => XorMasker::for_payload(mask, length),
            _ => XorMasker::null(),
        };

        let (opcode, rsv) = if self.outgoing.state == SendState::MessageBegin {
            self.outgoing.state = SendState::InsideMessage;
            let rsv = if self.outgoing.compressed { RSV_COMPRESSED } else { 0 };
            (self.outgoing.opcode, rsv)
        } else {
            (OpCode::Continuation.as_u8(), 0)
        };

        let header = FrameHeader::new(opcode, false, rsv, length, mask);
        let mut raw = BytesMut::with_capacity(header.encoded_len());
        header.encode(&mut raw);
        self.send_data(&raw, false, None);

        self.outgoing.state = SendState::InsideMessageFrame;
        Ok(())
    }

    fn send_message_frame_data(&mut self, payload: &[u8], sync: bool) -> Result<i64> {
        if self.not_open("send_message_frame_data") {
            return Ok(0);
        }
        self.expect_send_state("send_message_frame_data", &[SendState::InsideMessageFrame])?;

        let len = payload.len() as u64;
        let compressed = self.outgoing.compressed;
        self.track(|s| {
            if !compressed {
                s.outgoing_octets_app_level += len;
            }
            s.outgoing_octets_websocket_level += len;
        });

        let needed = self.outgoing.frame_length - self.outgoing.masker.pointer();
        let (take, rest) = if len > needed {
            (needed, -((len - needed) as i64))
        } else {
            (len, (needed - len) as i64)
        };

        let mut chunk = payload[..take as usize].to_vec();
        self.outgoing.masker.process(&mut chunk);
        self.send_data(&chunk, sync, None);

        if self.outgoing.masker.pointer() >= self.outgoing.frame_length {
            self.outgoing.state = SendState::InsideMessage;
        }
        Ok(rest)
    }

    fn end_message(&mut self) -> Result<()> {
        if self.not_open("end_message") {
            return Ok(());
        }
        self.expect_send_state("end_message", &[SendState::MessageBegin, SendState::InsideMessage])?;

        let tail = match self.compression.as_mut().filter(|_| self.outgoing.compressed) {
            Some(codec) => codec.end_compress_message()?,
            None => Vec::new(),
        };
        let tail_len = tail.len() as u64;
        if self.outgoing.compressed {
            self.track(|s| s.outgoing_octets_websocket_level += tail_len);
        }

        // a message without frames goes out as a single final frame
        let (opcode, rsv) = if self.outgoing.state == SendState::MessageBegin {
            let rsv = if self.outgoing.compressed { RSV_COMPRESSED } else { 0 };
            (self.outgoing.opcode, rsv)
        } else {
            (OpCode::Continuation.as_u8(), 0)
        };
        self.write_frame(
            opcode,
            &tail,
            FrameOptions {
                rsv,
                ..FrameOptions::default()
            },
        )?;
        self.outgoing.state = SendState::Ground;
        Ok(())
    }

    fn send_message_frame(&mut self, payload: &[u8], sync: bool) -> Result<()> {
        if self.not_open("send_message_frame") {
            return Ok(());
        }
        let owned;
        let payload = match self.compression.as_mut().filter(|_| self.outgoing.compressed) {
            Some(codec) => {
                let len = payload.len() as u64;
                owned = codec.compress_message_data(payload)?;
                self.track(|s| s.outgoing_octets_app_level += len);
                owned.as_slice()
            }
            None => payload,
        };
        self.begin_message_frame(payload.len() as u64)?;
        self.send_message_frame_data(payload, sync)?;
        Ok(())
    }

    fn send_frame(&mut self, opcode: u8, payload: &[u8], options: FrameOptions) -> Result<()> {
        self.write_frame(opcode, payload, options)
    }

    fn fail_connection(&mut self, code: u16, reason: &str) {
        self.fail(code, reason);
    }

    fn drop_connection(&mut self, abort: bool) {
        self.drop_transport(abort);
    }

    fn traffic_stats(&self) -> &TrafficStats {
        &self.stats
    }

    fn close_status(&self) -> &CloseStatus {
        &self.close
    }
}
