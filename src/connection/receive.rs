//! Incoming frame processing for open and closing connections.
//!
//! Frames are parsed incrementally straight out of the receive buffer: the
//! header is decoded once complete, then payload octets are unmasked and
//! handed on as they arrive, so a frame never has to be buffered whole.

use bytes::{Buf, BytesMut};
use tracing::{debug, trace};

use crate::connection::protocol::WebSocketProtocol;
use crate::connection::timer::TimerKind;
use crate::connection::transport::Transport;
use crate::connection::{ConnectionState, Handler, Role, WebSocketChannel};
use crate::message::{CloseCode, CloseFrame, MAX_CLOSE_REASON, Message, truncate_utf8};
use crate::protocol::frame::{FrameHeader, HeaderPrefix, decode_header, length_violation};
use crate::protocol::mask::XorMasker;
use crate::protocol::opcode::{self, OpCode};
use crate::protocol::utf8::{Utf8Status, Utf8Validator};
use crate::protocol::validation::{FrameValidator, RSV_COMPRESSED};

/// The frame whose payload is being received.
#[derive(Debug)]
struct CurrentFrame {
    header: FrameHeader,
    masker: XorMasker,
}

/// Receive-side parsing and message state.
#[derive(Debug)]
pub(crate) struct Receiver {
    pub(crate) buffer: BytesMut,
    pub(crate) validator: FrameValidator,
    current: Option<CurrentFrame>,
    inside_message: bool,
    message_binary: bool,
    message_compressed: bool,
    message_length: u64,
    utf8: Option<Utf8Validator>,
    utf8_last: Utf8Status,
    control_data: Vec<u8>,
    frame_data: Vec<u8>,
    message_data: Vec<u8>,
}

const UTF8_START: Utf8Status = Utf8Status {
    valid: true,
    ends_on_codepoint: true,
    consumed: 0,
    total: 0,
};

impl Receiver {
    pub(crate) fn new(validator: FrameValidator) -> Self {
        Self {
            buffer: BytesMut::new(),
            validator,
            current: None,
            inside_message: false,
            message_binary: false,
            message_compressed: false,
            message_length: 0,
            utf8: None,
            utf8_last: UTF8_START,
            control_data: Vec::new(),
            frame_data: Vec::new(),
            message_data: Vec::new(),
        }
    }

    /// Forget any partially received frame or message.
    pub(crate) fn reset_message(&mut self) {
        self.inside_message = false;
        self.current = None;
    }
}

impl<T: Transport, H: Handler> WebSocketProtocol<T, H> {
    /// Process buffered frames until more data is needed or the
    /// connection closed.
    pub(crate) fn process_frames(&mut self) {
        while self.session.state.can_receive() && self.process_data() {}
    }

    /// Make progress on the buffered input. Returns `true` if calling
    /// again may make more progress.
    fn process_data(&mut self) -> bool {
        if self.receiver.current.is_none() {
            self.process_header()
        } else {
            self.process_payload()
        }
    }

    fn process_header(&mut self) -> bool {
        let Some(prefix) = HeaderPrefix::parse(&self.receiver.buffer) else {
            return false;
        };

        let violations = self
            .receiver
            .validator
            .check(&prefix, self.receiver.inside_message);
        for violation in violations {
            if self.session.protocol_violation(&violation) {
                return false;
            }
        }
        if self.session.state == ConnectionState::Closed {
            return false;
        }

        let Some((header, header_len)) = decode_header(&self.receiver.buffer) else {
            return false;
        };
        if let Some(reason) = length_violation(prefix.len7, header.length) {
            if self.session.protocol_violation(reason) {
                return false;
            }
        }

        let masker = match header.mask {
            Some(mask) if header.length > 0 && self.session.options.apply_mask => {
                XorMasker::for_payload(mask, header.length)
            }
            _ => XorMasker::null(),
        };
        self.receiver.buffer.advance(header_len);
        trace!(
            peer = %self.session.peer_str(),
            opcode = header.opcode,
            fin = header.fin,
            rsv = header.rsv,
            length = header.length,
            "received frame header"
        );
        self.receiver.current = Some(CurrentFrame { header, masker });
        self.on_frame_begin(header);

        header.length == 0 || !self.receiver.buffer.is_empty()
    }

    fn process_payload(&mut self) -> bool {
        let Some(current) = self.receiver.current.as_mut() else {
            return false;
        };
        let rest = current.header.length - current.masker.pointer();
        let take = rest.min(self.receiver.buffer.len() as u64) as usize;
        if take == 0 && rest > 0 {
            return false;
        }
        let mut payload = self.receiver.buffer.split_to(take);
        if take > 0 {
            current.masker.process(&mut payload);
        }
        let header = current.header;
        let complete = current.masker.pointer() == header.length;

        if !self.on_frame_data(header, &payload) {
            return false;
        }
        if complete && !self.on_frame_end(header) {
            return false;
        }
        !self.receiver.buffer.is_empty()
    }

    // ------------------------------------------------------------------
    // Frame hooks
    // ------------------------------------------------------------------

    fn on_frame_begin(&mut self, header: FrameHeader) {
        if opcode::is_control(header.opcode) {
            self.receiver.control_data.clear();
            return;
        }

        if !self.receiver.inside_message {
            self.receiver.inside_message = true;
            self.receiver.message_compressed = false;
            if header.rsv == RSV_COMPRESSED {
                if let Some(codec) = self.session.compression.as_mut() {
                    codec.start_decompress_message();
                    self.receiver.message_compressed = true;
                }
            }
            let is_text = header.opcode == OpCode::Text.as_u8();
            self.receiver.utf8 = (is_text && self.session.options.utf8_validate_incoming)
                .then(Utf8Validator::new);
            self.receiver.utf8_last = UTF8_START;
            self.message_begin(header.opcode == OpCode::Binary.as_u8());
        }
        self.message_frame_begin(header.length);
    }

    fn on_frame_data(&mut self, header: FrameHeader, payload: &[u8]) -> bool {
        if opcode::is_control(header.opcode) {
            self.receiver.control_data.extend_from_slice(payload);
            return true;
        }

        let wire_len = payload.len() as u64;
        let decompressed;
        let payload = match self
            .session
            .compression
            .as_mut()
            .filter(|_| self.receiver.message_compressed)
        {
            Some(codec) => match codec.decompress_message_data(payload) {
                Ok(data) => {
                    decompressed = data;
                    decompressed.as_slice()
                }
                Err(e) => {
                    let reason = format!("decompression of message payload failed: {e}");
                    return !self.session.invalid_payload(&reason);
                }
            },
            None => payload,
        };

        if self.session.state == ConnectionState::Open {
            let app = payload.len() as u64;
            self.session.track(|s| {
                s.incoming_octets_websocket_level += wire_len;
                s.incoming_octets_app_level += app;
            });
        }

        if let Some(validator) = self.receiver.utf8.as_mut() {
            self.receiver.utf8_last = validator.validate(payload);
            if !self.receiver.utf8_last.valid {
                let reason = format!(
                    "encountered invalid UTF-8 while processing text message at payload octet index {}",
                    self.receiver.utf8_last.total
                );
                if self.session.invalid_payload(&reason) {
                    return false;
                }
            }
        }

        self.message_frame_data(payload);
        true
    }

    fn on_frame_end(&mut self, header: FrameHeader) -> bool {
        if opcode::is_control(header.opcode) {
            let stop = self.process_control_frame(header);
            self.receiver.current = None;
            return !stop;
        }

        if self.session.state == ConnectionState::Open {
            self.session.track(|s| s.incoming_websocket_frames += 1);
        }
        self.message_frame_end();

        if self.session.timers.is_armed(TimerKind::AutoPingTimeout) {
            debug!(peer = %self.session.peer_str(), "auto-ping: data frame counts as liveness");
            self.session.auto_ping_satisfied();
        }

        if header.fin {
            if self.receiver.message_compressed {
                if let Some(codec) = self.session.compression.as_mut() {
                    if let Err(e) = codec.end_decompress_message() {
                        let reason = format!("decompression of message payload failed: {e}");
                        if self.session.invalid_payload(&reason) {
                            return false;
                        }
                    }
                }
            }
            if self.receiver.utf8.is_some() && !self.receiver.utf8_last.ends_on_codepoint {
                let reason = format!(
                    "UTF-8 text message payload ended within Unicode code point at payload octet index {}",
                    self.receiver.utf8_last.total
                );
                if self.session.invalid_payload(&reason) {
                    return false;
                }
            }
            if self.session.state == ConnectionState::Open {
                self.session.track(|s| s.incoming_websocket_messages += 1);
            }
            self.message_end();
            self.receiver.inside_message = false;
        }
        self.receiver.current = None;
        true
    }

    /// Returns `true` if processing must stop.
    fn process_control_frame(&mut self, header: FrameHeader) -> bool {
        let payload = std::mem::take(&mut self.receiver.control_data);
        match OpCode::from_u8(header.opcode) {
            Some(OpCode::Close) => {
                let close = CloseFrame::parse(&payload);
                self.on_close_frame(close.code, close.reason.as_deref())
            }
            Some(OpCode::Ping) => {
                trace!(peer = %self.session.peer_str(), len = payload.len(), "received ping");
                if self.session.state == ConnectionState::Open {
                    if let Err(e) = self.session.send_pong(&payload) {
                        debug!(peer = %self.session.peer_str(), error = %e, "pong not sent");
                    }
                }
                self.handler.on_ping(&mut self.session, &payload);
                false
            }
            Some(OpCode::Pong) => {
                if self
                    .session
                    .auto_ping_pending
                    .as_deref()
                    .is_some_and(|pending| pending == payload.as_slice())
                {
                    debug!(peer = %self.session.peer_str(), "auto-ping: received pending pong");
                    self.session.auto_ping_satisfied();
                } else if self.session.auto_ping_pending.is_some() {
                    debug!(peer = %self.session.peer_str(), "auto-ping: received non-pending pong");
                }
                self.handler.on_pong(&mut self.session, &payload);
                false
            }
            _ => false,
        }
    }

    /// Returns `true` if processing must stop.
    fn on_close_frame(&mut self, code: Option<u16>, reason: Option<&[u8]>) -> bool {
        let session = &mut self.session;
        debug!(peer = %session.peer_str(), ?code, "received close frame");
        session.close.remote_code = None;
        session.close.remote_reason = None;

        match code {
            Some(code) if !CloseCode::is_valid_received(code) => {
                if session.protocol_violation(&format!("invalid close code {code}")) {
                    return true;
                }
                session.close.remote_code = Some(CloseCode::Normal.as_u16());
            }
            code => session.close.remote_code = code,
        }

        if let Some(raw) = reason {
            let status = Utf8Validator::new().validate(raw);
            if !(status.valid && status.ends_on_codepoint) {
                if session.invalid_payload("invalid close reason (non-UTF8 payload)") {
                    return true;
                }
            } else {
                session.close.remote_reason = String::from_utf8(raw.to_vec()).ok();
            }
        }

        match session.state {
            ConnectionState::Closing => {
                session.cancel(TimerKind::CloseHandshake);
                session.close.was_clean = true;
                self.after_close_handshake(true);
            }
            ConnectionState::Open => {
                session.close.was_clean = true;
                let result = if session.options.echo_close_code_reason {
                    let code = session.close.remote_code;
                    let reason = session
                        .close
                        .remote_reason
                        .clone()
                        .map(|r| truncate_utf8(&r, MAX_CLOSE_REASON).to_string());
                    session.send_close_frame(code, reason.as_deref(), true)
                } else {
                    session.send_close_frame(Some(CloseCode::Normal.as_u16()), None, true)
                };
                if let Err(e) = result {
                    debug!(peer = %session.peer_str(), error = %e, "close reply not sent");
                }
                self.after_close_handshake(false);
            }
            _ => session.close.was_clean = false,
        }
        false
    }

    /// Closing handshake complete: servers drop TCP, clients wait for it.
    fn after_close_handshake(&mut self, abort: bool) {
        let session = &mut self.session;
        if session.role() == Role::Server {
            session.drop_transport(abort);
        } else {
            let after = session.options.timeouts.server_connection_drop;
            session.arm(TimerKind::ServerConnectionDrop, after);
        }
    }

    // ------------------------------------------------------------------
    // Message hooks
    // ------------------------------------------------------------------

    fn buffering(&self) -> bool {
        self.handler.buffer_messages() && !self.session.close.failed_by_me
    }

    fn message_begin(&mut self, is_binary: bool) {
        self.receiver.message_binary = is_binary;
        self.receiver.message_length = 0;
        self.receiver.message_data.clear();
        self.handler.on_message_begin(&mut self.session, is_binary);
    }

    fn message_frame_begin(&mut self, length: u64) {
        self.receiver.frame_data.clear();
        self.receiver.message_length += length;

        if !self.session.close.failed_by_me {
            let limits = self.session.options.limits;
            let total = self.receiver.message_length;
            if limits.message_exceeds(total) {
                let reason = format!(
                    "received WebSocket message size {total} exceeds payload limit of {} octets",
                    limits.max_message_payload_size
                );
                self.session.fail(CloseCode::MessageTooBig.as_u16(), &reason);
            } else if limits.frame_exceeds(length) {
                let reason = format!(
                    "received WebSocket frame size {length} exceeds payload limit of {} octets",
                    limits.max_frame_payload_size
                );
                self.session.fail(CloseCode::MessageTooBig.as_u16(), &reason);
            }
        }
        self.handler.on_message_frame_begin(&mut self.session, length);
    }

    fn message_frame_data(&mut self, payload: &[u8]) {
        if self.buffering() {
            self.receiver.frame_data.extend_from_slice(payload);
        }
        self.handler.on_message_frame_data(&mut self.session, payload);
    }

    fn message_frame_end(&mut self) {
        self.handler.on_message_frame_end(&mut self.session);
        if self.buffering() {
            let frame = std::mem::take(&mut self.receiver.frame_data);
            self.handler.on_message_frame(&mut self.session, &frame);
            self.receiver.message_data.extend_from_slice(&frame);
        }
    }

    fn message_end(&mut self) {
        self.handler.on_message_end(&mut self.session);
        if self.buffering() {
            let data = std::mem::take(&mut self.receiver.message_data);
            let message = if self.receiver.message_binary {
                Message::Binary(data)
            } else {
                match String::from_utf8(data) {
                    Ok(text) => Message::Text(text),
                    Err(e) => Message::Text(String::from_utf8_lossy(e.as_bytes()).into_owned()),
                }
            };
            self.handler.on_message(&mut self.session, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{Limits, ProtocolOptions, ServerOptions};
    use crate::connection::ConnectionState;
    use crate::connection::test_support::*;
    use crate::message::{CloseFrame, Message};

    fn options(protocol: ProtocolOptions) -> ServerOptions {
        ServerOptions::default().with_protocol(protocol)
    }

    fn graceful() -> ProtocolOptions {
        ProtocolOptions::default().with_fail_by_drop(false)
    }

    fn not_clean_reason(conn: &TestConn) -> String {
        conn.close_status().was_not_clean_reason.clone().unwrap_or_default()
    }

    // ========================================================================
    // Messages
    // ========================================================================

    #[test]
    fn test_single_frame_text() {
        let (mut conn, _clock) = open_server(ServerOptions::default());
        conn.data_received(&masked(0x1, true, b"hello"));
        assert_eq!(conn.handler().messages(), vec![Message::text("hello")]);

        let stats = conn.traffic_stats();
        assert_eq!(stats.incoming_websocket_messages, 1);
        assert_eq!(stats.incoming_websocket_frames, 1);
        assert_eq!(stats.incoming_octets_app_level, 5);
        assert_eq!(stats.incoming_octets_wire_level, 11);
    }

    #[test]
    fn test_fragmented_binary() {
        let (mut conn, _clock) = open_server(ServerOptions::default());
        let mut data = masked(0x2, false, &[1, 2]);
        data.extend(masked(0x0, false, &[]));
        data.extend(masked(0x0, true, &[3]));
        conn.data_received(&data);
        assert_eq!(conn.handler().messages(), vec![Message::binary(vec![1, 2, 3])]);
        assert_eq!(conn.traffic_stats().incoming_websocket_frames, 3);
    }

    #[test]
    fn test_octet_at_a_time() {
        let (mut conn, _clock) = open_server(ServerOptions::default());
        let mut data = masked(0x1, false, "héllo ".as_bytes());
        data.extend(masked(0x9, true, b"ping"));
        data.extend(masked(0x0, true, &[b'w'; 300]));
        for byte in data {
            conn.data_received(&[byte]);
        }
        let expected = format!("héllo {}", "w".repeat(300));
        assert_eq!(conn.handler().messages(), vec![Message::Text(expected)]);
        assert_eq!(conn.handler().events[1], Event::Ping(b"ping".to_vec()));
    }

    #[test]
    fn test_ping_answered_between_fragments() {
        let (mut conn, _clock) = open_server(ServerOptions::default());
        let mut data = masked(0x1, false, b"a");
        data.extend(masked(0x9, true, b"hi"));
        data.extend(masked(0x0, true, b"b"));
        conn.data_received(&data);

        assert_eq!(conn.transport_mut().take_outbound(), b"\x8a\x02hi");
        assert_eq!(
            conn.handler().events,
            vec![
                Event::Open,
                Event::Ping(b"hi".to_vec()),
                Event::Message(Message::text("ab"))
            ]
        );
    }

    #[test]
    fn test_streaming_handler() {
        let handler = Recorder {
            streaming: true,
            ..Recorder::default()
        };
        let (mut conn, _clock) = server(ServerOptions::default(), handler);
        conn.data_received(&upgrade_request(""));
        conn.data_received(&masked(0x2, false, b"ab"));
        conn.data_received(&masked(0x0, true, b"c"));
        assert_eq!(
            conn.handler().events[1..],
            [
                Event::MessageBegin(true),
                Event::FrameBegin(2),
                Event::FrameData(b"ab".to_vec()),
                Event::FrameBegin(1),
                Event::FrameData(b"c".to_vec()),
                Event::MessageEnd,
            ]
        );
    }

    #[test]
    fn test_invalid_utf8_delivered_lossily_without_validation() {
        let protocol = ProtocolOptions::default().with_utf8_validate_incoming(false);
        let (mut conn, _clock) = open_server(options(protocol));
        conn.data_received(&masked(0x1, true, b"a\xffb"));
        assert_eq!(conn.handler().messages(), vec![Message::text("a\u{fffd}b")]);
    }

    // ========================================================================
    // Failures
    // ========================================================================

    #[test]
    fn test_unmasked_client_frame_dropped() {
        let (mut conn, _clock) = open_server(ServerOptions::default());
        conn.data_received(b"\x81\x02hi");
        assert_eq!(conn.transport().closed(), Some(true));
        assert!(conn.close_status().failed_by_me);
        assert!(not_clean_reason(&conn).starts_with("I dropped the WebSocket TCP connection: "));
        assert!(conn.handler().messages().is_empty());
    }

    #[test]
    fn test_reserved_opcode() {
        let (mut conn, _clock) = open_server(ServerOptions::default());
        conn.data_received(&masked(0x3, true, b""));
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.close_status().failed_by_me);
    }

    #[test]
    fn test_invalid_utf8_sends_1007() {
        let (mut conn, _clock) = open_server(options(graceful()));
        conn.data_received(&masked(0x1, true, b"ok\xc0\xaf"));

        let sent = frames(&conn.transport_mut().take_outbound());
        assert_eq!(sent[0].opcode, 0x8);
        let close = CloseFrame::parse(&sent[0].payload);
        assert_eq!(close.code, Some(1007));
        assert!(conn.close_status().failed_by_me);
        assert!(conn.handler().messages().is_empty());
    }

    #[test]
    fn test_code_point_split_across_frames() {
        let (mut conn, _clock) = open_server(ServerOptions::default());
        let mut data = masked(0x1, false, b"\xc3");
        data.extend(masked(0x0, true, b"\xa9"));
        conn.data_received(&data);
        assert_eq!(conn.handler().messages(), vec![Message::text("é")]);
    }

    #[test]
    fn test_message_ends_inside_code_point() {
        let (mut conn, _clock) = open_server(ServerOptions::default());
        conn.data_received(&masked(0x1, true, b"a\xe2\x82"));
        assert_eq!(
            not_clean_reason(&conn),
            "I dropped the WebSocket TCP connection: UTF-8 text message payload ended within Unicode code point at payload octet index 3"
        );
    }

    #[test]
    fn test_message_too_big() {
        let protocol = ProtocolOptions::default().with_limits(Limits::new(0, 10));
        let (mut conn, _clock) = open_server(options(protocol));
        let mut data = masked(0x2, false, &[0; 6]);
        data.extend(masked(0x0, true, &[0; 6]));
        conn.data_received(&data);
        assert_eq!(
            not_clean_reason(&conn),
            "I dropped the WebSocket TCP connection: received WebSocket message size 12 exceeds payload limit of 10 octets"
        );
    }

    #[test]
    fn test_frame_too_big_with_closing_handshake() {
        let protocol = graceful().with_limits(Limits::new(4, 0));
        let (mut conn, _clock) = open_server(options(protocol));
        conn.data_received(&masked(0x2, true, &[0; 5]));

        let sent = frames(&conn.transport_mut().take_outbound());
        let close = CloseFrame::parse(&sent[0].payload);
        assert_eq!(close.code, Some(1009));
        assert_eq!(
            close.reason.as_deref(),
            Some(&b"received WebSocket frame size 5 exceeds payload limit of 4 octets"[..])
        );
        assert!(conn.handler().messages().is_empty());
    }

    // ========================================================================
    // Close frames
    // ========================================================================

    #[test]
    fn test_invalid_close_code() {
        let (mut conn, _clock) = open_server(ServerOptions::default());
        conn.data_received(&masked(0x8, true, b"\x03\xe7"));
        assert_eq!(
            not_clean_reason(&conn),
            "I dropped the WebSocket TCP connection: invalid close code 999"
        );
    }

    #[test]
    fn test_close_reason_must_be_utf8() {
        let (mut conn, _clock) = open_server(ServerOptions::default());
        conn.data_received(&masked(0x8, true, b"\x03\xe8\xff"));
        assert_eq!(
            not_clean_reason(&conn),
            "I dropped the WebSocket TCP connection: invalid close reason (non-UTF8 payload)"
        );
    }

    #[test]
    fn test_close_echo() {
        let protocol = ProtocolOptions::default().with_echo_close_code_reason(true);
        let (mut conn, _clock) = open_server(options(protocol));
        let close = CloseFrame::encode(Some(3000), Some(b"custom")).unwrap();
        conn.data_received(&masked(0x8, true, &close));

        let sent = frames(&conn.transport_mut().take_outbound());
        assert_eq!(sent[0].payload, close);
        assert_eq!(conn.close_status().remote_code, Some(3000));
        assert_eq!(conn.close_status().remote_reason.as_deref(), Some("custom"));
    }

    #[test]
    fn test_empty_close() {
        let (mut conn, _clock) = open_server(ServerOptions::default());
        conn.data_received(&masked(0x8, true, b""));
        assert_eq!(conn.transport_mut().take_outbound(), b"\x88\x02\x03\xe8");
        assert_eq!(conn.close_status().remote_code, None);
        assert!(conn.close_status().was_clean);
    }

    #[test]
    fn test_frames_after_close_ignored() {
        let (mut conn, _clock) = open_server(ServerOptions::default());
        let mut data = masked(0x8, true, b"\x03\xe8");
        data.extend(masked(0x1, true, b"after"));
        conn.data_received(&data);
        assert!(conn.handler().messages().is_empty());
    }
}
