//! Shared fixtures for connection tests.

use crate::config::{ClientOptions, ServerOptions};
use crate::connection::factory::{ClientFactory, ServerFactory};
use crate::connection::handler::{Handler, WebSocketChannel};
use crate::connection::protocol::WebSocketProtocol;
use crate::connection::timer::ManualClock;
use crate::connection::transport::MemoryTransport;
use crate::message::Message;
use crate::protocol::frame::{Frame, encode_frame};
use crate::protocol::handshake::{Accept, ConnectionRequest, Deny, compute_accept_key};

pub(crate) const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
pub(crate) const ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";
pub(crate) const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

pub(crate) fn upgrade_request(extra: &str) -> Vec<u8> {
    format!(
        "GET /chat HTTP/1.1\r\nHost: localhost:9000\r\nUpgrade: websocket\r\n\
         Connection: Upgrade\r\nSec-WebSocket-Key: {KEY}\r\nSec-WebSocket-Version: 13\r\n{extra}\r\n"
    )
    .into_bytes()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Open,
    MessageBegin(bool),
    FrameBegin(u64),
    FrameData(Vec<u8>),
    MessageEnd,
    Message(Message),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(bool, Option<u16>, Option<String>),
}

/// Records every callback. Optionally streams, denies or echoes.
#[derive(Debug, Default)]
pub(crate) struct Recorder {
    pub(crate) events: Vec<Event>,
    pub(crate) streaming: bool,
    pub(crate) echo: bool,
    pub(crate) deny: Option<Deny>,
    pub(crate) protocol: Option<String>,
}

impl Recorder {
    pub(crate) fn messages(&self) -> Vec<Message> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Message(m) => Some(m.clone()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn close(&self) -> Option<&Event> {
        self.events.iter().find(|e| matches!(e, Event::Close(..)))
    }
}

impl Handler for Recorder {
    fn on_connect(&mut self, _request: &ConnectionRequest) -> Result<Accept, Deny> {
        if let Some(deny) = self.deny.clone() {
            return Err(deny);
        }
        Ok(match &self.protocol {
            Some(p) => Accept::with_protocol(p.clone()),
            None => Accept::new(),
        })
    }

    fn on_open(&mut self, _channel: &mut dyn WebSocketChannel) {
        self.events.push(Event::Open);
    }

    fn on_message_begin(&mut self, _channel: &mut dyn WebSocketChannel, is_binary: bool) {
        if self.streaming {
            self.events.push(Event::MessageBegin(is_binary));
        }
    }

    fn on_message_frame_begin(&mut self, _channel: &mut dyn WebSocketChannel, length: u64) {
        if self.streaming {
            self.events.push(Event::FrameBegin(length));
        }
    }

    fn on_message_frame_data(&mut self, _channel: &mut dyn WebSocketChannel, payload: &[u8]) {
        if self.streaming {
            self.events.push(Event::FrameData(payload.to_vec()));
        }
    }

    fn on_message_end(&mut self, _channel: &mut dyn WebSocketChannel) {
        if self.streaming {
            self.events.push(Event::MessageEnd);
        }
    }

    fn on_message(&mut self, channel: &mut dyn WebSocketChannel, message: Message) {
        if self.echo {
            let _ = channel.send_message(message.as_bytes(), message.as_text().is_none());
        }
        self.events.push(Event::Message(message));
    }

    fn on_ping(&mut self, _channel: &mut dyn WebSocketChannel, payload: &[u8]) {
        self.events.push(Event::Ping(payload.to_vec()));
    }

    fn on_pong(&mut self, _channel: &mut dyn WebSocketChannel, payload: &[u8]) {
        self.events.push(Event::Pong(payload.to_vec()));
    }

    fn on_close(&mut self, was_clean: bool, code: Option<u16>, reason: Option<&str>) {
        self.events
            .push(Event::Close(was_clean, code, reason.map(str::to_string)));
    }

    fn buffer_messages(&self) -> bool {
        !self.streaming
    }
}

pub(crate) type TestConn = WebSocketProtocol<MemoryTransport, Recorder>;

/// A server connection with the transport made but no request received.
pub(crate) fn server(options: ServerOptions, handler: Recorder) -> (TestConn, ManualClock) {
    let clock = ManualClock::new();
    let factory = ServerFactory::new(options).unwrap();
    let mut conn = factory.build_with_clock(
        MemoryTransport::new("tcp:127.0.0.1:50000"),
        handler,
        clock.clone(),
    );
    conn.connection_made();
    (conn, clock)
}

/// A server connection that completed the opening handshake.
pub(crate) fn open_server(options: ServerOptions) -> (TestConn, ManualClock) {
    let (mut conn, clock) = server(options, Recorder::default());
    conn.data_received(&upgrade_request(""));
    let response = conn.transport_mut().take_outbound();
    assert!(response.starts_with(b"HTTP/1.1 101 Switching Protocols\r\n"));
    (conn, clock)
}

/// A client connection with the request sent but no response received.
pub(crate) fn client(options: ClientOptions) -> (TestConn, ManualClock) {
    let clock = ManualClock::new();
    let factory = ClientFactory::new(options).unwrap();
    let mut conn = factory.build_with_clock(
        MemoryTransport::new("tcp:127.0.0.1:9000"),
        Recorder::default(),
        clock.clone(),
    );
    conn.connection_made();
    (conn, clock)
}

/// A frame as a client sends it.
pub(crate) fn masked(opcode: u8, fin: bool, payload: &[u8]) -> Vec<u8> {
    encode_frame(opcode, payload, fin, 0, Some(MASK)).to_vec()
}

/// Parse every complete frame in `bytes`.
pub(crate) fn frames(bytes: &[u8]) -> Vec<Frame> {
    let mut out = Vec::new();
    let mut rest = bytes;
    while let Some((frame, used)) = Frame::parse(rest).unwrap() {
        out.push(frame);
        rest = &rest[used..];
    }
    out
}

/// A 101 answer to the client request in `request`.
pub(crate) fn accept_response(request: &[u8], extra: &str) -> Vec<u8> {
    let request = String::from_utf8_lossy(request);
    let key = request
        .lines()
        .find_map(|line| line.strip_prefix("Sec-WebSocket-Key: "))
        .unwrap();
    format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n{extra}\r\n",
        compute_accept_key(key.trim())
    )
    .into_bytes()
}
