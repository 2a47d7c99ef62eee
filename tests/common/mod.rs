//! Shared helpers for integration tests: a recording handler and an
//! in-memory client/server pair.

#![allow(dead_code)]

use sansws::{
    ClientFactory, ClientOptions, Handler, ManualClock, MemoryTransport, Message, ServerFactory,
    ServerOptions, WebSocketChannel, WebSocketProtocol,
};

/// Records what the connection reports.
#[derive(Debug, Default)]
pub struct Collector {
    pub opened: bool,
    pub protocol: Option<String>,
    pub messages: Vec<Message>,
    pub pongs: Vec<Vec<u8>>,
    pub closes: Vec<(bool, Option<u16>, Option<String>)>,
    pub echo: bool,
}

impl Collector {
    pub fn echoing() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }
}

impl Handler for Collector {
    fn on_open(&mut self, channel: &mut dyn WebSocketChannel) {
        self.opened = true;
        self.protocol = channel.protocol_in_use().map(str::to_string);
    }

    fn on_message(&mut self, channel: &mut dyn WebSocketChannel, message: Message) {
        if self.echo {
            let is_binary = matches!(message, Message::Binary(_));
            channel.send_message(message.as_bytes(), is_binary).unwrap();
        }
        self.messages.push(message);
    }

    fn on_pong(&mut self, _channel: &mut dyn WebSocketChannel, payload: &[u8]) {
        self.pongs.push(payload.to_vec());
    }

    fn on_close(&mut self, was_clean: bool, code: Option<u16>, reason: Option<&str>) {
        self.closes.push((was_clean, code, reason.map(str::to_string)));
    }
}

pub type Conn = WebSocketProtocol<MemoryTransport, Collector>;

/// A server and a client wired back to back through memory.
pub struct Pair {
    pub server: Conn,
    pub client: Conn,
    pub clock: ManualClock,
}

impl Pair {
    /// Connect both ends and run the opening handshake.
    pub fn open(server: ServerOptions, client: ClientOptions) -> Self {
        Self::with_handlers(server, Collector::default(), client, Collector::default())
    }

    pub fn with_handlers(
        server: ServerOptions,
        server_handler: Collector,
        client: ClientOptions,
        client_handler: Collector,
    ) -> Self {
        let clock = ManualClock::new();
        let server = ServerFactory::new(server).unwrap().build_with_clock(
            MemoryTransport::new("tcp:127.0.0.1:40000"),
            server_handler,
            clock.clone(),
        );
        let client = ClientFactory::new(client).unwrap().build_with_clock(
            MemoryTransport::new("tcp:127.0.0.1:9000"),
            client_handler,
            clock.clone(),
        );
        let mut pair = Self {
            server,
            client,
            clock,
        };
        pair.server.connection_made();
        pair.client.connection_made();
        pair.pump();
        pair
    }

    /// Move octets both ways until nothing is left in flight.
    pub fn pump(&mut self) {
        pump(&mut self.server, &mut self.client);
    }
}

/// Move octets between two connections until nothing is left in flight.
/// Once a side closed its transport, both sides learn the connection is
/// lost.
pub fn pump<A: Handler, B: Handler>(
    server: &mut WebSocketProtocol<MemoryTransport, A>,
    client: &mut WebSocketProtocol<MemoryTransport, B>,
) {
    loop {
        let to_server = outbound(client.transport_mut());
        let to_client = outbound(server.transport_mut());
        if to_server.is_empty() && to_client.is_empty() {
            break;
        }
        if !to_server.is_empty() {
            server.data_received(&to_server);
        }
        if !to_client.is_empty() {
            client.data_received(&to_client);
        }
    }
    if server.transport().is_closed() || client.transport().is_closed() {
        server.connection_lost();
        client.connection_lost();
    }
}

/// Queued output, dropped if the connection aborted.
fn outbound(transport: &mut MemoryTransport) -> Vec<u8> {
    let data = transport.take_outbound();
    if transport.closed() == Some(true) {
        return Vec::new();
    }
    data
}

/// Client options pointing at the test server.
pub fn client_options() -> ClientOptions {
    ClientOptions::default().with_url("ws://localhost:9000/").unwrap()
}
