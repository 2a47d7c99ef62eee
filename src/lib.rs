//! # sansws - sans-IO WebSocket protocol state machine
//!
//! `sansws` implements RFC 6455 (and hybi drafts 10 to 17) as a state
//! machine that never touches a socket. Feed it octets with
//! `data_received`, collect what it wants written from a [`Transport`],
//! and drive its timers with `next_timeout` and `handle_timeout`.
//!
//! ## Features
//!
//! - **Server and client opening handshakes** with subprotocol and
//!   extension negotiation, origin checks and HTTP proxy tunnels
//! - **Incremental frame parsing** that tolerates any input chunking
//! - **Closing handshake** with close-code and reason validation
//! - **Timers** for handshakes, server drop and auto-ping, on a pluggable clock
//! - **permessage-deflate** compression (`compression` feature)
//! - **Tokio driver** for running a connection over a stream (`async-tokio` feature)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sansws::{Handler, MemoryTransport, ServerFactory, ServerOptions, WebSocketChannel, Message};
//!
//! struct Echo;
//!
//! impl Handler for Echo {
//!     fn on_message(&mut self, ch: &mut dyn WebSocketChannel, message: Message) {
//!         if let Message::Text(text) = message {
//!             let _ = ch.send_message(text.as_bytes(), false);
//!         }
//!     }
//! }
//!
//! let factory = ServerFactory::new(ServerOptions::default())?;
//! let mut conn = factory.build(MemoryTransport::new("tcp:127.0.0.1:5000"), Echo);
//! conn.connection_made();
//! conn.data_received(&bytes_from_socket);
//! socket.write_all(&conn.transport_mut().take_outbound())?;
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod extensions;
pub mod message;
pub mod protocol;
pub mod stats;
pub mod uri;

#[cfg(feature = "async-tokio")]
pub mod driver;

pub use config::{AutoPing, ClientOptions, Limits, ProtocolOptions, Proxy, ServerOptions, Timeouts};
pub use connection::{
    ClientFactory, Clock, CloseStatus, ConnectionState, FrameOptions, Handler, ManualClock,
    MemoryTransport, Role, SendOptions, SendState, ServerFactory, SystemClock, TimerKind,
    Transport, WebSocketChannel, WebSocketProtocol,
};
pub use error::{Error, Result};
pub use message::{CloseCode, CloseFrame, Message};
pub use protocol::{
    Accept, ConnectingRequest, ConnectionRequest, ConnectionResponse, Deny, OpCode,
    PreparedMessage, WS_GUID, compute_accept_key,
};
pub use stats::TrafficStats;
pub use uri::{WsUrl, create_url, parse_url};
