//! The per-connection state machine.
//!
//! ## Connection Lifecycle
//!
//! 1. **ProxyConnecting** - client only, waiting for the proxy tunnel
//! 2. **Connecting** - opening handshake in progress
//! 3. **Open** - messages flow in both directions
//! 4. **Closing** - close frame sent, waiting for the peer's
//! 5. **Closed** - transport closed or about to be
//!
//! ## Example
//!
//! ```rust,ignore
//! use sansws::{MemoryTransport, ServerFactory, ServerOptions};
//!
//! let factory = ServerFactory::new(ServerOptions::default())?;
//! let mut conn = factory.build(MemoryTransport::new("tcp:127.0.0.1:5000"), EchoHandler);
//! conn.connection_made();
//! conn.data_received(&request_bytes);
//! let response = conn.transport_mut().take_outbound();
//! ```

mod factory;
mod handler;
mod protocol;
mod receive;
mod role;
mod session;
mod state;
mod timer;
mod transport;

#[cfg(test)]
mod test_support;

pub use factory::{ClientFactory, ServerFactory};
pub use handler::{FrameOptions, Handler, SendOptions, WebSocketChannel};
pub use protocol::WebSocketProtocol;
pub use role::Role;
pub use session::{CloseStatus, Session};
pub use state::{ConnectionState, SendState};
pub use timer::{Clock, ManualClock, SystemClock, TimerKind};
pub use transport::{MemoryTransport, Transport};
