//! Runs a connection over a tokio stream.
//!
//! The driver owns the stream and the [`WebSocketProtocol`]: it feeds
//! reads into `data_received`, writes whatever the connection queued on its
//! [`MemoryTransport`], fires timers at
//! [`next_timeout`](WebSocketProtocol::next_timeout), and applies commands
//! sent through a [`DriverHandle`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use sansws::driver::{self, ForwardingHandler};
//!
//! let (handler, mut events) = ForwardingHandler::new();
//! let conn = factory.build(MemoryTransport::new(peer), handler);
//! let (handle, commands) = driver::channel(32);
//! tokio::spawn(driver::run(stream, conn, commands));
//!
//! handle.send_text("hello").await?;
//! while let Some(event) = events.recv().await { /* ... */ }
//! ```

use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::{
    Handler, MemoryTransport, Transport, WebSocketChannel, WebSocketProtocol,
};
use crate::error::{Error, Result};
use crate::message::Message;

/// Read buffer size.
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Something for the driver to do on the application's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send a data message.
    Send {
        /// Payload.
        payload: Vec<u8>,
        /// Binary rather than text.
        is_binary: bool,
    },
    /// Send a ping.
    Ping(Vec<u8>),
    /// Start the closing handshake.
    Close {
        /// Close code.
        code: Option<u16>,
        /// Close reason.
        reason: Option<String>,
    },
}

/// Sends commands to a running driver.
#[derive(Debug, Clone)]
pub struct DriverHandle {
    tx: mpsc::Sender<Command>,
}

/// Create a handle and the command receiver to pass to [`run`].
#[must_use]
pub fn channel(capacity: usize) -> (DriverHandle, mpsc::Receiver<Command>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (DriverHandle { tx }, rx)
}

impl DriverHandle {
    async fn submit(&self, command: Command) -> Result<()> {
        self.tx.send(command).await.map_err(|_| Error::ConnectionClosed)
    }

    /// Send a text message.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] once the driver has stopped.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.submit(Command::Send {
            payload: text.into().into_bytes(),
            is_binary: false,
        })
        .await
    }

    /// Send a binary message.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] once the driver has stopped.
    pub async fn send_binary(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.submit(Command::Send {
            payload: data.into(),
            is_binary: true,
        })
        .await
    }

    /// Send a ping.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] once the driver has stopped.
    pub async fn ping(&self, payload: impl Into<Vec<u8>>) -> Result<()> {
        self.submit(Command::Ping(payload.into())).await
    }

    /// Start the closing handshake.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] once the driver has stopped.
    pub async fn close(&self, code: Option<u16>, reason: Option<&str>) -> Result<()> {
        self.submit(Command::Close {
            code,
            reason: reason.map(str::to_string),
        })
        .await
    }
}

/// Connection events, as produced by [`ForwardingHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The opening handshake finished.
    Open {
        /// Negotiated subprotocol.
        protocol: Option<String>,
    },
    /// A message, ping or pong arrived.
    Message(Message),
    /// The connection is gone.
    Closed {
        /// The closing handshake completed.
        was_clean: bool,
        /// Close code.
        code: Option<u16>,
        /// Close reason.
        reason: Option<String>,
    },
}

/// A handler that forwards every event to an unbounded channel.
#[derive(Debug)]
pub struct ForwardingHandler {
    tx: mpsc::UnboundedSender<Event>,
}

impl ForwardingHandler {
    /// Create the handler and the receiving end of its events.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: Event) {
        // nobody listening any more
        let _ = self.tx.send(event);
    }
}

impl Handler for ForwardingHandler {
    fn on_open(&mut self, channel: &mut dyn WebSocketChannel) {
        self.emit(Event::Open {
            protocol: channel.protocol_in_use().map(str::to_string),
        });
    }

    fn on_message(&mut self, _channel: &mut dyn WebSocketChannel, message: Message) {
        self.emit(Event::Message(message));
    }

    fn on_ping(&mut self, _channel: &mut dyn WebSocketChannel, payload: &[u8]) {
        self.emit(Event::Message(Message::Ping(payload.to_vec())));
    }

    fn on_pong(&mut self, _channel: &mut dyn WebSocketChannel, payload: &[u8]) {
        self.emit(Event::Message(Message::Pong(payload.to_vec())));
    }

    fn on_close(&mut self, was_clean: bool, code: Option<u16>, reason: Option<&str>) {
        self.emit(Event::Closed {
            was_clean,
            code,
            reason: reason.map(str::to_string),
        });
    }
}

fn apply<H: Handler>(protocol: &mut WebSocketProtocol<MemoryTransport, H>, command: Command) {
    let channel = protocol.session_mut();
    let result = match command {
        Command::Send { payload, is_binary } => channel.send_message(&payload, is_binary),
        Command::Ping(payload) => channel.send_ping(&payload),
        Command::Close { code, reason } => channel.send_close(code, reason.as_deref()),
    };
    if let Err(e) = result {
        warn!(peer = %channel.peer(), error = %e, "command failed");
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

/// Write what the connection queued. Returns `true` once the connection
/// closed its transport.
async fn flush_outbound<S, H>(stream: &mut S, protocol: &mut WebSocketProtocol<MemoryTransport, H>) -> Result<bool>
where
    S: AsyncWrite + Unpin,
    H: Handler,
{
    let transport = protocol.transport_mut();
    let writes = transport.take_writes();
    if transport.closed() == Some(true) {
        // abort: unsent data is discarded
        return Ok(true);
    }
    if !writes.is_empty() {
        for chunk in &writes {
            stream.write_all(chunk).await?;
        }
        stream.flush().await?;
    }
    if transport.is_closed() {
        stream.shutdown().await?;
        return Ok(true);
    }
    Ok(false)
}

async fn drive<S, H>(
    stream: &mut S,
    protocol: &mut WebSocketProtocol<MemoryTransport, H>,
    commands: &mut mpsc::Receiver<Command>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: Handler,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut commands_open = true;

    loop {
        if flush_outbound(stream, protocol).await? {
            return Ok(());
        }
        let deadline = protocol.next_timeout();

        tokio::select! {
            read = stream.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    debug!(peer = %protocol.transport().peer(), "peer closed the stream");
                    return Ok(());
                }
                protocol.data_received(&buf[..n]);
            }
            command = commands.recv(), if commands_open => match command {
                Some(command) => apply(protocol, command),
                None => commands_open = false,
            },
            () = wait_until(deadline) => protocol.handle_timeout(),
        }
    }
}

/// Run `protocol` over `stream` until either side closes.
///
/// Calls `connection_made` first and `connection_lost` last, so the
/// handler's `on_close` always fires.
///
/// # Errors
///
/// [`Error::Io`] if reading or writing the stream failed.
pub async fn run<S, H>(
    mut stream: S,
    mut protocol: WebSocketProtocol<MemoryTransport, H>,
    mut commands: mpsc::Receiver<Command>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: Handler,
{
    protocol.connection_made();
    let result = drive(&mut stream, &mut protocol, &mut commands).await;
    if let Err(e) = &result {
        debug!(peer = %protocol.transport().peer(), error = %e, "stream error");
    }
    protocol.connection_lost();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_reports_stopped_driver() {
        let (handle, rx) = channel(1);
        drop(rx);
        assert_eq!(handle.send_text("x").await, Err(Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_commands_arrive_in_order() {
        let (handle, mut rx) = channel(4);
        handle.send_binary(vec![1, 2]).await.unwrap();
        handle.close(Some(1000), Some("bye")).await.unwrap();
        assert_eq!(
            rx.recv().await,
            Some(Command::Send {
                payload: vec![1, 2],
                is_binary: true
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(Command::Close {
                code: Some(1000),
                reason: Some("bye".to_string())
            })
        );
    }
}
