//! Factories holding the shared configuration of many connections.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::{ClientOptions, ServerOptions};
use crate::connection::handler::Handler;
use crate::connection::protocol::WebSocketProtocol;
use crate::connection::timer::{Clock, SystemClock};
use crate::connection::transport::Transport;
use crate::error::Result;

/// Creates server connections.
///
/// Every connection gets a snapshot of the options current at creation.
/// Clones share the connection counter used for `max_connections`.
#[derive(Debug, Clone)]
pub struct ServerFactory {
    options: Arc<ServerOptions>,
    connections: Arc<AtomicUsize>,
}

impl ServerFactory {
    /// Validate `options` and create a factory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`](crate::Error::InvalidOption) if the
    /// options do not validate.
    pub fn new(options: ServerOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options: Arc::new(options),
            connections: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Current options.
    #[must_use]
    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Replace the options for connections created from now on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`](crate::Error::InvalidOption) and
    /// keeps the old options if the new ones do not validate.
    pub fn set_options(&mut self, options: ServerOptions) -> Result<()> {
        options.validate()?;
        self.options = Arc::new(options);
        Ok(())
    }

    /// Connections made and not yet lost.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Create a connection on `transport`.
    pub fn build<T: Transport, H: Handler>(&self, transport: T, handler: H) -> WebSocketProtocol<T, H> {
        self.build_with_clock(transport, handler, SystemClock)
    }

    /// Create a connection whose timers read `clock`.
    pub fn build_with_clock<T, H, C>(&self, transport: T, handler: H, clock: C) -> WebSocketProtocol<T, H>
    where
        T: Transport,
        H: Handler,
        C: Clock + 'static,
    {
        WebSocketProtocol::server(
            transport,
            handler,
            Arc::clone(&self.options),
            Arc::clone(&self.connections),
            Box::new(clock),
        )
    }
}

/// Creates client connections.
#[derive(Debug, Clone)]
pub struct ClientFactory {
    options: Arc<ClientOptions>,
}

impl ClientFactory {
    /// Validate `options` and create a factory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`](crate::Error::InvalidOption) if the
    /// options do not validate.
    pub fn new(options: ClientOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options: Arc::new(options),
        })
    }

    /// Current options.
    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Replace the options for connections created from now on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`](crate::Error::InvalidOption) and
    /// keeps the old options if the new ones do not validate.
    pub fn set_options(&mut self, options: ClientOptions) -> Result<()> {
        options.validate()?;
        self.options = Arc::new(options);
        Ok(())
    }

    /// Create a connection on `transport`.
    pub fn build<T: Transport, H: Handler>(&self, transport: T, handler: H) -> WebSocketProtocol<T, H> {
        self.build_with_clock(transport, handler, SystemClock)
    }

    /// Create a connection whose timers read `clock`.
    pub fn build_with_clock<T, H, C>(&self, transport: T, handler: H, clock: C) -> WebSocketProtocol<T, H>
    where
        T: Transport,
        H: Handler,
        C: Clock + 'static,
    {
        WebSocketProtocol::client(transport, handler, Arc::clone(&self.options), Box::new(clock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AutoPing, ProtocolOptions};
    use crate::connection::transport::MemoryTransport;
    use crate::error::Error;
    use std::time::Duration;

    #[test]
    fn test_factory_rejects_invalid_options() {
        let options = ServerOptions::default().with_versions(vec![7]);
        assert!(matches!(ServerFactory::new(options), Err(Error::InvalidOption(_))));

        let options = ClientOptions::default().with_version(9);
        assert!(matches!(ClientFactory::new(options), Err(Error::InvalidOption(_))));

        let protocol = ProtocolOptions::default()
            .with_auto_ping(AutoPing::new(Duration::from_secs(1), Duration::ZERO).with_size(200));
        let options = ServerOptions::default().with_protocol(protocol);
        assert!(ServerFactory::new(options).is_err());
    }

    #[test]
    fn test_set_options_keeps_old_on_error() {
        let mut factory = ServerFactory::new(ServerOptions::default()).unwrap();
        assert!(factory.set_options(ServerOptions::default().with_versions(vec![])).is_err());
        assert_eq!(factory.options().versions, vec![8, 13]);
        factory
            .set_options(ServerOptions::default().with_versions(vec![13]))
            .unwrap();
        assert_eq!(factory.options().versions, vec![13]);
    }

    #[test]
    fn test_connection_counting() {
        let factory = ServerFactory::new(ServerOptions::default()).unwrap();
        let mut a = factory.build(MemoryTransport::default(), ());
        let mut b = factory.clone().build(MemoryTransport::default(), ());
        assert_eq!(factory.connection_count(), 0);

        a.connection_made();
        b.connection_made();
        assert_eq!(factory.connection_count(), 2);

        a.connection_lost();
        a.connection_lost();
        assert_eq!(factory.connection_count(), 1);
        b.connection_lost();
        assert_eq!(factory.connection_count(), 0);
    }
}
