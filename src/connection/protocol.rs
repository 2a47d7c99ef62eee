//! The connection driver: lifecycle, opening handshakes and timers.
//!
//! A [`WebSocketProtocol`] does no I/O of its own. The owner reports what
//! happened on the transport (`connection_made`, `data_received`,
//! `connection_lost`) and fires timers (`handle_timeout`) once
//! [`next_timeout`](WebSocketProtocol::next_timeout) has passed. Output
//! goes to the [`Transport`].

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use bytes::Buf;
use tracing::{debug, error, info};

use crate::config::{ClientOptions, ServerOptions};
use crate::connection::handler::Handler;
use crate::connection::receive::Receiver;
use crate::connection::session::{CloseStatus, Session};
use crate::connection::timer::{Clock, TimerKind};
use crate::connection::transport::Transport;
use crate::connection::{ConnectionState, Role};
use crate::extensions::PerMessageCompress;
use crate::protocol::handshake::client::{
    ProxyOutcome, ResponseOutcome, build_request, process_proxy_response, process_response,
    proxy_connect_request,
};
use crate::protocol::handshake::server::{
    RequestOutcome, StatusReply, Upgrade, build_response, error_response, html_response,
    process_request, redirect_response, status_page,
};
use crate::protocol::handshake::{ConnectingRequest, generate_key};
use crate::protocol::validation::FrameValidator;
use crate::stats::TrafficStats;

/// Role-specific configuration and handshake state.
enum Endpoint {
    Server {
        options: Arc<ServerOptions>,
        connections: Arc<AtomicUsize>,
        counted: bool,
    },
    Client {
        options: Arc<ClientOptions>,
        key: String,
        protocols: Vec<String>,
    },
}

/// One WebSocket connection, server or client side.
///
/// Created by a [`ServerFactory`](crate::ServerFactory) or
/// [`ClientFactory`](crate::ClientFactory).
pub struct WebSocketProtocol<T, H> {
    pub(crate) session: Session<T>,
    pub(crate) handler: H,
    pub(crate) receiver: Receiver,
    endpoint: Endpoint,
    was_serving_flash: bool,
    made: bool,
    lost: bool,
}

impl<T: Transport, H: Handler> WebSocketProtocol<T, H> {
    pub(crate) fn server(
        transport: T,
        handler: H,
        options: Arc<ServerOptions>,
        connections: Arc<AtomicUsize>,
        clock: Box<dyn Clock>,
    ) -> Self {
        let validator = FrameValidator::new(Role::Server)
            .with_require_masked_client_frames(options.require_masked_client_frames);
        let session = Session::new(
            transport,
            Role::Server,
            options.protocol.clone(),
            options.mask_server_frames,
            clock,
        );
        Self {
            session,
            handler,
            receiver: Receiver::new(validator),
            endpoint: Endpoint::Server {
                options,
                connections,
                counted: false,
            },
            was_serving_flash: false,
            made: false,
            lost: false,
        }
    }

    pub(crate) fn client(
        transport: T,
        handler: H,
        options: Arc<ClientOptions>,
        clock: Box<dyn Clock>,
    ) -> Self {
        let validator = FrameValidator::new(Role::Client)
            .with_accept_masked_server_frames(options.accept_masked_server_frames);
        let session = Session::new(
            transport,
            Role::Client,
            options.protocol.clone(),
            options.mask_client_frames,
            clock,
        );
        Self {
            session,
            handler,
            receiver: Receiver::new(validator),
            endpoint: Endpoint::Client {
                options,
                key: String::new(),
                protocols: Vec::new(),
            },
            was_serving_flash: false,
            made: false,
            lost: false,
        }
    }

    // ------------------------------------------------------------------
    // Transport events
    // ------------------------------------------------------------------

    /// The transport is connected. Servers start waiting for the request,
    /// clients send it (or the proxy CONNECT first).
    pub fn connection_made(&mut self) {
        if self.made {
            return;
        }
        self.made = true;

        let proxy = match &mut self.endpoint {
            Endpoint::Server {
                connections,
                counted,
                ..
            } => {
                connections.fetch_add(1, Ordering::SeqCst);
                *counted = true;
                None
            }
            Endpoint::Client { options, .. } => options
                .proxy
                .as_ref()
                .map(|_| (options.host.clone(), options.port)),
        };
        self.session.state = if proxy.is_some() {
            ConnectionState::ProxyConnecting
        } else {
            ConnectionState::Connecting
        };
        debug!(peer = %self.session.peer_str(), role = %self.role(), state = %self.session.state, "connection made");

        let timeout = self.session.options.timeouts.open_handshake;
        self.session.arm(TimerKind::OpenHandshake, timeout);

        match proxy {
            Some((host, port)) => self.start_proxy_connect(&host, port),
            None if self.role() == Role::Client => self.start_handshake(),
            None => {}
        }
    }

    /// Octets arrived from the peer.
    pub fn data_received(&mut self, data: &[u8]) {
        let len = data.len() as u64;
        match self.session.state {
            ConnectionState::Open => self.session.track(|s| s.incoming_octets_wire_level += len),
            ConnectionState::Connecting | ConnectionState::ProxyConnecting => {
                self.session.track(|s| s.preopen_incoming_octets_wire_level += len);
            }
            _ => {}
        }
        self.receiver.buffer.extend_from_slice(data);
        self.consume_data();
    }

    fn consume_data(&mut self) {
        match self.session.state {
            ConnectionState::Open | ConnectionState::Closing => self.process_frames(),
            ConnectionState::ProxyConnecting => self.process_proxy_connect(),
            ConnectionState::Connecting => self.process_handshake(),
            ConnectionState::Closed => {
                debug!(peer = %self.session.peer_str(), "received data in Closed state");
            }
        }
    }

    /// The transport is gone, whoever closed it. Reports the outcome to
    /// the handler exactly once.
    pub fn connection_lost(&mut self) {
        if self.lost {
            return;
        }
        self.lost = true;
        self.session.timers.cancel_all();
        self.session.auto_ping_pending = None;
        self.session.state = ConnectionState::Closed;

        if let Endpoint::Server {
            connections,
            counted,
            ..
        } = &mut self.endpoint
        {
            if *counted {
                connections.fetch_sub(1, Ordering::SeqCst);
                *counted = false;
            }
        }
        if !self.made {
            return;
        }
        if self.was_serving_flash {
            debug!(peer = %self.session.peer_str(), "connection lost after serving Flash socket policy file");
            return;
        }

        let peer = self.session.peer_str().to_string();
        let close = &mut self.session.close;
        if close.was_clean {
            debug!(%peer, "connection closed cleanly");
            let code = close.remote_code;
            let reason = close.remote_reason.clone();
            self.handler.on_close(true, code, reason.as_deref());
        } else {
            if !close.dropped_by_me && close.was_not_clean_reason.is_none() {
                close.was_not_clean_reason = Some(
                    "peer dropped the TCP connection without previous WebSocket closing handshake"
                        .to_string(),
                );
            }
            let reason = format!(
                "connection was closed uncleanly ({})",
                close.was_not_clean_reason.as_deref().unwrap_or("None")
            );
            info!(%peer, %reason, "connection lost");
            self.handler.on_close(false, Some(1006), Some(&reason));
        }
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    /// Earliest instant at which [`handle_timeout`](Self::handle_timeout)
    /// has work to do.
    #[must_use]
    pub fn next_timeout(&self) -> Option<Instant> {
        self.session.timers.next()
    }

    /// Fire every timer that is due.
    pub fn handle_timeout(&mut self) {
        let now = self.session.now();
        while let Some(kind) = self.session.timers.pop_expired(now) {
            self.on_timer(kind);
        }
    }

    fn on_timer(&mut self, kind: TimerKind) {
        let session = &mut self.session;
        debug!(peer = %session.peer_str(), timer = %kind, state = %session.state, "timer fired");
        match kind {
            TimerKind::OpenHandshake => {
                if !session.state.is_opening() {
                    return;
                }
                session.close.open_handshake_timed_out = true;
                session.close.was_clean = false;
                session.close.was_not_clean_reason = Some(
                    "WebSocket opening handshake timeout (peer did not finish the opening handshake in time)"
                        .to_string(),
                );
                session.drop_transport(true);
            }
            TimerKind::CloseHandshake => {
                if session.state == ConnectionState::Closed {
                    return;
                }
                session.close.close_handshake_timed_out = true;
                session.close.was_clean = false;
                session.close.was_not_clean_reason = Some(
                    "WebSocket closing handshake timeout (peer did not finish the closing handshake in time)"
                        .to_string(),
                );
                session.drop_transport(true);
            }
            TimerKind::ServerConnectionDrop => {
                if session.state == ConnectionState::Closed {
                    return;
                }
                session.close.server_connection_drop_timed_out = true;
                session.close.was_clean = false;
                session.close.was_not_clean_reason = Some(
                    "WebSocket closing handshake timeout (server did not drop TCP connection in time)"
                        .to_string(),
                );
                session.drop_transport(true);
            }
            TimerKind::AutoPing => {
                if session.state == ConnectionState::Open {
                    session.send_auto_ping();
                }
            }
            TimerKind::AutoPingTimeout => {
                session.auto_ping_pending = None;
                session.close.auto_ping_timed_out = true;
                session.close.was_clean = false;
                session.close.was_not_clean_reason = Some(
                    "WebSocket ping timeout (peer did not respond with pong in time)".to_string(),
                );
                session.drop_transport(true);
            }
        }
    }

    // ------------------------------------------------------------------
    // Opening handshake
    // ------------------------------------------------------------------

    fn process_handshake(&mut self) {
        match self.role() {
            Role::Server => self.process_server_handshake(),
            Role::Client => self.process_client_handshake(),
        }
    }

    fn process_server_handshake(&mut self) {
        let Endpoint::Server {
            options,
            connections,
            ..
        } = &self.endpoint
        else {
            return;
        };
        let options = Arc::clone(options);
        let count = connections.load(Ordering::SeqCst);

        let outcome = process_request(
            &self.receiver.buffer,
            &options,
            self.session.peer_str(),
            count,
        );
        match outcome {
            RequestOutcome::Incomplete => {}
            RequestOutcome::FlashPolicy => {
                debug!(peer = %self.session.peer_str(), "sending Flash socket policy file");
                self.session
                    .send_data(options.flash_socket_policy.as_bytes(), false, None);
                self.was_serving_flash = true;
                self.session.drop_transport(false);
            }
            RequestOutcome::Status(reply) => {
                let server = options.server.as_deref();
                let response = match reply {
                    StatusReply::Page { redirect } => html_response(
                        server,
                        &status_page(redirect.as_ref().map(|(url, after)| (url.as_str(), *after))),
                    ),
                    StatusReply::Redirect(url) => redirect_response(server, &url),
                };
                self.session.send_data(&response, false, None);
                self.session.drop_transport(false);
            }
            RequestOutcome::Fail(failure) => {
                self.fail_server_handshake(failure.code, &failure.reason, &failure.headers);
            }
            RequestOutcome::Upgrade {
                request,
                key,
                consumed,
            } => {
                self.session.set_peer(request.peer.clone());
                self.receiver.buffer.advance(consumed);

                let accept = match self.handler.on_connect(&request) {
                    Ok(accept) => accept,
                    Err(deny) => {
                        self.fail_server_handshake(deny.code, &deny.reason, &[]);
                        return;
                    }
                };
                match build_response(&request, &key, &accept, &options) {
                    Ok(upgrade) => self.succeed_server_handshake(upgrade),
                    Err(failure) => {
                        self.fail_server_handshake(failure.code, &failure.reason, &failure.headers);
                    }
                }
            }
        }
    }

    fn fail_server_handshake(&mut self, code: u16, reason: &str, headers: &[(String, String)]) {
        info!(peer = %self.session.peer_str(), code, reason, "failing WebSocket opening handshake");
        self.session.close.was_not_clean_reason = Some(reason.to_string());
        let response = error_response(code, reason, headers);
        self.session.send_data(&response, false, None);
        self.session.drop_transport(false);
    }

    fn succeed_server_handshake(&mut self, upgrade: Upgrade) {
        self.session.send_data(&upgrade.response, false, None);
        self.open(upgrade.protocol, upgrade.compression);
        self.handler.on_open(&mut self.session);
        if !self.receiver.buffer.is_empty() {
            self.consume_data();
        }
    }

    /// Enter `Open` with the negotiated subprotocol and extension.
    fn open(&mut self, protocol: Option<String>, compression: Option<Box<dyn PerMessageCompress>>) {
        if let Some(codec) = &compression {
            self.receiver.validator.set_compression(Some(codec.name()));
        }
        self.session.protocol_in_use = protocol;
        self.session.compression = compression;
        self.session.state = ConnectionState::Open;
        self.session.cancel(TimerKind::OpenHandshake);
        self.receiver.reset_message();
        self.session.schedule_auto_ping();
        debug!(
            peer = %self.session.peer_str(),
            protocol = self.session.protocol_in_use.as_deref().unwrap_or(""),
            "WebSocket connection open"
        );
    }

    fn start_handshake(&mut self) {
        let Endpoint::Client { options, .. } = &self.endpoint else {
            return;
        };
        let options = Arc::clone(options);
        let request = self
            .handler
            .on_connecting()
            .unwrap_or_else(|| ConnectingRequest::from_options(&options));
        let key = generate_key();

        match build_request(&request, &key, &options) {
            Ok(bytes) => {
                self.session.send_data(&bytes, false, None);
                if let Endpoint::Client {
                    key: sent_key,
                    protocols,
                    ..
                } = &mut self.endpoint
                {
                    *sent_key = key;
                    *protocols = request.protocols;
                }
            }
            Err(e) => {
                error!(peer = %self.session.peer_str(), error = %e, "could not build opening handshake request");
                self.session.drop_transport(false);
            }
        }
    }

    fn process_client_handshake(&mut self) {
        let Endpoint::Client {
            options,
            key,
            protocols,
        } = &self.endpoint
        else {
            return;
        };
        let outcome = process_response(
            &self.receiver.buffer,
            key,
            protocols,
            options,
            self.session.peer_str(),
        );
        match outcome {
            ResponseOutcome::Incomplete => {}
            ResponseOutcome::Fail(reason) => {
                info!(peer = %self.session.peer_str(), %reason, "failing WebSocket opening handshake");
                self.session.close.was_not_clean_reason = Some(reason);
                self.session.drop_transport(true);
            }
            ResponseOutcome::Open {
                response,
                compression,
                consumed,
            } => {
                self.receiver.buffer.advance(consumed);
                self.open(response.protocol.clone(), compression);
                match self.handler.on_connect_response(&response) {
                    Ok(()) => self.handler.on_open(&mut self.session),
                    Err(reason) => {
                        self.session.fail(1000, &reason);
                        return;
                    }
                }
                if !self.receiver.buffer.is_empty() {
                    self.consume_data();
                }
            }
        }
    }

    fn start_proxy_connect(&mut self, host: &str, port: u16) {
        debug!(peer = %self.session.peer_str(), host, port, "sending HTTP CONNECT to proxy");
        let request = proxy_connect_request(host, port);
        self.session.send_data(&request, false, None);
    }

    fn process_proxy_connect(&mut self) {
        match process_proxy_response(&self.receiver.buffer) {
            ProxyOutcome::Incomplete => {}
            ProxyOutcome::Fail(reason) => {
                debug!(peer = %self.session.peer_str(), %reason, "failing proxy connect");
                self.session.close.was_not_clean_reason = Some(reason);
                self.session.drop_transport(true);
            }
            ProxyOutcome::Connected { consumed } => {
                debug!(peer = %self.session.peer_str(), "proxy tunnel established");
                self.receiver.buffer.advance(consumed);
                self.session.state = ConnectionState::Connecting;
                self.start_handshake();
                if !self.receiver.buffer.is_empty() {
                    self.consume_data();
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Which end we are.
    #[must_use]
    pub fn role(&self) -> Role {
        match self.endpoint {
            Endpoint::Server { .. } => Role::Server,
            Endpoint::Client { .. } => Role::Client,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.session.state
    }

    /// The sending side, usable as a [`WebSocketChannel`](crate::WebSocketChannel).
    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    /// Mutable access to the sending side.
    pub fn session_mut(&mut self) -> &mut Session<T> {
        &mut self.session
    }

    /// The application handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Mutable access to the application handler.
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.session.transport
    }

    /// Mutable access to the transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.session.transport
    }

    /// How the connection is being closed.
    pub fn close_status(&self) -> &CloseStatus {
        &self.session.close
    }

    /// Traffic counters.
    pub fn traffic_stats(&self) -> &TrafficStats {
        &self.session.stats
    }

    /// `true` once the connection answered a Flash policy file request.
    #[must_use]
    pub fn was_serving_flash_policy(&self) -> bool {
        self.was_serving_flash
    }
}
