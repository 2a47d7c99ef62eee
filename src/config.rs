//! Configuration for WebSocket connections.
//!
//! [`ProtocolOptions`] holds what both roles share; [`ServerOptions`] and
//! [`ClientOptions`] add the role specific parts. A factory keeps one of
//! them behind an `Arc` and every connection it creates works from that
//! snapshot, so later changes only affect new connections.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::extensions::{CompressionOffer, OfferAcceptor, ResponseAcceptor};
use crate::protocol::handshake::origin::{OriginPattern, compile_patterns};
use crate::uri::{Endpoint, parse_url};

/// Wire protocol versions a server can speak (Hybi-10 and RFC 6455).
pub const SUPPORTED_PROTOCOL_VERSIONS: [u8; 2] = [8, 13];

/// Draft versions a client can be configured for.
pub const SUPPORTED_DRAFT_VERSIONS: std::ops::RangeInclusive<u8> = 10..=18;

/// Draft version a client uses by default (RFC 6455).
pub const DEFAULT_DRAFT_VERSION: u8 = 18;

/// Wire version announced for a draft version.
#[must_use]
pub const fn draft_to_wire_version(draft: u8) -> Option<u8> {
    match draft {
        10..=12 => Some(8),
        13..=18 => Some(13),
        _ => None,
    }
}

/// Payload size limits for incoming data. `0` disables a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Limits {
    /// Maximum payload of a single frame.
    pub max_frame_payload_size: u64,

    /// Maximum payload of a message, summed over its frames.
    ///
    /// Also bounds outgoing messages.
    pub max_message_payload_size: u64,
}

impl Limits {
    /// Create limits. `0` means unlimited.
    #[must_use]
    pub const fn new(max_frame_payload_size: u64, max_message_payload_size: u64) -> Self {
        Self {
            max_frame_payload_size,
            max_message_payload_size,
        }
    }

    /// No limits.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self::new(0, 0)
    }

    /// `true` if a frame of `length` octets is over the limit.
    #[must_use]
    pub const fn frame_exceeds(&self, length: u64) -> bool {
        self.max_frame_payload_size > 0 && length > self.max_frame_payload_size
    }

    /// `true` if a message of `length` octets is over the limit.
    #[must_use]
    pub const fn message_exceeds(&self, length: u64) -> bool {
        self.max_message_payload_size > 0 && length > self.max_message_payload_size
    }

    /// Validate the size of a message about to be sent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<()> {
        if self.message_exceeds(size as u64) {
            Err(Error::MessageTooLarge {
                size,
                max: self.max_message_payload_size as usize,
            })
        } else {
            Ok(())
        }
    }
}

/// Handshake timers. A zero duration disables the timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Time the peer has to complete the opening handshake.
    ///
    /// Default: 5 seconds
    pub open_handshake: Duration,

    /// Time the peer has to answer our close frame.
    ///
    /// Default: 1 second
    pub close_handshake: Duration,

    /// Time a client waits for the server to drop TCP after the closing
    /// handshake.
    ///
    /// Default: 1 second
    pub server_connection_drop: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            open_handshake: Duration::from_secs(5),
            close_handshake: Duration::from_secs(1),
            server_connection_drop: Duration::from_secs(1),
        }
    }
}

impl Timeouts {
    /// Create new timeouts with custom values.
    #[must_use]
    pub const fn new(
        open_handshake: Duration,
        close_handshake: Duration,
        server_connection_drop: Duration,
    ) -> Self {
        Self {
            open_handshake,
            close_handshake,
            server_connection_drop,
        }
    }

    /// All timers disabled.
    #[must_use]
    pub const fn disabled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, Duration::ZERO)
    }
}

/// Keepalive pings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoPing {
    /// Time between pings. Zero disables them.
    pub interval: Duration,
    /// Time the peer has to answer. Zero waits forever.
    pub timeout: Duration,
    /// Ping payload size, 4 to 125 octets.
    pub size: usize,
}

impl Default for AutoPing {
    fn default() -> Self {
        Self {
            interval: Duration::ZERO,
            timeout: Duration::ZERO,
            size: 4,
        }
    }
}

impl AutoPing {
    /// Ping every `interval`, dropping the connection if no pong arrives
    /// within `timeout`.
    #[must_use]
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            size: 4,
        }
    }

    /// Set the payload size.
    #[must_use]
    pub const fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }
}

/// Options shared by clients and servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolOptions {
    /// Validate incoming text messages as UTF-8.
    ///
    /// Default: true
    pub utf8_validate_incoming: bool,

    /// XOR masks onto payloads. Turning this off only makes sense for
    /// testing peers.
    ///
    /// Default: true
    pub apply_mask: bool,

    /// Incoming payload limits.
    pub limits: Limits,

    /// Split outgoing messages into frames of at most this many octets.
    /// `0` sends every message as a single frame.
    ///
    /// Default: 0
    pub auto_fragment_size: usize,

    /// Drop TCP right away when failing a connection instead of running
    /// the closing handshake.
    ///
    /// Default: true
    pub fail_by_drop: bool,

    /// Answer a close with the peer's code and reason instead of 1000.
    ///
    /// Default: false
    pub echo_close_code_reason: bool,

    /// Handshake timers.
    pub timeouts: Timeouts,

    /// Keepalive pings.
    pub auto_ping: AutoPing,

    /// Count traffic in [`TrafficStats`](crate::TrafficStats).
    ///
    /// Default: true
    pub track_traffic_stats: bool,
}

impl Default for ProtocolOptions {
    fn default() -> Self {
        Self {
            utf8_validate_incoming: true,
            apply_mask: true,
            limits: Limits::default(),
            auto_fragment_size: 0,
            fail_by_drop: true,
            echo_close_code_reason: false,
            timeouts: Timeouts::default(),
            auto_ping: AutoPing::default(),
            track_traffic_stats: true,
        }
    }
}

impl ProtocolOptions {
    /// Create options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set incoming UTF-8 validation.
    #[must_use]
    pub const fn with_utf8_validate_incoming(mut self, validate: bool) -> Self {
        self.utf8_validate_incoming = validate;
        self
    }

    /// Set whether masks are applied.
    #[must_use]
    pub const fn with_apply_mask(mut self, apply: bool) -> Self {
        self.apply_mask = apply;
        self
    }

    /// Set payload limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the automatic fragment size.
    #[must_use]
    pub const fn with_auto_fragment_size(mut self, size: usize) -> Self {
        self.auto_fragment_size = size;
        self
    }

    /// Set fail-by-drop.
    #[must_use]
    pub const fn with_fail_by_drop(mut self, fail_by_drop: bool) -> Self {
        self.fail_by_drop = fail_by_drop;
        self
    }

    /// Set close code echoing.
    #[must_use]
    pub const fn with_echo_close_code_reason(mut self, echo: bool) -> Self {
        self.echo_close_code_reason = echo;
        self
    }

    /// Set handshake timers.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set keepalive pings.
    #[must_use]
    pub const fn with_auto_ping(mut self, auto_ping: AutoPing) -> Self {
        self.auto_ping = auto_ping;
        self
    }

    /// Set traffic accounting.
    #[must_use]
    pub const fn with_track_traffic_stats(mut self, track: bool) -> Self {
        self.track_traffic_stats = track;
        self
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] if the auto-ping size is outside 4..=125.
    pub fn validate(&self) -> Result<()> {
        if !(4..=125).contains(&self.auto_ping.size) {
            return Err(Error::InvalidOption(format!(
                "invalid auto ping size {} (must be 4..=125)",
                self.auto_ping.size
            )));
        }
        Ok(())
    }
}

/// Default Flash socket policy file, NUL terminated.
pub const DEFAULT_FLASH_SOCKET_POLICY: &str = "<cross-domain-policy>\n     <allow-access-from domain=\"*\" to-ports=\"*\" />\n</cross-domain-policy>\0";

/// Default `Server` header value.
pub const DEFAULT_SERVER: &str = concat!("sansws/", env!("CARGO_PKG_VERSION"));

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Shared options.
    pub protocol: ProtocolOptions,

    /// Accepted `Sec-WebSocket-Version` values, a subset of 8 and 13.
    pub versions: Vec<u8>,

    /// Answer a plain HTTP GET with a status page or redirect.
    ///
    /// Default: true
    pub web_status: bool,

    /// Fail on unmasked client frames.
    ///
    /// Default: true
    pub require_masked_client_frames: bool,

    /// Mask frames sent to the client.
    ///
    /// Default: false
    pub mask_server_frames: bool,

    /// Chooses among the client's compression offers. `None` declines them all.
    pub per_message_compression_accept: Option<OfferAcceptor>,

    /// Answer `<policy-file-request/>` with [`flash_socket_policy`](Self::flash_socket_policy).
    ///
    /// Default: false
    pub serve_flash_socket_policy: bool,

    /// Flash socket policy file.
    pub flash_socket_policy: String,

    /// Compiled allowed-origin wildcards. Default: `*`.
    pub allowed_origins: Vec<OriginPattern>,

    /// Accept the `null` origin.
    ///
    /// Default: true
    pub allow_null_origin: bool,

    /// Maximum concurrent connections, `0` for no limit.
    pub max_connections: usize,

    /// Number of trusted proxies whose `X-Forwarded-For` entries are used
    /// as the peer address.
    pub trust_x_forwarded_for: usize,

    /// `Server` header. `None` omits it.
    pub server: Option<String>,

    /// Extra headers sent with every handshake response.
    pub headers: Vec<(String, String)>,

    /// Port clients must name in `Host`, when behind a port mapping.
    pub external_port: Option<u16>,

    /// Whether the server is reached over TLS.
    pub secure: bool,

    /// Port the server listens on.
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            protocol: ProtocolOptions::default(),
            versions: SUPPORTED_PROTOCOL_VERSIONS.to_vec(),
            web_status: true,
            require_masked_client_frames: true,
            mask_server_frames: false,
            per_message_compression_accept: None,
            serve_flash_socket_policy: false,
            flash_socket_policy: DEFAULT_FLASH_SOCKET_POLICY.to_string(),
            allowed_origins: compile_patterns(&["*"]).unwrap_or_default(),
            allow_null_origin: true,
            max_connections: 0,
            trust_x_forwarded_for: 0,
            server: Some(DEFAULT_SERVER.to_string()),
            headers: Vec::new(),
            external_port: None,
            secure: false,
            port: 80,
        }
    }
}

impl ServerOptions {
    /// Create options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take scheme and port from the URL the server is reachable at.
    ///
    /// # Errors
    ///
    /// Fails for invalid URLs and URLs with query parameters.
    pub fn with_url(mut self, url: &str) -> Result<Self> {
        let url = parse_url(url)?;
        if !url.params.is_empty() {
            return Err(Error::InvalidUrl(
                "query parameters specified for server WebSocket URL".into(),
            ));
        }
        self.secure = url.secure;
        self.port = url.port().unwrap_or(if url.secure { 443 } else { 80 });
        Ok(self)
    }

    /// Set shared options.
    #[must_use]
    pub fn with_protocol(mut self, protocol: ProtocolOptions) -> Self {
        self.protocol = protocol;
        self
    }

    /// Set accepted versions.
    #[must_use]
    pub fn with_versions(mut self, versions: Vec<u8>) -> Self {
        self.versions = versions;
        self
    }

    /// Set the status page.
    #[must_use]
    pub fn with_web_status(mut self, enabled: bool) -> Self {
        self.web_status = enabled;
        self
    }

    /// Set whether client frames must be masked.
    #[must_use]
    pub fn with_require_masked_client_frames(mut self, require: bool) -> Self {
        self.require_masked_client_frames = require;
        self
    }

    /// Set whether to mask outgoing frames.
    #[must_use]
    pub fn with_mask_server_frames(mut self, mask: bool) -> Self {
        self.mask_server_frames = mask;
        self
    }

    /// Set the compression offer selector.
    #[must_use]
    pub fn with_compression_accept(mut self, accept: OfferAcceptor) -> Self {
        self.per_message_compression_accept = Some(accept);
        self
    }

    /// Serve a Flash socket policy file.
    #[must_use]
    pub fn with_flash_socket_policy(mut self, policy: Option<String>) -> Self {
        self.serve_flash_socket_policy = true;
        if let Some(policy) = policy {
            self.flash_socket_policy = policy;
        }
        self
    }

    /// Set allowed origins as wildcards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] if a pattern does not compile.
    pub fn with_allowed_origins<S: AsRef<str>>(mut self, origins: &[S]) -> Result<Self> {
        self.allowed_origins = compile_patterns(origins)?;
        Ok(self)
    }

    /// Set whether the `null` origin is accepted.
    #[must_use]
    pub fn with_allow_null_origin(mut self, allow: bool) -> Self {
        self.allow_null_origin = allow;
        self
    }

    /// Set the connection limit.
    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the number of trusted proxies.
    #[must_use]
    pub fn with_trust_x_forwarded_for(mut self, hops: usize) -> Self {
        self.trust_x_forwarded_for = hops;
        self
    }

    /// Set the `Server` header.
    #[must_use]
    pub fn with_server(mut self, server: Option<String>) -> Self {
        self.server = server;
        self
    }

    /// Add a response header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the externally visible port.
    #[must_use]
    pub fn with_external_port(mut self, port: Option<u16>) -> Self {
        self.external_port = port;
        self
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] for unsupported versions or a bad
    /// auto-ping size.
    pub fn validate(&self) -> Result<()> {
        self.protocol.validate()?;
        if self.versions.is_empty() {
            return Err(Error::InvalidOption("no WebSocket protocol version enabled".into()));
        }
        if let Some(v) = self
            .versions
            .iter()
            .find(|v| !SUPPORTED_PROTOCOL_VERSIONS.contains(v))
        {
            return Err(Error::InvalidOption(format!(
                "invalid WebSocket protocol version {v} (allowed values: {SUPPORTED_PROTOCOL_VERSIONS:?})"
            )));
        }
        Ok(())
    }
}

/// Explicit HTTP proxy for a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proxy {
    /// Proxy host.
    pub host: String,
    /// Proxy port.
    pub port: u16,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Shared options.
    pub protocol: ProtocolOptions,

    /// Draft version, 10 to 18. Decides the wire version and origin header.
    ///
    /// Default: 18
    pub version: u8,

    /// Accept masked frames from the server.
    ///
    /// Default: false
    pub accept_masked_server_frames: bool,

    /// Mask frames sent to the server.
    ///
    /// Default: true
    pub mask_client_frames: bool,

    /// Compression extensions to offer, in order of preference.
    pub per_message_compression_offers: Vec<CompressionOffer>,

    /// Decides whether to go along with the server's selection. `None`
    /// fails the handshake if the server selects anything.
    pub per_message_compression_accept: Option<ResponseAcceptor>,

    /// Whether the URL was `wss`.
    pub secure: bool,

    /// Host named in the request.
    pub host: String,

    /// Port named in the request.
    pub port: u16,

    /// Path and query of the request.
    pub resource: String,

    /// `Origin` to announce.
    pub origin: Option<String>,

    /// Subprotocols to offer.
    pub protocols: Vec<String>,

    /// `User-Agent` header. `None` omits it.
    pub useragent: Option<String>,

    /// Extra request headers.
    pub headers: Vec<(String, String)>,

    /// Tunnel through this proxy with HTTP CONNECT.
    pub proxy: Option<Proxy>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            protocol: ProtocolOptions::default(),
            version: DEFAULT_DRAFT_VERSION,
            accept_masked_server_frames: false,
            mask_client_frames: true,
            per_message_compression_offers: Vec::new(),
            per_message_compression_accept: None,
            secure: false,
            host: "localhost".to_string(),
            port: 80,
            resource: "/".to_string(),
            origin: None,
            protocols: Vec::new(),
            useragent: Some(DEFAULT_SERVER.to_string()),
            headers: Vec::new(),
            proxy: None,
        }
    }
}

impl ClientOptions {
    /// Create options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Target a `ws://` or `wss://` URL.
    ///
    /// # Errors
    ///
    /// Fails for invalid URLs. Unix socket URLs are accepted and announce
    /// the scheme's default port.
    pub fn with_url(mut self, url: &str) -> Result<Self> {
        let url = parse_url(url)?;
        self.secure = url.secure;
        self.port = match url.endpoint {
            Endpoint::Tcp(port) => port,
            Endpoint::Unix(_) => {
                if url.secure {
                    443
                } else {
                    80
                }
            }
        };
        self.host = url.host;
        self.resource = url.resource;
        Ok(self)
    }

    /// Set shared options.
    #[must_use]
    pub fn with_protocol(mut self, protocol: ProtocolOptions) -> Self {
        self.protocol = protocol;
        self
    }

    /// Set the draft version.
    #[must_use]
    pub fn with_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    /// Set whether masked server frames are accepted.
    #[must_use]
    pub fn with_accept_masked_server_frames(mut self, accept: bool) -> Self {
        self.accept_masked_server_frames = accept;
        self
    }

    /// Set whether to mask outgoing frames.
    #[must_use]
    pub fn with_mask_client_frames(mut self, mask: bool) -> Self {
        self.mask_client_frames = mask;
        self
    }

    /// Add a compression offer.
    #[must_use]
    pub fn with_compression_offer(mut self, offer: CompressionOffer) -> Self {
        self.per_message_compression_offers.push(offer);
        self
    }

    /// Set the compression response acceptor.
    #[must_use]
    pub fn with_compression_accept(mut self, accept: ResponseAcceptor) -> Self {
        self.per_message_compression_accept = Some(accept);
        self
    }

    /// Set the origin.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Set offered subprotocols.
    #[must_use]
    pub fn with_protocols<S: Into<String>>(mut self, protocols: impl IntoIterator<Item = S>) -> Self {
        self.protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// Set the `User-Agent` header.
    #[must_use]
    pub fn with_useragent(mut self, useragent: Option<String>) -> Self {
        self.useragent = useragent;
        self
    }

    /// Add a request header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Tunnel through an HTTP proxy.
    #[must_use]
    pub fn with_proxy(mut self, host: impl Into<String>, port: u16) -> Self {
        self.proxy = Some(Proxy {
            host: host.into(),
            port,
        });
        self
    }

    /// Wire version matching [`version`](Self::version).
    #[must_use]
    pub const fn protocol_version(&self) -> u8 {
        match draft_to_wire_version(self.version) {
            Some(v) => v,
            None => 13,
        }
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] for an unknown draft version or a
    /// bad auto-ping size.
    pub fn validate(&self) -> Result<()> {
        self.protocol.validate()?;
        if !SUPPORTED_DRAFT_VERSIONS.contains(&self.version) {
            return Err(Error::InvalidOption(format!(
                "invalid WebSocket draft version {} (allowed values: {SUPPORTED_DRAFT_VERSIONS:?})",
                self.version
            )));
        }
        Ok(())
    }
}
