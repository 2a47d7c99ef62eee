//! Server side of the opening handshake.

use tracing::debug;
use url::Url;

use super::origin::Origin;
use super::{
    Accept, ConnectionRequest, HttpHeaders, compute_accept_key, find_header_end,
    validate_header_value,
};
use crate::config::ServerOptions;
use crate::error::Error;
use crate::extensions::{CompressionOffer, ExtensionOffer, PerMessageCompress};
use crate::uri::parse_query;

const FLASH_POLICY_REQUEST: &[u8] = b"<policy-file-request/>\0";
const BASE64_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789+/";

/// An opening handshake the server refuses, answered with an HTTP error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeFailure {
    /// HTTP status code.
    pub code: u16,
    /// Reason phrase, also recorded as the close reason.
    pub reason: String,
    /// Extra response headers.
    pub headers: Vec<(String, String)>,
}

impl HandshakeFailure {
    /// A 400 Bad Request.
    #[must_use]
    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::new(400, reason)
    }

    /// A failure with any status code.
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            headers: Vec::new(),
        }
    }
}

/// Response to a plain HTTP GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusReply {
    /// Render the status page, optionally refreshing to a URL after some seconds.
    Page {
        /// Target and delay of a meta refresh.
        redirect: Option<(String, u64)>,
    },
    /// Answer with a 303 redirect.
    Redirect(String),
}

/// Result of looking at the buffered request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The request head is not complete yet.
    Incomplete,
    /// A valid upgrade request. `consumed` octets belong to the head.
    Upgrade {
        /// Parsed request.
        request: ConnectionRequest,
        /// Client key, for the accept header.
        key: String,
        /// Length of the request head.
        consumed: usize,
    },
    /// A plain GET while the status page is enabled.
    Status(StatusReply),
    /// A Flash socket policy file request.
    FlashPolicy,
    /// Refuse the handshake.
    Fail(HandshakeFailure),
}

fn fail(reason: impl Into<String>) -> RequestOutcome {
    RequestOutcome::Fail(HandshakeFailure::bad_request(reason))
}

fn fail_with(code: u16, reason: impl Into<String>) -> RequestOutcome {
    RequestOutcome::Fail(HandshakeFailure::new(code, reason))
}

/// Process a client's opening handshake request.
///
/// `connection_count` includes this connection.
#[must_use]
pub fn process_request(
    buf: &[u8],
    options: &ServerOptions,
    peer: &str,
    connection_count: usize,
) -> RequestOutcome {
    let Some(end) = find_header_end(buf) else {
        if options.serve_flash_socket_policy
            && buf
                .windows(FLASH_POLICY_REQUEST.len())
                .any(|w| w == FLASH_POLICY_REQUEST)
        {
            debug!(peer, "received Flash Socket Policy File request");
            return RequestOutcome::FlashPolicy;
        }
        return RequestOutcome::Incomplete;
    };

    let (request_line, headers) = HttpHeaders::parse(&buf[..end]);
    debug!(peer, status = %request_line, "received HTTP request in opening handshake");

    let mut peer = peer.to_string();
    if options.trust_x_forwarded_for > 0 {
        if let Some(forwarded) = headers.get("x-forwarded-for") {
            let addresses: Vec<&str> = forwarded.split(',').map(str::trim).collect();
            let skip = addresses.len().saturating_sub(options.trust_x_forwarded_for);
            if let Some(trusted) = addresses.get(skip) {
                peer = (*trusted).to_string();
            }
        }
    }

    // Request line
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() != 3 {
        return fail(format!("Bad HTTP request status line '{request_line}'"));
    }
    if parts[0] != "GET" {
        return fail_with(405, format!("HTTP method '{}' not allowed", parts[0]));
    }
    if parts[2] != "HTTP/1.1" {
        return fail_with(505, format!("Unsupported HTTP version '{}'", parts[2]));
    }

    // Request URI
    let uri = parts[1];
    let Ok(resource) = Url::parse("http://localhost/").and_then(|base| base.join(uri)) else {
        return fail(format!("Bad HTTP request resource - could not parse '{uri}'"));
    };
    if let Some(fragment) = resource.fragment() {
        if !fragment.is_empty() {
            return fail(format!(
                "HTTP requested resource contains a fragment identifier '{fragment}'"
            ));
        }
    }
    let path = resource.path().to_string();
    let params = parse_query(resource.query().unwrap_or_default());

    // Host
    let Some(host_header) = headers.get("host") else {
        return fail("HTTP Host header missing in opening handshake request");
    };
    if headers.count("host") > 1 {
        return fail("HTTP Host header appears more than once in opening handshake request");
    }
    let mut host = host_header.trim().to_string();
    if host.contains(':') && !host.ends_with(']') {
        if let Some((h, p)) = host.rsplit_once(':') {
            let Ok(port) = p.trim().parse::<u16>() else {
                return fail(format!("invalid port '{}' in HTTP Host header '{host}'", p.trim()));
            };
            if let Some(external) = options.external_port {
                if port != external {
                    return fail(format!(
                        "port {port} in HTTP Host header '{host}' does not match server listening port {external}"
                    ));
                }
            }
            host = h.to_string();
        }
    }

    // Upgrade
    if !headers.contains("upgrade") {
        if options.web_status {
            return RequestOutcome::Status(status_reply(&params));
        }
        return fail_with(426, "HTTP Upgrade header missing");
    }
    if !headers.has_token("upgrade", "websocket") {
        return fail(format!(
            "HTTP Upgrade headers do not include 'websocket' value (case-insensitive) : {}",
            headers.get("upgrade").unwrap_or_default()
        ));
    }

    // Connection
    let Some(connection) = headers.get("connection") else {
        return fail("HTTP Connection header missing");
    };
    if !headers.has_token("connection", "upgrade") {
        return fail(format!(
            "HTTP Connection headers do not include 'upgrade' value (case-insensitive) : {connection}"
        ));
    }

    // Sec-WebSocket-Version
    let Some(version_header) = headers.get("sec-websocket-version") else {
        return fail("WebSocket connection denied - Hixie76 protocol not supported.");
    };
    if headers.count("sec-websocket-version") > 1 {
        return fail(
            "HTTP Sec-WebSocket-Version header appears more than once in opening handshake request",
        );
    }
    let Ok(version) = version_header.trim().parse::<u8>() else {
        return fail(format!(
            "could not parse HTTP Sec-WebSocket-Version header '{version_header}' in opening handshake request"
        ));
    };
    if !options.versions.contains(&version) {
        let mut supported = options.versions.clone();
        supported.sort_unstable_by(|a, b| b.cmp(a));
        let list = supported
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let mut failure = HandshakeFailure::bad_request(format!(
            "WebSocket version {version} not supported (supported versions: {list})"
        ));
        failure
            .headers
            .push(("Sec-WebSocket-Version".to_string(), list));
        return RequestOutcome::Fail(failure);
    }

    // Sec-WebSocket-Protocol
    let mut protocols: Vec<String> = Vec::new();
    if let Some(offered) = headers.get("sec-websocket-protocol") {
        for p in offered.split(',').map(str::trim) {
            if protocols.iter().any(|q| q == p) {
                return fail(format!(
                    "duplicate protocol '{p}' specified in HTTP Sec-WebSocket-Protocol header"
                ));
            }
            protocols.push(p.to_string());
        }
    }

    // Origin
    let origin_key = if version < 13 {
        "sec-websocket-origin"
    } else {
        "origin"
    };
    let mut origin = String::new();
    if let Some(value) = headers.get(origin_key) {
        if headers.count(origin_key) > 1 {
            return fail("HTTP Origin header appears more than once in opening handshake request");
        }
        origin = value.trim().to_string();
        let parsed = match Origin::parse(&origin) {
            Ok(parsed) => parsed,
            Err(Error::InvalidHandshake(msg)) => {
                return fail(format!("HTTP Origin header invalid: {msg}"));
            }
            Err(e) => return fail(format!("HTTP Origin header invalid: {e}")),
        };
        let allowed = match parsed {
            Origin::Null if options.allow_null_origin => true,
            ref other => other.is_allowed(&options.allowed_origins),
        };
        if !allowed {
            return fail(format!(
                "WebSocket connection denied: origin '{origin}' not allowed"
            ));
        }
    }

    // Sec-WebSocket-Key
    let Some(key) = headers.get("sec-websocket-key") else {
        return fail("HTTP Sec-WebSocket-Key header missing");
    };
    if headers.count("sec-websocket-key") > 1 {
        return fail(
            "HTTP Sec-WebSocket-Key header appears more than once in opening handshake request",
        );
    }
    let key = key.trim().to_string();
    if !key.is_ascii() || key.len() != 24 {
        return fail(format!(
            "bad Sec-WebSocket-Key (length must be 24 ASCII chars) '{key}'"
        ));
    }
    if !key.ends_with("==") {
        return fail(format!(
            "bad Sec-WebSocket-Key (invalid base64 encoding) '{key}'"
        ));
    }
    if let Some(c) = key[..22].chars().find(|c| !BASE64_ALPHABET.contains(*c)) {
        return fail(format!(
            "bad character '{c}' in Sec-WebSocket-Key (invalid base64 encoding) '{key}'"
        ));
    }

    // Sec-WebSocket-Extensions
    let mut extensions = Vec::new();
    if let Some(offered) = headers.get("sec-websocket-extensions") {
        if headers.count("sec-websocket-extensions") > 1 {
            return fail(
                "HTTP Sec-WebSocket-Extensions header appears more than once in opening handshake request",
            );
        }
        extensions = ExtensionOffer::parse_header(offered);
    }

    if options.max_connections > 0 && connection_count > options.max_connections {
        return fail_with(503, "maximum number of connections reached");
    }

    RequestOutcome::Upgrade {
        request: ConnectionRequest {
            peer,
            headers,
            host,
            path,
            params,
            version,
            origin,
            protocols,
            extensions,
        },
        key,
        consumed: end,
    }
}

fn status_reply(params: &crate::uri::Params) -> StatusReply {
    let first = |name: &str| params.get(name).and_then(|v| v.first());
    let Some(target) = first("redirect") else {
        return StatusReply::Page { redirect: None };
    };
    let url = Url::parse(target).map_or_else(|_| target.clone(), |u| u.to_string());
    match first("after").and_then(|a| a.parse::<u64>().ok()) {
        Some(after) => StatusReply::Page {
            redirect: Some((url, after)),
        },
        None => StatusReply::Redirect(url),
    }
}

/// Everything a server needs to switch to `Open`.
pub struct Upgrade {
    /// The 101 response.
    pub response: Vec<u8>,
    /// Subprotocol in use.
    pub protocol: Option<String>,
    /// Compression codec, if an offer was accepted.
    pub compression: Option<Box<dyn PerMessageCompress>>,
}

/// Negotiate extensions and build the 101 response.
///
/// # Errors
///
/// Returns the failure to answer with if an offer is malformed, the
/// accepted protocol was not offered, or a header value is unsafe.
pub fn build_response(
    request: &ConnectionRequest,
    key: &str,
    accept: &Accept,
    options: &ServerOptions,
) -> Result<Upgrade, HandshakeFailure> {
    if let Some(protocol) = &accept.protocol {
        if !request.protocols.contains(protocol) {
            return Err(HandshakeFailure::new(
                500,
                "protocol accepted must be from the list client sent or None",
            ));
        }
    }

    let mut offers = Vec::new();
    for extension in &request.extensions {
        debug!(
            extension = %extension.name,
            params = %extension,
            "parsed WebSocket extension"
        );
        match CompressionOffer::parse(extension) {
            Ok(Some(offer)) => offers.push(offer),
            Ok(None) => debug!(
                extension = %extension.name,
                "client requested extension we don't support or which is not activated"
            ),
            Err(Error::InvalidExtension(msg)) => return Err(HandshakeFailure::bad_request(msg)),
            Err(e) => return Err(HandshakeFailure::bad_request(e.to_string())),
        }
    }

    let mut compression = None;
    let mut extension_response = Vec::new();
    if !offers.is_empty() {
        let selected = options
            .per_message_compression_accept
            .as_ref()
            .and_then(|acceptor| acceptor.accept(&offers));
        match selected {
            Some(selected) => {
                let codec = selected
                    .into_codec(true)
                    .map_err(|e| HandshakeFailure::new(500, e.to_string()))?;
                extension_response.push(selected.extension_string());
                compression = Some(codec);
            }
            None => debug!("client requested permessage-compress extension, but we did not accept any offer"),
        }
    }

    let mut response = String::from("HTTP/1.1 101 Switching Protocols\r\n");
    if let Some(server) = options.server.as_deref().filter(|s| !s.is_empty()) {
        response.push_str(&format!("Server: {server}\r\n"));
    }
    response.push_str("Upgrade: WebSocket\r\n");
    response.push_str("Connection: Upgrade\r\n");
    for (name, value) in options.headers.iter().chain(accept.headers.iter()) {
        validate_header_value(name, value)
            .map_err(|e| HandshakeFailure::new(500, e.to_string()))?;
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    if let Some(protocol) = &accept.protocol {
        response.push_str(&format!("Sec-WebSocket-Protocol: {protocol}\r\n"));
    }
    response.push_str(&format!(
        "Sec-WebSocket-Accept: {}\r\n",
        compute_accept_key(key)
    ));
    if !extension_response.is_empty() {
        response.push_str(&format!(
            "Sec-WebSocket-Extensions: {}\r\n",
            extension_response.join(", ")
        ));
    }
    response.push_str("\r\n");

    Ok(Upgrade {
        response: response.into_bytes(),
        protocol: accept.protocol.clone(),
        compression,
    })
}

/// `HTTP/1.1 {code} {reason}` with optional headers and no body.
#[must_use]
pub fn error_response(code: u16, reason: &str, headers: &[(String, String)]) -> Vec<u8> {
    let mut response = format!("HTTP/1.1 {code} {reason}\r\n");
    for (name, value) in headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str("\r\n");
    response.into_bytes()
}

/// A 200 response carrying an HTML page.
#[must_use]
pub fn html_response(server: Option<&str>, html: &str) -> Vec<u8> {
    let mut response = String::from("HTTP/1.1 200 OK\r\n");
    if let Some(server) = server.filter(|s| !s.is_empty()) {
        response.push_str(&format!("Server: {server}\r\n"));
    }
    response.push_str("Content-Type: text/html; charset=UTF-8\r\n");
    response.push_str(&format!("Content-Length: {}\r\n", html.len()));
    response.push_str("\r\n");
    response.push_str(html);
    response.into_bytes()
}

/// A 303 redirect to `url`.
#[must_use]
pub fn redirect_response(server: Option<&str>, url: &str) -> Vec<u8> {
    let mut response = String::from("HTTP/1.1 303\r\n");
    if let Some(server) = server.filter(|s| !s.is_empty()) {
        response.push_str(&format!("Server: {server}\r\n"));
    }
    response.push_str(&format!("Location: {url}\r\n"));
    response.push_str("\r\n");
    response.into_bytes()
}

/// The status page shown to plain HTTP clients.
#[must_use]
pub fn status_page(redirect: Option<(&str, u64)>) -> String {
    let refresh = redirect.map_or_else(String::new, |(url, after)| {
        format!("<meta http-equiv=\"refresh\" content=\"{after};URL='{url}'\">")
    });
    format!(
        "<!DOCTYPE html>\n<html>\n   <head>\n      {refresh}\n   </head>\n   <body>\n      <h1>sansws {}</h1>\n      <p>\n         This is a <b>WebSocket endpoint</b>, not a web server.\n      </p>\n      <p>\n         Talk to it using the <a href=\"https://www.rfc-editor.org/rfc/rfc6455\">WebSocket</a> protocol.\n      </p>\n   </body>\n</html>\n",
        env!("CARGO_PKG_VERSION")
    )
}
