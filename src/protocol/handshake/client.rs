//! Client side of the opening handshake, including the HTTP CONNECT
//! exchange with an explicit proxy.

use tracing::debug;

use super::{
    ConnectingRequest, ConnectionResponse, HttpHeaders, compute_accept_key, find_header_end,
    validate_header_value,
};
use crate::config::ClientOptions;
use crate::error::{Error, Result};
use crate::extensions::{CompressionResponse, ExtensionOffer, PerMessageCompress};

impl ConnectingRequest {
    /// The request a client sends by default.
    #[must_use]
    pub fn from_options(options: &ClientOptions) -> Self {
        Self {
            host: options.host.clone(),
            port: options.port,
            resource: options.resource.clone(),
            headers: options.headers.clone(),
            useragent: options.useragent.clone(),
            origin: options.origin.clone(),
            protocols: options.protocols.clone(),
        }
    }
}

/// Build the opening handshake request.
///
/// # Errors
///
/// Returns [`Error::InvalidHandshake`] if a header value contains CR or LF.
pub fn build_request(
    request: &ConnectingRequest,
    key: &str,
    options: &ClientOptions,
) -> Result<Vec<u8>> {
    let version = options.protocol_version();
    let mut out = format!("GET {} HTTP/1.1\r\n", request.resource);

    if let Some(useragent) = request.useragent.as_deref().filter(|u| !u.is_empty()) {
        validate_header_value("User-Agent", useragent)?;
        out.push_str(&format!("User-Agent: {useragent}\r\n"));
    }
    validate_header_value("Host", &request.host)?;
    out.push_str(&format!("Host: {}:{}\r\n", request.host, request.port));
    out.push_str("Upgrade: WebSocket\r\n");
    out.push_str("Connection: Upgrade\r\n");
    // keeps some proxies from stripping the Upgrade header
    out.push_str("Pragma: no-cache\r\n");
    out.push_str("Cache-Control: no-cache\r\n");

    for (name, value) in &request.headers {
        validate_header_value(name, value)?;
        out.push_str(&format!("{name}: {value}\r\n"));
    }

    out.push_str(&format!("Sec-WebSocket-Key: {key}\r\n"));

    if let Some(origin) = request.origin.as_deref().filter(|o| !o.is_empty()) {
        validate_header_value("Origin", origin)?;
        if version > 10 {
            out.push_str(&format!("Origin: {origin}\r\n"));
        } else {
            out.push_str(&format!("Sec-WebSocket-Origin: {origin}\r\n"));
        }
    }

    if !request.protocols.is_empty() {
        let protocols = request.protocols.join(",");
        validate_header_value("Sec-WebSocket-Protocol", &protocols)?;
        out.push_str(&format!("Sec-WebSocket-Protocol: {protocols}\r\n"));
    }

    let extensions: Vec<String> = options
        .per_message_compression_offers
        .iter()
        .map(|offer| offer.extension_string())
        .collect();
    if !extensions.is_empty() {
        out.push_str(&format!(
            "Sec-WebSocket-Extensions: {}\r\n",
            extensions.join(", ")
        ));
    }

    out.push_str(&format!("Sec-WebSocket-Version: {version}\r\n"));
    out.push_str("\r\n");
    Ok(out.into_bytes())
}

/// Result of looking at the buffered handshake response.
pub enum ResponseOutcome {
    /// The response head is not complete yet.
    Incomplete,
    /// The server accepted. `consumed` octets belong to the head.
    Open {
        /// What the server agreed to.
        response: ConnectionResponse,
        /// Compression codec, if negotiated.
        compression: Option<Box<dyn PerMessageCompress>>,
        /// Length of the response head.
        consumed: usize,
    },
    /// The handshake failed.
    Fail(String),
}

/// Split a status line, check the HTTP version against `versions` and
/// parse the code.
fn status_code<'a>(
    status_line: &'a str,
    versions: &[&str],
) -> std::result::Result<(u16, Vec<&'a str>), String> {
    let parts: Vec<&str> = status_line.split_whitespace().collect();
    if parts.len() < 2 {
        return Err(format!("Bad HTTP response status line '{status_line}'"));
    }
    if !versions.contains(&parts[0]) {
        return Err(format!("Unsupported HTTP version ('{}')", parts[0]));
    }
    let code = parts[1]
        .parse::<u16>()
        .map_err(|_| format!("Bad HTTP status code ('{}')", parts[1]))?;
    Ok((code, parts))
}

fn detail(parts: &[&str]) -> String {
    if parts.len() > 2 {
        format!(" - {}", parts[2..].concat())
    } else {
        String::new()
    }
}

/// Validate the server's opening handshake response.
///
/// `key` is the `Sec-WebSocket-Key` that was sent and `protocols` the
/// subprotocols that were offered.
#[must_use]
pub fn process_response(
    buf: &[u8],
    key: &str,
    protocols: &[String],
    options: &ClientOptions,
    peer: &str,
) -> ResponseOutcome {
    let Some(end) = find_header_end(buf) else {
        return ResponseOutcome::Incomplete;
    };
    let (status_line, headers) = HttpHeaders::parse(&buf[..end]);
    debug!(peer, status = %status_line, "received HTTP response in opening handshake");

    match validate_response(&status_line, &headers, key, protocols, options) {
        Ok((protocol, compression)) => {
            let extensions = compression
                .as_ref()
                .map(|c| vec![c.name().to_string()])
                .unwrap_or_default();
            ResponseOutcome::Open {
                response: ConnectionResponse {
                    peer: peer.to_string(),
                    headers,
                    version: options.protocol_version(),
                    protocol,
                    extensions,
                },
                compression,
                consumed: end,
            }
        }
        Err(reason) => ResponseOutcome::Fail(reason),
    }
}

type Negotiated = (Option<String>, Option<Box<dyn PerMessageCompress>>);

fn validate_response(
    status_line: &str,
    headers: &HttpHeaders,
    key: &str,
    protocols: &[String],
    options: &ClientOptions,
) -> std::result::Result<Negotiated, String> {
    let (code, parts) = status_code(status_line, &["HTTP/1.1"])?;
    if code != 101 {
        return Err(format!(
            "WebSocket connection upgrade failed ({code}{})",
            detail(&parts)
        ));
    }

    let Some(upgrade) = headers.get("upgrade") else {
        return Err("HTTP Upgrade header missing".into());
    };
    if !upgrade.trim().eq_ignore_ascii_case("websocket") {
        return Err(format!(
            "HTTP Upgrade header different from 'websocket' (case-insensitive) : {upgrade}"
        ));
    }

    let Some(connection) = headers.get("connection") else {
        return Err("HTTP Connection header missing".into());
    };
    if !headers.has_token("connection", "upgrade") {
        return Err(format!(
            "HTTP Connection header does not include 'upgrade' value (case-insensitive) : {connection}"
        ));
    }

    let Some(accept) = headers.get("sec-websocket-accept") else {
        return Err("HTTP Sec-WebSocket-Accept header missing in opening handshake reply".into());
    };
    if headers.count("sec-websocket-accept") > 1 {
        return Err(
            "HTTP Sec-WebSocket-Accept header appears more than once in opening handshake reply"
                .into(),
        );
    }
    let expected = compute_accept_key(key);
    if accept.trim() != expected {
        return Err(format!(
            "HTTP Sec-WebSocket-Accept bogus value : expected {expected} / got {}",
            accept.trim()
        ));
    }

    let mut compression: Option<Box<dyn PerMessageCompress>> = None;
    if let Some(selected) = headers.get("sec-websocket-extensions") {
        if headers.count("sec-websocket-extensions") > 1 {
            return Err("HTTP Sec-WebSocket-Extensions header appears more than once in opening handshake reply".into());
        }
        for extension in ExtensionOffer::parse_header(selected) {
            let response = match CompressionResponse::parse(&extension) {
                Ok(Some(response)) => response,
                Ok(None) => {
                    return Err(format!(
                        "server wants to use extension '{}' we did not request, haven't implemented or did not enable",
                        extension.name
                    ));
                }
                Err(Error::InvalidExtension(msg)) => return Err(msg),
                Err(e) => return Err(e.to_string()),
            };
            if compression.is_some() {
                return Err("multiple occurrence of a permessage-compress extension".into());
            }
            let accepted = options
                .per_message_compression_accept
                .as_ref()
                .and_then(|acceptor| acceptor.accept(&response))
                .ok_or_else(|| {
                    "WebSocket permessage-compress extension response from server denied by client"
                        .to_string()
                })?;
            compression = Some(accepted.into_codec(false).map_err(|e| e.to_string())?);
        }
    }

    let mut protocol = None;
    if let Some(selected) = headers.get("sec-websocket-protocol") {
        if headers.count("sec-websocket-protocol") > 1 {
            return Err("HTTP Sec-WebSocket-Protocol header appears more than once in opening handshake reply".into());
        }
        let selected = selected.trim();
        if !selected.is_empty() {
            if !protocols.iter().any(|p| p == selected) {
                return Err(format!(
                    "subprotocol selected by server ({selected}) not in subprotocol list requested by client ({protocols:?})"
                ));
            }
            protocol = Some(selected.to_string());
        }
    }

    Ok((protocol, compression))
}

/// The HTTP CONNECT request asking a proxy to tunnel to `host:port`.
#[must_use]
pub fn proxy_connect_request(host: &str, port: u16) -> Vec<u8> {
    format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n").into_bytes()
}

/// Result of looking at the buffered proxy response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyOutcome {
    /// The response head is not complete yet.
    Incomplete,
    /// The tunnel is up. `consumed` octets belong to the head.
    Connected {
        /// Length of the response head.
        consumed: usize,
    },
    /// The proxy refused or answered garbage.
    Fail(String),
}

/// Validate the proxy's answer to the CONNECT request.
#[must_use]
pub fn process_proxy_response(buf: &[u8]) -> ProxyOutcome {
    let Some(end) = find_header_end(buf) else {
        return ProxyOutcome::Incomplete;
    };
    let (status_line, _) = HttpHeaders::parse(&buf[..end]);
    debug!(status = %status_line, "received HTTP status line for proxy connect request");

    let (code, parts) = match status_code(&status_line, &["HTTP/1.1", "HTTP/1.0"]) {
        Ok(ok) => ok,
        Err(reason) => return ProxyOutcome::Fail(reason),
    };
    if !(200..300).contains(&code) {
        return ProxyOutcome::Fail(format!(
            "HTTP proxy connect failed ({code}{})",
            detail(&parts)
        ));
    }
    ProxyOutcome::Connected { consumed: end }
}
