//! Opening handshake (RFC 6455 Section 4).
//!
//! Only the subset of HTTP/1.1 the handshake needs is handled: a request
//! or status line, header fields and the blank line that ends them. The
//! role specific logic lives in [`server`] and [`client`].

pub mod client;
pub mod origin;
pub mod server;

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::extensions::ExtensionOffer;
use crate::protocol::mask::random_mask;
use crate::uri::Params;

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes the Sec-WebSocket-Accept value from the client's Sec-WebSocket-Key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID))
///
/// # Example
///
/// ```
/// use sansws::protocol::handshake::compute_accept_key;
///
/// let key = "dGhlIHNhbXBsZSBub25jZQ==";
/// let accept = compute_accept_key(key);
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let hash = hasher.finalize();
    BASE64.encode(hash)
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    if getrandom::getrandom(&mut buf).is_err() {
        for chunk in buf.chunks_mut(4) {
            let mask = random_mask();
            chunk.copy_from_slice(&mask[..chunk.len()]);
        }
    }
    buf
}

/// A fresh `Sec-WebSocket-Key`: 16 random octets, base64 encoded.
#[must_use]
pub fn generate_key() -> String {
    BASE64.encode(random_bytes(16))
}

/// A random base64 string of `length` characters.
#[must_use]
pub fn newid(length: usize) -> String {
    let octets = (length * 6).div_ceil(8);
    let mut id = BASE64.encode(random_bytes(octets));
    id.truncate(length);
    id
}

/// Offset just past the `\r\n\r\n` that ends an HTTP head, if buffered.
#[must_use]
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Validate that a header value does not contain CR or LF characters.
///
/// # Errors
///
/// Returns [`Error::InvalidHandshake`] if the value contains `\r` or `\n`.
pub(crate) fn validate_header_value(header_name: &str, value: &str) -> Result<()> {
    if value.contains('\r') || value.contains('\n') {
        return Err(Error::InvalidHandshake(format!(
            "header {header_name} contains CR or LF characters"
        )));
    }
    Ok(())
}

/// Header fields of an HTTP head.
///
/// Names are lower-cased. A field that appears several times keeps one
/// entry whose value joins all occurrences with `", "`, and remembers how
/// often it appeared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpHeaders {
    entries: Vec<HeaderEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeaderEntry {
    name: String,
    value: String,
    count: usize,
}

impl HttpHeaders {
    /// Parse an HTTP head into its first line and header fields.
    ///
    /// Octets are taken as ISO-8859-1. Lines without a colon, or starting
    /// with one, are skipped.
    #[must_use]
    pub fn parse(head: &[u8]) -> (String, Self) {
        let text: String = head.iter().map(|&b| char::from(b)).collect();
        let mut lines = text.lines();
        let first = lines.next().unwrap_or_default().trim().to_string();

        let mut headers = Self::default();
        for line in lines {
            let Some(i) = line.find(':') else { continue };
            if i == 0 {
                continue;
            }
            headers.append(&line[..i], &line[i + 1..]);
        }
        (first, headers)
    }

    fn append(&mut self, name: &str, value: &str) {
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim();
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => {
                entry.value.push_str(", ");
                entry.value.push_str(value);
                entry.count += 1;
            }
            None => self.entries.push(HeaderEntry {
                name,
                value: value.to_string(),
                count: 1,
            }),
        }
    }

    /// Value of a field, by lower-case name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.value.as_str())
    }

    /// Whether the field is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// How many times the field appeared.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map_or(0, |e| e.count)
    }

    /// `(name, value)` pairs in order of first appearance.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|e| (e.name.as_str(), e.value.as_str()))
    }

    /// Whether a comma separated field contains `token`, ignoring case.
    #[must_use]
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get(name).is_some_and(|v| {
            v.split(',')
                .any(|t| t.trim().eq_ignore_ascii_case(token))
        })
    }
}

/// What a server learned from a client's opening handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    /// Peer address, possibly rewritten from `X-Forwarded-For`.
    pub peer: String,
    /// All request headers.
    pub headers: HttpHeaders,
    /// `Host` without port.
    pub host: String,
    /// Requested path.
    pub path: String,
    /// Query parameters.
    pub params: Params,
    /// `Sec-WebSocket-Version`.
    pub version: u8,
    /// `Origin` (or `Sec-WebSocket-Origin`), empty if absent.
    pub origin: String,
    /// Offered subprotocols in client order.
    pub protocols: Vec<String>,
    /// Offered extensions in client order.
    pub extensions: Vec<ExtensionOffer>,
}

/// What a client learned from the server's opening handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionResponse {
    /// Peer address.
    pub peer: String,
    /// All response headers.
    pub headers: HttpHeaders,
    /// Wire version spoken.
    pub version: u8,
    /// Subprotocol selected by the server.
    pub protocol: Option<String>,
    /// Extensions in use.
    pub extensions: Vec<String>,
}

/// A server's decision to accept a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Accept {
    /// Subprotocol to speak. Must be one the client offered.
    pub protocol: Option<String>,
    /// Extra response headers.
    pub headers: Vec<(String, String)>,
}

impl Accept {
    /// Accept without a subprotocol.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept speaking `protocol`.
    #[must_use]
    pub fn with_protocol(protocol: impl Into<String>) -> Self {
        Self {
            protocol: Some(protocol.into()),
            headers: Vec::new(),
        }
    }

    /// Add a response header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Refusal of an opening handshake, sent as an HTTP error status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deny {
    /// HTTP status code.
    pub code: u16,
    /// Reason phrase.
    pub reason: String,
}

impl Deny {
    pub const BAD_REQUEST: u16 = 400;
    pub const FORBIDDEN: u16 = 403;
    pub const NOT_FOUND: u16 = 404;
    pub const NOT_ACCEPTABLE: u16 = 406;
    pub const REQUEST_TIMEOUT: u16 = 408;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    pub const NOT_IMPLEMENTED: u16 = 501;
    pub const SERVICE_UNAVAILABLE: u16 = 503;

    /// Deny with a status code and reason.
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

impl Default for Deny {
    fn default() -> Self {
        Self::new(Self::INTERNAL_SERVER_ERROR, "Internal Server Error")
    }
}

impl fmt::Display for Deny {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason)
    }
}

/// Overrides for a client's opening handshake request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectingRequest {
    /// Host named in `Host`.
    pub host: String,
    /// Port named in `Host`.
    pub port: u16,
    /// Path and query.
    pub resource: String,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
    /// `User-Agent`.
    pub useragent: Option<String>,
    /// `Origin`.
    pub origin: Option<String>,
    /// Subprotocols to offer.
    pub protocols: Vec<String>,
}
