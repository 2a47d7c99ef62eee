//! WebSocket extensions (RFC 6455 Section 9) and per-message compression.
//!
//! This module holds three layers:
//!
//! - [`ExtensionOffer`] / [`ExtensionParam`]: the parsed form of a
//!   `Sec-WebSocket-Extensions` header.
//! - [`CompressionOffer`], [`CompressionOfferAccept`], [`CompressionResponse`]
//!   and [`CompressionResponseAccept`]: the negotiation values of the
//!   supported per-message compression extensions (PMCE). Parsing and the
//!   exact header strings live with each extension.
//! - [`PerMessageCompress`]: the codec that a successful negotiation
//!   produces for the lifetime of the connection.
//!
//! # Example
//!
//! ```rust
//! use sansws::extensions::{CompressionOffer, ExtensionOffer};
//!
//! let offers = ExtensionOffer::parse_header(
//!     "permessage-deflate; client_max_window_bits, x-unknown",
//! );
//! assert_eq!(offers.len(), 2);
//!
//! let pmce = CompressionOffer::parse(&offers[0]).unwrap();
//! assert_eq!(pmce.is_some(), cfg!(feature = "compression"));
//! assert!(CompressionOffer::parse(&offers[1]).unwrap().is_none());
//! ```

pub mod deflate;

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

use self::deflate::{
    PerMessageDeflateOffer, PerMessageDeflateOfferAccept, PerMessageDeflateResponse,
    PerMessageDeflateResponseAccept,
};

/// Represents a single extension parameter.
///
/// Extension parameters follow the format: `name; param1=value1; param2`
/// For example: `permessage-deflate; client_max_window_bits=15; server_no_context_takeover`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionParam {
    /// Parameter name, lower-cased.
    pub name: String,
    /// Optional parameter value. None for boolean parameters.
    pub value: Option<String>,
}

impl ExtensionParam {
    /// Create a new parameter with a value.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// Create a boolean/flag parameter (no value).
    pub fn flag(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    /// Parse `param=value` or `param`.
    ///
    /// The name is lower-cased. One leading and one trailing double quote
    /// are stripped from the value; everything after the first `=` belongs
    /// to the value.
    pub fn parse(s: &str) -> Self {
        let mut parts = s.split('=').map(str::trim);
        let name = parts.next().unwrap_or_default().to_ascii_lowercase();
        let rest: Vec<&str> = parts.collect();
        if rest.is_empty() {
            return Self::flag(name);
        }
        let joined = rest.join("=");
        let value = joined.strip_prefix('"').unwrap_or(&joined);
        let value = value.strip_suffix('"').unwrap_or(value);
        Self::new(name, value)
    }
}

impl fmt::Display for ExtensionParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{}={}", self.name, v),
            None => write!(f, "{}", self.name),
        }
    }
}

/// One entry of a `Sec-WebSocket-Extensions` header, either offered by a
/// client or selected by a server.
///
/// For example: `permessage-deflate; client_max_window_bits=15`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionOffer {
    /// Extension name, lower-cased (e.g., "permessage-deflate").
    pub name: String,
    /// Extension parameters in header order. Names may repeat.
    pub params: Vec<ExtensionParam>,
}

impl ExtensionOffer {
    /// Create a new extension offer with no parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Create a new extension offer with parameters.
    pub fn with_params(name: impl Into<String>, params: Vec<ExtensionParam>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Parse a single extension entry: `extension-name; param1=value1; param2`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] if the extension name is empty.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split(';').map(str::trim);
        let name = parts.next().unwrap_or_default().to_ascii_lowercase();
        if name.is_empty() {
            return Err(Error::InvalidExtension("Empty extension name".into()));
        }
        let params = parts.map(ExtensionParam::parse).collect();
        Ok(Self { name, params })
    }

    /// Parse a full `Sec-WebSocket-Extensions` header value.
    ///
    /// Extensions are comma-separated, parameters are semicolon-separated.
    /// Empty entries are skipped.
    pub fn parse_header(header: &str) -> Vec<Self> {
        header
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|s| Self::parse(s).ok())
            .collect()
    }

    /// Get the first parameter with this name.
    pub fn get_param(&self, name: &str) -> Option<&ExtensionParam> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Check if a parameter is present.
    pub fn has_param(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.name == name)
    }

    /// How often a parameter name appears.
    pub fn count_param(&self, name: &str) -> usize {
        self.params.iter().filter(|p| p.name == name).count()
    }
}

impl fmt::Display for ExtensionOffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for param in &self.params {
            write!(f, "; {}", param)?;
        }
        Ok(())
    }
}

// ============================================================================
// Per-message compression negotiation
// ============================================================================

/// Names of the compression extensions this build can negotiate.
pub fn supported_compression() -> &'static [&'static str] {
    if cfg!(feature = "compression") {
        &[deflate::EXTENSION_NAME]
    } else {
        &[]
    }
}

fn is_supported(name: &str) -> bool {
    supported_compression().contains(&name)
}

/// A compression extension offered by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CompressionOffer {
    /// `permessage-deflate`
    Deflate(PerMessageDeflateOffer),
}

impl CompressionOffer {
    /// Parse an offer received by a server.
    ///
    /// Returns `Ok(None)` for extensions that are not supported.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] for a supported extension with
    /// invalid parameters.
    pub fn parse(offer: &ExtensionOffer) -> Result<Option<Self>> {
        if !is_supported(&offer.name) {
            return Ok(None);
        }
        match offer.name.as_str() {
            deflate::EXTENSION_NAME => Ok(Some(Self::Deflate(PerMessageDeflateOffer::parse(
                &offer.params,
            )?))),
            _ => Ok(None),
        }
    }

    /// Extension name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Deflate(_) => deflate::EXTENSION_NAME,
        }
    }

    /// The offer as written in the client's request header.
    #[must_use]
    pub fn extension_string(&self) -> String {
        match self {
            Self::Deflate(offer) => offer.extension_string(),
        }
    }
}

/// A server's acceptance of one client offer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CompressionOfferAccept {
    /// `permessage-deflate`
    Deflate(PerMessageDeflateOfferAccept),
}

impl CompressionOfferAccept {
    /// Extension name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Deflate(_) => deflate::EXTENSION_NAME,
        }
    }

    /// The selection as written in the server's response header.
    #[must_use]
    pub fn extension_string(&self) -> String {
        match self {
            Self::Deflate(accept) => accept.extension_string(),
        }
    }

    /// Build the codec for the server side of the connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Extension`] if the codec is not compiled in.
    pub fn into_codec(&self, is_server: bool) -> Result<Box<dyn PerMessageCompress>> {
        match self {
            Self::Deflate(accept) => deflate::codec_from_offer_accept(is_server, accept),
        }
    }
}

/// A compression extension selected by a server, as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CompressionResponse {
    /// `permessage-deflate`
    Deflate(PerMessageDeflateResponse),
}

impl CompressionResponse {
    /// Parse a server's selection. Returns `Ok(None)` for unsupported
    /// extensions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] for invalid parameters.
    pub fn parse(response: &ExtensionOffer) -> Result<Option<Self>> {
        if !is_supported(&response.name) {
            return Ok(None);
        }
        match response.name.as_str() {
            deflate::EXTENSION_NAME => Ok(Some(Self::Deflate(
                PerMessageDeflateResponse::parse(&response.params)?,
            ))),
            _ => Ok(None),
        }
    }

    /// Extension name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Deflate(_) => deflate::EXTENSION_NAME,
        }
    }
}

/// A client's acceptance of the server's selection.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CompressionResponseAccept {
    /// `permessage-deflate`
    Deflate(PerMessageDeflateResponseAccept),
}

impl CompressionResponseAccept {
    /// Build the codec for the client side of the connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Extension`] if the codec is not compiled in.
    pub fn into_codec(&self, is_server: bool) -> Result<Box<dyn PerMessageCompress>> {
        match self {
            Self::Deflate(accept) => deflate::codec_from_response_accept(is_server, accept),
        }
    }
}

type OfferAcceptFn = dyn Fn(&[CompressionOffer]) -> Option<CompressionOfferAccept> + Send + Sync;
type ResponseAcceptFn =
    dyn Fn(&CompressionResponse) -> Option<CompressionResponseAccept> + Send + Sync;

/// Server hook choosing at most one of the client's compression offers.
#[derive(Clone)]
pub struct OfferAcceptor(Arc<OfferAcceptFn>);

impl OfferAcceptor {
    /// Wrap a selection function.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[CompressionOffer]) -> Option<CompressionOfferAccept> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Accept the first `permessage-deflate` offer with default parameters.
    #[must_use]
    pub fn deflate() -> Self {
        Self::new(|offers| {
            offers.iter().find_map(|offer| match offer {
                CompressionOffer::Deflate(offer) => Some(CompressionOfferAccept::Deflate(
                    PerMessageDeflateOfferAccept::new(*offer),
                )),
            })
        })
    }

    /// Run the hook.
    #[must_use]
    pub fn accept(&self, offers: &[CompressionOffer]) -> Option<CompressionOfferAccept> {
        (self.0)(offers)
    }
}

impl fmt::Debug for OfferAcceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OfferAcceptor(..)")
    }
}

/// Client hook deciding whether to go along with the server's selection.
#[derive(Clone)]
pub struct ResponseAcceptor(Arc<ResponseAcceptFn>);

impl ResponseAcceptor {
    /// Wrap a decision function.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&CompressionResponse) -> Option<CompressionResponseAccept> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Accept any `permessage-deflate` response as is.
    #[must_use]
    pub fn deflate() -> Self {
        Self::new(|response| match response {
            CompressionResponse::Deflate(response) => Some(CompressionResponseAccept::Deflate(
                PerMessageDeflateResponseAccept::new(*response),
            )),
        })
    }

    /// Run the hook.
    #[must_use]
    pub fn accept(&self, response: &CompressionResponse) -> Option<CompressionResponseAccept> {
        (self.0)(response)
    }
}

impl fmt::Debug for ResponseAcceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResponseAcceptor(..)")
    }
}

// ============================================================================
// Codec contract
// ============================================================================

/// Streaming per-message compression codec.
///
/// Each direction runs start / data* / end per message. Whether state
/// carries over between messages is up to the codec and its negotiated
/// context takeover settings.
pub trait PerMessageCompress: Send {
    /// Extension name as used in the handshake.
    fn name(&self) -> &'static str;

    /// Prepare to compress a new outgoing message.
    fn start_compress_message(&mut self);

    /// Compress a chunk of the outgoing message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Extension`] on codec failure.
    fn compress_message_data(&mut self, data: &[u8]) -> Result<Vec<u8>>;

    /// Flush the outgoing message and return the final octets.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Extension`] on codec failure.
    fn end_compress_message(&mut self) -> Result<Vec<u8>>;

    /// Prepare to decompress a new incoming message.
    fn start_decompress_message(&mut self);

    /// Decompress a chunk of the incoming message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Extension`] if the input is not a valid stream.
    fn decompress_message_data(&mut self, data: &[u8]) -> Result<Vec<u8>>;

    /// Finish the incoming message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Extension`] if the input is not a valid stream.
    fn end_decompress_message(&mut self) -> Result<()>;
}
