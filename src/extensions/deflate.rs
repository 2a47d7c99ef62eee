//! Permessage-deflate WebSocket compression extension (RFC 7692).
//!
//! Negotiation values are always available so that offers can be parsed
//! and rejected consistently; the codec itself needs the `compression`
//! feature.

use crate::error::{Error, Result};
use crate::extensions::ExtensionParam;
#[cfg(feature = "compression")]
use crate::extensions::PerMessageCompress;

/// Registered extension name.
pub const EXTENSION_NAME: &str = "permessage-deflate";

const MIN_WINDOW_BITS: u8 = 8;
const MAX_WINDOW_BITS: u8 = 15;
const DEFAULT_WINDOW_BITS: u8 = 15;
const DEFAULT_MEM_LEVEL: u8 = 8;

fn is_window_bits(bits: u8) -> bool {
    (MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&bits)
}

fn is_mem_level(level: u8) -> bool {
    (1..=9).contains(&level)
}

fn illegal_value(value: Option<&str>, param: &str) -> Error {
    Error::InvalidExtension(format!(
        "illegal extension parameter value '{}' for parameter '{param}' of extension '{EXTENSION_NAME}'",
        value.unwrap_or_default()
    ))
}

fn window_bits_value(param: &ExtensionParam) -> Result<u8> {
    param
        .value
        .as_deref()
        .and_then(|v| v.parse::<u8>().ok())
        .filter(|bits| is_window_bits(*bits))
        .ok_or_else(|| illegal_value(param.value.as_deref(), &param.name))
}

fn flag_value(param: &ExtensionParam) -> Result<()> {
    match param.value {
        None => Ok(()),
        Some(ref v) => Err(illegal_value(Some(v), &param.name)),
    }
}

fn check_unique(params: &[ExtensionParam]) -> Result<()> {
    for (i, param) in params.iter().enumerate() {
        if params[..i].iter().any(|p| p.name == param.name) {
            return Err(Error::InvalidExtension(format!(
                "multiple occurrence of extension parameter '{}' for extension '{EXTENSION_NAME}'",
                param.name
            )));
        }
    }
    Ok(())
}

fn invalid(msg: String) -> Error {
    Error::InvalidExtension(msg)
}

// ============================================================================
// Client offer
// ============================================================================

/// Parameters a client offers for `permessage-deflate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerMessageDeflateOffer {
    /// Client accepts `client_no_context_takeover` from the server.
    pub accept_no_context_takeover: bool,
    /// Client accepts a `client_max_window_bits` limit from the server.
    pub accept_max_window_bits: bool,
    /// Client asks the server not to keep context between messages.
    pub request_no_context_takeover: bool,
    /// Window size the client asks the server to stay within. 0 for none.
    pub request_max_window_bits: u8,
}

impl Default for PerMessageDeflateOffer {
    fn default() -> Self {
        Self {
            accept_no_context_takeover: true,
            accept_max_window_bits: true,
            request_no_context_takeover: false,
            request_max_window_bits: 0,
        }
    }
}

impl PerMessageDeflateOffer {
    /// Build an offer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] if `request_max_window_bits` is
    /// neither 0 nor in 8..=15.
    pub fn new(
        accept_no_context_takeover: bool,
        accept_max_window_bits: bool,
        request_no_context_takeover: bool,
        request_max_window_bits: u8,
    ) -> Result<Self> {
        if request_max_window_bits != 0 && !is_window_bits(request_max_window_bits) {
            return Err(invalid(format!(
                "invalid value {request_max_window_bits} for request_max_window_bits - permissible values 8..=15"
            )));
        }
        Ok(Self {
            accept_no_context_takeover,
            accept_max_window_bits,
            request_no_context_takeover,
            request_max_window_bits,
        })
    }

    /// Parse the parameters of an offer received by a server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] for unknown or repeated
    /// parameters and illegal values.
    pub fn parse(params: &[ExtensionParam]) -> Result<Self> {
        check_unique(params)?;
        let mut offer = Self {
            accept_no_context_takeover: true,
            accept_max_window_bits: false,
            request_no_context_takeover: false,
            request_max_window_bits: 0,
        };
        for param in params {
            match param.name.as_str() {
                "client_max_window_bits" => {
                    if param.value.is_some() {
                        window_bits_value(param)?;
                    }
                    offer.accept_max_window_bits = true;
                }
                "client_no_context_takeover" => {
                    flag_value(param)?;
                    offer.accept_no_context_takeover = true;
                }
                "server_max_window_bits" => {
                    offer.request_max_window_bits = window_bits_value(param)?;
                }
                "server_no_context_takeover" => {
                    flag_value(param)?;
                    offer.request_no_context_takeover = true;
                }
                other => {
                    return Err(invalid(format!(
                        "illegal extension parameter '{other}' for extension '{EXTENSION_NAME}'"
                    )));
                }
            }
        }
        Ok(offer)
    }

    /// The offer as sent in the client's `Sec-WebSocket-Extensions` header.
    #[must_use]
    pub fn extension_string(&self) -> String {
        let mut s = String::from(EXTENSION_NAME);
        if self.accept_no_context_takeover {
            s.push_str("; client_no_context_takeover");
        }
        if self.accept_max_window_bits {
            s.push_str("; client_max_window_bits");
        }
        if self.request_no_context_takeover {
            s.push_str("; server_no_context_takeover");
        }
        if self.request_max_window_bits != 0 {
            s.push_str(&format!(
                "; server_max_window_bits={}",
                self.request_max_window_bits
            ));
        }
        s
    }
}

// ============================================================================
// Server acceptance of an offer
// ============================================================================

/// How a server accepts a client's offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerMessageDeflateOfferAccept {
    /// The offer being accepted.
    pub offer: PerMessageDeflateOffer,
    /// Ask the client not to keep context between messages.
    pub request_no_context_takeover: bool,
    /// Ask the client to stay within this window size. 0 for none.
    pub request_max_window_bits: u8,
    /// Override the server-to-client context takeover.
    pub no_context_takeover: Option<bool>,
    /// Override the server-to-client window size.
    pub window_bits: Option<u8>,
    /// Server-to-client memory level.
    pub mem_level: Option<u8>,
}

impl PerMessageDeflateOfferAccept {
    /// Accept `offer` as is.
    #[must_use]
    pub const fn new(offer: PerMessageDeflateOffer) -> Self {
        Self {
            offer,
            request_no_context_takeover: false,
            request_max_window_bits: 0,
            no_context_takeover: None,
            window_bits: None,
            mem_level: None,
        }
    }

    /// Request `client_no_context_takeover`.
    ///
    /// # Errors
    ///
    /// Fails if the client did not announce support for it.
    pub fn with_request_no_context_takeover(mut self, request: bool) -> Result<Self> {
        if request && !self.offer.accept_no_context_takeover {
            return Err(invalid(format!(
                "invalid value {request} for request_no_context_takeover - feature unsupported by client"
            )));
        }
        self.request_no_context_takeover = request;
        Ok(self)
    }

    /// Request a `client_max_window_bits` limit.
    ///
    /// # Errors
    ///
    /// Fails for values outside 8..=15, or if the client did not announce
    /// support for it.
    pub fn with_request_max_window_bits(mut self, bits: u8) -> Result<Self> {
        if bits != 0 && !is_window_bits(bits) {
            return Err(invalid(format!(
                "invalid value {bits} for request_max_window_bits - permissible values 8..=15"
            )));
        }
        if bits != 0 && !self.offer.accept_max_window_bits {
            return Err(invalid(format!(
                "invalid value {bits} for request_max_window_bits - feature unsupported by client"
            )));
        }
        self.request_max_window_bits = bits;
        Ok(self)
    }

    /// Override context takeover for server-to-client messages.
    ///
    /// # Errors
    ///
    /// Fails when turning it back on although the client asked for no
    /// context takeover.
    pub fn with_no_context_takeover(mut self, no_context_takeover: bool) -> Result<Self> {
        if self.offer.request_no_context_takeover && !no_context_takeover {
            return Err(invalid(format!(
                "invalid value {no_context_takeover} for no_context_takeover - client requested feature"
            )));
        }
        self.no_context_takeover = Some(no_context_takeover);
        Ok(self)
    }

    /// Override the server-to-client window size.
    ///
    /// # Errors
    ///
    /// Fails for values outside 8..=15 or above the client's requested
    /// maximum.
    pub fn with_window_bits(mut self, bits: u8) -> Result<Self> {
        if !is_window_bits(bits) {
            return Err(invalid(format!(
                "invalid value {bits} for window_bits - permissible values 8..=15"
            )));
        }
        if self.offer.request_max_window_bits != 0 && bits > self.offer.request_max_window_bits {
            return Err(invalid(format!(
                "invalid value {bits} for window_bits - client requested lower maximum value"
            )));
        }
        self.window_bits = Some(bits);
        Ok(self)
    }

    /// Set the server-to-client memory level.
    ///
    /// # Errors
    ///
    /// Fails for values outside 1..=9.
    pub fn with_mem_level(mut self, level: u8) -> Result<Self> {
        if !is_mem_level(level) {
            return Err(invalid(format!(
                "invalid value {level} for mem_level - permissible values 1..=9"
            )));
        }
        self.mem_level = Some(level);
        Ok(self)
    }

    /// The selection as sent in the server's `Sec-WebSocket-Extensions` header.
    #[must_use]
    pub fn extension_string(&self) -> String {
        let mut s = String::from(EXTENSION_NAME);
        if self.offer.request_no_context_takeover {
            s.push_str("; server_no_context_takeover");
        }
        if self.offer.request_max_window_bits != 0 {
            s.push_str(&format!(
                "; server_max_window_bits={}",
                self.offer.request_max_window_bits
            ));
        }
        if self.request_no_context_takeover {
            s.push_str("; client_no_context_takeover");
        }
        if self.request_max_window_bits != 0 {
            s.push_str(&format!(
                "; client_max_window_bits={}",
                self.request_max_window_bits
            ));
        }
        s
    }
}

// ============================================================================
// Server response, as seen by the client
// ============================================================================

/// Parameters the server selected. Window sizes are 0 when absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerMessageDeflateResponse {
    /// Limit for client-to-server messages.
    pub client_max_window_bits: u8,
    /// Client must reset context between messages.
    pub client_no_context_takeover: bool,
    /// Limit the server applies to its messages.
    pub server_max_window_bits: u8,
    /// Server resets context between messages.
    pub server_no_context_takeover: bool,
}

impl PerMessageDeflateResponse {
    /// Parse the parameters of the server's selection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidExtension`] for unknown or repeated
    /// parameters and illegal values.
    pub fn parse(params: &[ExtensionParam]) -> Result<Self> {
        check_unique(params)?;
        let mut response = Self::default();
        for param in params {
            match param.name.as_str() {
                "client_max_window_bits" => {
                    response.client_max_window_bits = window_bits_value(param)?;
                }
                "client_no_context_takeover" => {
                    flag_value(param)?;
                    response.client_no_context_takeover = true;
                }
                "server_max_window_bits" => {
                    response.server_max_window_bits = window_bits_value(param)?;
                }
                "server_no_context_takeover" => {
                    flag_value(param)?;
                    response.server_no_context_takeover = true;
                }
                other => {
                    return Err(invalid(format!(
                        "illegal extension parameter '{other}' for extension '{EXTENSION_NAME}'"
                    )));
                }
            }
        }
        Ok(response)
    }
}

/// How a client goes along with the server's selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerMessageDeflateResponseAccept {
    /// The response being accepted.
    pub response: PerMessageDeflateResponse,
    /// Override client-to-server context takeover.
    pub no_context_takeover: Option<bool>,
    /// Override the client-to-server window size.
    pub window_bits: Option<u8>,
    /// Client-to-server memory level.
    pub mem_level: Option<u8>,
}

impl PerMessageDeflateResponseAccept {
    /// Accept `response` as is.
    #[must_use]
    pub const fn new(response: PerMessageDeflateResponse) -> Self {
        Self {
            response,
            no_context_takeover: None,
            window_bits: None,
            mem_level: None,
        }
    }

    /// Override context takeover for client-to-server messages.
    ///
    /// # Errors
    ///
    /// Fails when turning it back on although the server required no
    /// context takeover.
    pub fn with_no_context_takeover(mut self, no_context_takeover: bool) -> Result<Self> {
        if self.response.client_no_context_takeover && !no_context_takeover {
            return Err(invalid(format!(
                "invalid value {no_context_takeover} for no_context_takeover - server requested feature"
            )));
        }
        self.no_context_takeover = Some(no_context_takeover);
        Ok(self)
    }

    /// Override the client-to-server window size.
    ///
    /// # Errors
    ///
    /// Fails for values outside 8..=15 or above the server's limit.
    pub fn with_window_bits(mut self, bits: u8) -> Result<Self> {
        if !is_window_bits(bits) {
            return Err(invalid(format!(
                "invalid value {bits} for window_bits - permissible values 8..=15"
            )));
        }
        if self.response.client_max_window_bits != 0
            && bits > self.response.client_max_window_bits
        {
            return Err(invalid(format!(
                "invalid value {bits} for window_bits - server requested lower maximum value"
            )));
        }
        self.window_bits = Some(bits);
        Ok(self)
    }

    /// Set the client-to-server memory level.
    ///
    /// # Errors
    ///
    /// Fails for values outside 1..=9.
    pub fn with_mem_level(mut self, level: u8) -> Result<Self> {
        if !is_mem_level(level) {
            return Err(invalid(format!(
                "invalid value {level} for mem_level - permissible values 1..=9"
            )));
        }
        self.mem_level = Some(level);
        Ok(self)
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Effective parameters of a negotiated deflate session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeflateParams {
    /// Which end we are.
    pub is_server: bool,
    /// Server resets its compressor per message.
    pub server_no_context_takeover: bool,
    /// Client resets its compressor per message.
    pub client_no_context_takeover: bool,
    /// Server-to-client window bits.
    pub server_max_window_bits: u8,
    /// Client-to-server window bits.
    pub client_max_window_bits: u8,
    /// Memory level requested for our compressor.
    pub mem_level: u8,
}

impl DeflateParams {
    fn new(
        is_server: bool,
        server_no_context_takeover: bool,
        client_no_context_takeover: bool,
        server_max_window_bits: u8,
        client_max_window_bits: u8,
        mem_level: Option<u8>,
    ) -> Self {
        let or_default = |bits: u8| if bits == 0 { DEFAULT_WINDOW_BITS } else { bits };
        Self {
            is_server,
            server_no_context_takeover,
            client_no_context_takeover,
            server_max_window_bits: or_default(server_max_window_bits),
            client_max_window_bits: or_default(client_max_window_bits),
            mem_level: mem_level.unwrap_or(DEFAULT_MEM_LEVEL),
        }
    }

    /// Parameters after a server accepted an offer.
    #[must_use]
    pub fn from_offer_accept(is_server: bool, accept: &PerMessageDeflateOfferAccept) -> Self {
        Self::new(
            is_server,
            accept
                .no_context_takeover
                .unwrap_or(accept.offer.request_no_context_takeover),
            accept.request_no_context_takeover,
            accept
                .window_bits
                .unwrap_or(accept.offer.request_max_window_bits),
            accept.request_max_window_bits,
            accept.mem_level,
        )
    }

    /// Parameters after a client accepted a response.
    #[must_use]
    pub fn from_response_accept(is_server: bool, accept: &PerMessageDeflateResponseAccept) -> Self {
        Self::new(
            is_server,
            accept.response.server_no_context_takeover,
            accept
                .no_context_takeover
                .unwrap_or(accept.response.client_no_context_takeover),
            accept.response.server_max_window_bits,
            accept
                .window_bits
                .unwrap_or(accept.response.client_max_window_bits),
            accept.mem_level,
        )
    }

    /// (no context takeover, window bits) for what we send.
    const fn outgoing(&self) -> (bool, u8) {
        if self.is_server {
            (self.server_no_context_takeover, self.server_max_window_bits)
        } else {
            (self.client_no_context_takeover, self.client_max_window_bits)
        }
    }

    /// (no context takeover, window bits) for what the peer sends.
    const fn incoming(&self) -> (bool, u8) {
        if self.is_server {
            (self.client_no_context_takeover, self.client_max_window_bits)
        } else {
            (self.server_no_context_takeover, self.server_max_window_bits)
        }
    }
}

#[cfg(feature = "compression")]
pub use self::codec::PerMessageDeflate;

#[cfg(feature = "compression")]
mod codec {
    use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

    use super::DeflateParams;
    use crate::error::{Error, Result};
    use crate::extensions::PerMessageCompress;

    const SYNC_TRAILER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

    /// zlib does not do raw deflate with a 256 octet window; a 512 octet
    /// window reads everything a 256 octet one produces.
    fn zlib_window_bits(bits: u8) -> u8 {
        bits.max(9)
    }

    /// Raw deflate codec with per-direction context takeover.
    pub struct PerMessageDeflate {
        params: DeflateParams,
        compressor: Option<Compress>,
        decompressor: Option<Decompress>,
    }

    impl PerMessageDeflate {
        /// Create a codec. Compressor and decompressor are created lazily.
        #[must_use]
        pub fn new(params: DeflateParams) -> Self {
            Self {
                params,
                compressor: None,
                decompressor: None,
            }
        }

        /// The negotiated parameters.
        #[must_use]
        pub fn params(&self) -> &DeflateParams {
            &self.params
        }
    }

    impl std::fmt::Debug for PerMessageDeflate {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("PerMessageDeflate")
                .field("params", &self.params)
                .finish_non_exhaustive()
        }
    }

    fn run_compress(c: &mut Compress, mut input: &[u8], flush: FlushCompress) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(input.len() / 2 + 64);
        loop {
            if out.capacity() - out.len() < 64 {
                out.reserve(out.capacity().max(1024));
            }
            let before = c.total_in();
            c.compress_vec(input, &mut out, flush)
                .map_err(|e| Error::Extension(format!("Compression failed: {e}")))?;
            let consumed = (c.total_in() - before) as usize;
            input = &input[consumed..];
            if input.is_empty() && out.len() < out.capacity() {
                return Ok(out);
            }
        }
    }

    fn run_decompress(d: &mut Decompress, mut input: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(input.len() * 2 + 64);
        loop {
            if out.capacity() - out.len() < 64 {
                out.reserve(out.capacity().max(1024));
            }
            let before = d.total_in();
            let status = d
                .decompress_vec(input, &mut out, FlushDecompress::Sync)
                .map_err(|e| Error::Extension(format!("Decompression failed: {e}")))?;
            let consumed = (d.total_in() - before) as usize;
            input = &input[consumed..];
            if status == Status::StreamEnd || (input.is_empty() && out.len() < out.capacity()) {
                return Ok(out);
            }
        }
    }

    impl PerMessageCompress for PerMessageDeflate {
        fn name(&self) -> &'static str {
            super::EXTENSION_NAME
        }

        fn start_compress_message(&mut self) {
            let (no_context_takeover, bits) = self.params.outgoing();
            if self.compressor.is_none() || no_context_takeover {
                self.compressor = Some(Compress::new_with_window_bits(
                    Compression::default(),
                    false,
                    zlib_window_bits(bits),
                ));
            }
        }

        fn compress_message_data(&mut self, data: &[u8]) -> Result<Vec<u8>> {
            let c = self
                .compressor
                .as_mut()
                .ok_or_else(|| Error::Extension("compressor not started".into()))?;
            run_compress(c, data, FlushCompress::None)
        }

        fn end_compress_message(&mut self) -> Result<Vec<u8>> {
            let c = self
                .compressor
                .as_mut()
                .ok_or_else(|| Error::Extension("compressor not started".into()))?;
            let mut out = run_compress(c, &[], FlushCompress::Sync)?;
            if out.ends_with(&SYNC_TRAILER) {
                out.truncate(out.len() - SYNC_TRAILER.len());
            }
            Ok(out)
        }

        fn start_decompress_message(&mut self) {
            let (no_context_takeover, bits) = self.params.incoming();
            if self.decompressor.is_none() || no_context_takeover {
                self.decompressor = Some(Decompress::new_with_window_bits(
                    false,
                    zlib_window_bits(bits),
                ));
            }
        }

        fn decompress_message_data(&mut self, data: &[u8]) -> Result<Vec<u8>> {
            let d = self
                .decompressor
                .as_mut()
                .ok_or_else(|| Error::Extension("decompressor not started".into()))?;
            run_decompress(d, data)
        }

        fn end_decompress_message(&mut self) -> Result<()> {
            let d = self
                .decompressor
                .as_mut()
                .ok_or_else(|| Error::Extension("decompressor not started".into()))?;
            run_decompress(d, &SYNC_TRAILER).map(|_| ())
        }
    }
}

/// Codec for a server that accepted `accept`.
#[cfg(feature = "compression")]
pub(crate) fn codec_from_offer_accept(
    is_server: bool,
    accept: &PerMessageDeflateOfferAccept,
) -> Result<Box<dyn PerMessageCompress>> {
    Ok(Box::new(PerMessageDeflate::new(
        DeflateParams::from_offer_accept(is_server, accept),
    )))
}

/// Codec for a client that accepted `accept`.
#[cfg(feature = "compression")]
pub(crate) fn codec_from_response_accept(
    is_server: bool,
    accept: &PerMessageDeflateResponseAccept,
) -> Result<Box<dyn PerMessageCompress>> {
    Ok(Box::new(PerMessageDeflate::new(
        DeflateParams::from_response_accept(is_server, accept),
    )))
}

#[cfg(not(feature = "compression"))]
pub(crate) fn codec_from_offer_accept(
    _is_server: bool,
    _accept: &PerMessageDeflateOfferAccept,
) -> Result<Box<dyn crate::extensions::PerMessageCompress>> {
    Err(Error::Extension(
        "permessage-deflate requires the `compression` feature".into(),
    ))
}

#[cfg(not(feature = "compression"))]
pub(crate) fn codec_from_response_accept(
    _is_server: bool,
    _accept: &PerMessageDeflateResponseAccept,
) -> Result<Box<dyn crate::extensions::PerMessageCompress>> {
    Err(Error::Extension(
        "permessage-deflate requires the `compression` feature".into(),
    ))
}
