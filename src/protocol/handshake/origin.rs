//! Origin header checking.
//!
//! Allowed origins are wildcard strings where `*` matches anything. They
//! are matched against the whole normalized origin `scheme://host:port`,
//! so `*.example.com:*` does not match `www.example.com.evil.org`.

use std::fmt;

use regex::Regex;
use url::{Host, Url};

use crate::error::{Error, Result};

/// A compiled allowed-origin wildcard.
#[derive(Clone)]
pub struct OriginPattern {
    wildcard: String,
    regex: Regex,
}

impl OriginPattern {
    /// Compile a wildcard pattern.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] if the resulting expression does
    /// not compile.
    pub fn new(wildcard: &str) -> Result<Self> {
        let body = regex::escape(wildcard).replace(r"\*", ".*");
        let regex = Regex::new(&format!("^{body}$"))
            .map_err(|e| Error::InvalidOption(format!("invalid origin pattern '{wildcard}': {e}")))?;
        Ok(Self {
            wildcard: wildcard.to_string(),
            regex,
        })
    }

    /// The wildcard this pattern was compiled from.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.wildcard
    }

    /// Whether `origin` matches in full.
    #[must_use]
    pub fn is_match(&self, origin: &str) -> bool {
        self.regex.is_match(origin)
    }
}

impl fmt::Debug for OriginPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OriginPattern").field(&self.wildcard).finish()
    }
}

impl PartialEq for OriginPattern {
    fn eq(&self, other: &Self) -> bool {
        self.wildcard == other.wildcard
    }
}

impl Eq for OriginPattern {}

/// Compile a list of wildcards.
///
/// # Errors
///
/// Fails on the first pattern that does not compile.
pub fn compile_patterns<S: AsRef<str>>(wildcards: &[S]) -> Result<Vec<OriginPattern>> {
    wildcards
        .iter()
        .map(|w| OriginPattern::new(w.as_ref()))
        .collect()
}

/// A parsed `Origin` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// `null`, or a `file:` origin.
    Null,
    /// A web origin.
    Tuple {
        /// Lower-cased scheme.
        scheme: String,
        /// Host without brackets.
        host: String,
        /// Explicit port, or the default for http/https.
        port: Option<u16>,
    },
}

impl Origin {
    /// Parse an `Origin` header value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if the value is not a URL or has
    /// no host.
    pub fn parse(value: &str) -> Result<Self> {
        if value.eq_ignore_ascii_case("null") {
            return Ok(Self::Null);
        }
        let no_host = || Error::InvalidHandshake(format!("No host part in Origin '{value}'"));
        let url = Url::parse(value).map_err(|e| match e {
            url::ParseError::EmptyHost => no_host(),
            other => Error::InvalidHandshake(other.to_string()),
        })?;

        let scheme = url.scheme().to_ascii_lowercase();
        if scheme == "file" {
            return Ok(Self::Null);
        }

        let host = match url.host() {
            Some(Host::Domain(d)) if !d.is_empty() => d.to_ascii_lowercase(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(no_host()),
        };
        let port = url.port().or(match scheme.as_str() {
            "http" => Some(80),
            "https" => Some(443),
            _ => None,
        });
        Ok(Self::Tuple { scheme, host, port })
    }

    /// `scheme://host:port`, the form patterns are matched against.
    #[must_use]
    pub fn normalized(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Tuple { scheme, host, port } => Some(match port {
                Some(port) => format!("{scheme}://{host}:{port}"),
                None => format!("{scheme}://{host}"),
            }),
        }
    }

    /// Whether any of `patterns` allows this origin. The null origin never
    /// matches a pattern.
    #[must_use]
    pub fn is_allowed(&self, patterns: &[OriginPattern]) -> bool {
        self.normalized()
            .is_some_and(|origin| patterns.iter().any(|p| p.is_match(&origin)))
    }
}
