//! `ws://` and `wss://` URL helpers.

use std::collections::BTreeMap;

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use url::{Host, Url, form_urlencoded};

use crate::error::{Error, Result};

/// Characters escaped in the path of a generated URL. Everything but
/// unreserved characters and `/`.
const PATH_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'[')
    .add(b']')
    .add(b'\\')
    .add(b'^')
    .add(b'|')
    .add(b'!')
    .add(b'$')
    .add(b'&')
    .add(b'\'')
    .add(b'(')
    .add(b')')
    .add(b'*')
    .add(b'+')
    .add(b',')
    .add(b':')
    .add(b';')
    .add(b'=')
    .add(b'@');

/// Query parameters, each name mapping to all its non-empty values.
pub type Params = BTreeMap<String, Vec<String>>;

/// Where a WebSocket URL points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP port, defaulted from the scheme when absent.
    Tcp(u16),
    /// Unix domain socket path (`ws://unix:/path/to.sock`).
    Unix(String),
}

/// Components of a parsed WebSocket URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsUrl {
    /// `true` for `wss`.
    pub secure: bool,
    /// Host name or IP address, lower-cased.
    pub host: String,
    /// TCP port or socket path.
    pub endpoint: Endpoint,
    /// Path plus query string, still escaped, as sent in the request line.
    pub resource: String,
    /// Unescaped path.
    pub path: String,
    /// Query parameters.
    pub params: Params,
}

impl WsUrl {
    /// The TCP port, if this is not a Unix socket URL.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        match self.endpoint {
            Endpoint::Tcp(port) => Some(port),
            Endpoint::Unix(_) => None,
        }
    }
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidUrl(msg.into())
}

/// Parse a `ws`/`wss` URL.
///
/// # Errors
///
/// Returns [`Error::InvalidUrl`] for other schemes, a missing host, a
/// non-empty fragment or an out of range port.
pub fn parse_url(input: &str) -> Result<WsUrl> {
    let url = Url::parse(input).map_err(|e| invalid(e.to_string()))?;

    let secure = match url.scheme() {
        "ws" => false,
        "wss" => true,
        other => {
            return Err(invalid(format!(
                "protocol scheme '{other}' is not for WebSocket"
            )));
        }
    };

    let host = match url.host() {
        Some(Host::Domain(d)) if !d.is_empty() => d.to_string(),
        Some(Host::Ipv4(addr)) => addr.to_string(),
        Some(Host::Ipv6(addr)) => addr.to_string(),
        _ => return Err(invalid("missing hostname")),
    };

    if let Some(fragment) = url.fragment() {
        if !fragment.is_empty() {
            return Err(invalid(format!("non-empty fragment '{fragment}'")));
        }
    }

    let raw_path = if url.path().is_empty() { "/" } else { url.path() };
    let path = percent_decode_str(raw_path).decode_utf8_lossy().into_owned();

    let (resource, params) = match url.query() {
        Some(query) if !query.is_empty() => (format!("{raw_path}?{query}"), parse_query(query)),
        _ => (raw_path.to_string(), Params::new()),
    };

    let endpoint = if host == "unix" {
        Endpoint::Unix(path.clone())
    } else {
        let port = url
            .port_or_known_default()
            .unwrap_or(if secure { 443 } else { 80 });
        if port == 0 {
            return Err(invalid(format!("invalid port {port}")));
        }
        Endpoint::Tcp(port)
    };

    Ok(WsUrl {
        secure,
        host,
        endpoint,
        resource,
        path,
        params,
    })
}

/// Decode a query string the way HTML forms encode it. Empty values are
/// dropped.
#[must_use]
pub fn parse_query(query: &str) -> Params {
    let mut params = Params::new();
    for (name, value) in form_urlencoded::parse(query.as_bytes()) {
        if value.is_empty() {
            continue;
        }
        params
            .entry(name.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    params
}

/// Build a WebSocket URL from its components.
///
/// The port is always written out, defaulting to 80 or 443. For
/// `host == "unix"`, `endpoint` must be [`Endpoint::Unix`].
#[must_use]
pub fn create_url(
    host: &str,
    endpoint: Option<Endpoint>,
    secure: bool,
    path: Option<&str>,
    params: &[(&str, &str)],
) -> String {
    let scheme = if secure { "wss" } else { "ws" };
    let netloc = match endpoint {
        Some(Endpoint::Unix(socket)) => format!("unix:{socket}"),
        Some(Endpoint::Tcp(port)) => format!("{host}:{port}"),
        None => format!("{host}:{}", if secure { 443 } else { 80 }),
    };
    let path = match path {
        Some(p) => utf8_percent_encode(p, PATH_ESCAPE).to_string(),
        None => "/".to_string(),
    };
    let mut url = format!("{scheme}://{netloc}{path}");
    if !params.is_empty() {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();
        url.push('?');
        url.push_str(&query);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let url = parse_url("ws://example.com/chat").unwrap();
        assert!(!url.secure);
        assert_eq!(url.host, "example.com");
        assert_eq!(url.port(), Some(80));
        assert_eq!(url.resource, "/chat");
        assert_eq!(url.path, "/chat");
        assert!(url.params.is_empty());
    }

    #[test]
    fn test_parse_secure_default_port_and_path() {
        let url = parse_url("wss://Example.COM").unwrap();
        assert!(url.secure);
        assert_eq!(url.host, "example.com");
        assert_eq!(url.port(), Some(443));
        assert_eq!(url.resource, "/");
    }

    #[test]
    fn test_parse_query() {
        let url = parse_url("ws://localhost:9000/ws?a=1&b=2&a=3&empty=").unwrap();
        assert_eq!(url.port(), Some(9000));
        assert_eq!(url.resource, "/ws?a=1&b=2&a=3&empty=");
        assert_eq!(url.params["a"], vec!["1", "3"]);
        assert_eq!(url.params["b"], vec!["2"]);
        assert!(!url.params.contains_key("empty"));
    }

    #[test]
    fn test_parse_unescapes_path() {
        let url = parse_url("ws://localhost/a%20b").unwrap();
        assert_eq!(url.path, "/a b");
        assert_eq!(url.resource, "/a%20b");
    }

    #[test]
    fn test_parse_unix_socket() {
        let url = parse_url("ws://unix:/tmp/file.sock").unwrap();
        assert_eq!(url.host, "unix");
        assert_eq!(url.endpoint, Endpoint::Unix("/tmp/file.sock".into()));
        assert_eq!(url.port(), None);
    }

    #[test]
    fn test_parse_rejects() {
        assert!(matches!(parse_url("http://example.com"), Err(Error::InvalidUrl(_))));
        assert!(matches!(parse_url("ws://example.com/#frag"), Err(Error::InvalidUrl(_))));
        assert!(matches!(parse_url("ws://example.com:0/"), Err(Error::InvalidUrl(_))));
        assert!(matches!(parse_url("not a url"), Err(Error::InvalidUrl(_))));
    }

    #[test]
    fn test_create_url() {
        assert_eq!(create_url("localhost", None, false, None, &[]), "ws://localhost:80/");
        assert_eq!(
            create_url("example.com", Some(Endpoint::Tcp(9000)), true, Some("/a b"), &[("x", "1")]),
            "wss://example.com:9000/a%20b?x=1"
        );
        assert_eq!(
            create_url("unix", Some(Endpoint::Unix("/tmp/s.sock".into())), false, None, &[]),
            "ws://unix:/tmp/s.sock/"
        );
    }

    #[test]
    fn test_create_then_parse() {
        let url = create_url("example.com", Some(Endpoint::Tcp(8080)), false, Some("/ws"), &[("k", "v")]);
        let parsed = parse_url(&url).unwrap();
        assert_eq!(parsed.port(), Some(8080));
        assert_eq!(parsed.path, "/ws");
        assert_eq!(parsed.params["k"], vec!["v"]);
    }
}
