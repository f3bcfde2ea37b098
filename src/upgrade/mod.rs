use bytes::Bytes;
use hyper::header::{HeaderMap, HeaderName, CONNECTION, HOST, UPGRADE};
use hyper::http::request::Parts;
use hyper::{Method, Uri, Version};

/// True iff the headers describe a WebSocket upgrade: some `Connection`
/// value carries an `upgrade` token and some `Upgrade` value carries a
/// `websocket` token, case-insensitively.
///
/// Computed fresh on every call; repeated header occurrences are all scanned.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    header_contains_token(headers, CONNECTION, "upgrade")
        && header_contains_token(headers, UPGRADE, "websocket")
}

fn header_contains_token(headers: &HeaderMap, name: HeaderName, token: &str) -> bool {
    headers.get_all(name).iter().any(|value| {
        value
            .to_str()
            .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
            .unwrap_or(false)
    })
}

/// The client's upgrade request, owned so it can be replayed to the target
/// after the original connection has been hijacked.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
}

impl UpgradeRequest {
    pub fn new(uri: Uri, headers: HeaderMap) -> Self {
        Self {
            method: Method::GET,
            uri,
            version: Version::HTTP_11,
            headers,
        }
    }

    /// Capture a hyper request's head, e.g. right before hijacking it.
    pub fn from_parts(parts: &Parts) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            version: parts.version,
            headers: parts.headers.clone(),
        }
    }

    /// The `host:port` address to dial for this request.
    ///
    /// Prefers the request URI's authority (absolute-form proxy requests),
    /// falling back to the `Host` header (origin-form requests seen on the
    /// MITM path).
    pub fn authority(&self, default_port: u16) -> Option<String> {
        if let Some(host) = self.uri.host() {
            let port = self.uri.port_u16().unwrap_or(default_port);
            return Some(format!("{}:{}", host, port));
        }
        let host = self.headers.get(HOST)?.to_str().ok()?.trim();
        if host.is_empty() {
            return None;
        }
        if host.rfind(':') > host.rfind(']') {
            Some(host.to_string())
        } else {
            Some(format!("{}:{}", host, default_port))
        }
    }

    /// Serialize the request head to HTTP/1.1 wire form, headers unmodified
    /// and in stored order. A `Host` header is derived from the URI only when
    /// the request carries none.
    pub fn to_bytes(&self) -> Bytes {
        let path = self
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(self.method.as_str().as_bytes());
        out.push(b' ');
        out.extend_from_slice(path.as_bytes());
        out.push(b' ');
        out.extend_from_slice(version_str(self.version).as_bytes());
        out.extend_from_slice(b"\r\n");

        if !self.headers.contains_key(HOST) {
            if let Some(host) = self.uri.host() {
                out.extend_from_slice(b"Host: ");
                out.extend_from_slice(host.as_bytes());
                if let Some(port) = self.uri.port_u16() {
                    out.extend_from_slice(format!(":{}", port).as_bytes());
                }
                out.extend_from_slice(b"\r\n");
            }
        }

        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_str().as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");

        Bytes::from(out)
    }
}

pub(crate) fn version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_10 => "HTTP/1.0",
        _ => "HTTP/1.1",
    }
}
