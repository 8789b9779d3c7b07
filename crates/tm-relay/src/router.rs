//! Pure resolution of inbound requests to upstream request descriptors.
//!
//! No I/O and no shared state: given the same inputs, `resolve` always
//! produces the same descriptor, which keeps the prefix/join/header rules
//! table-testable in isolation.

use http::header::HeaderName;
use http::{HeaderMap, HeaderValue, Method, Uri};

use crate::error::RelayError;

/// Headers meaningful only for a single connection segment. Never forwarded,
/// in either direction.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Marker header carrying the original client path, so the upstream can
/// observe relayed traffic and detect forwarding loops.
pub const FORWARDED_PATH_HEADER: &str = "x-relay-forwarded-path";

/// Everything the upstream client needs to issue one forwarded request.
#[derive(Debug)]
pub struct UpstreamRequest {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
}

/// True for headers that must not cross the relay.
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name)
}

/// Resolve an inbound request to its upstream equivalent.
///
/// The configured prefix is stripped from the inbound path and the remainder
/// (including the query string) is appended to `base_url`, joined with
/// exactly one `/` regardless of trailing/leading slashes on either side.
/// Rejects with [`RelayError::PrefixMismatch`] when the path does not carry
/// the prefix at a segment boundary — `/sss` matches `/sss` and `/sss/x`,
/// never `/sssfoo`.
///
/// Forwarded headers are the inbound set minus hop-by-hop headers, `host`,
/// and `content-length` (recomputed by the HTTP client), optionally minus
/// `authorization`, plus the [`FORWARDED_PATH_HEADER`] marker.
pub fn resolve(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    base_url: &str,
    path_prefix: &str,
    strip_authorization: bool,
) -> Result<UpstreamRequest, RelayError> {
    let path = uri.path();
    let remainder = strip_prefix(path, path_prefix).ok_or(RelayError::PrefixMismatch)?;

    let query = uri.query().map(|q| format!("?{q}")).unwrap_or_default();
    let url = format!(
        "{}/{}{}",
        base_url.trim_end_matches('/'),
        remainder.trim_start_matches('/'),
        query
    );

    let mut forwarded = HeaderMap::with_capacity(headers.len() + 1);
    for (name, value) in headers {
        let name_str = name.as_str();
        if is_hop_by_hop(name_str) || name_str == "host" || name_str == "content-length" {
            continue;
        }
        if strip_authorization && name_str == "authorization" {
            continue;
        }
        // Never trust an inbound copy of the marker
        if name_str == FORWARDED_PATH_HEADER {
            continue;
        }
        forwarded.append(name.clone(), value.clone());
    }
    if let Ok(value) = HeaderValue::from_str(path) {
        forwarded.insert(HeaderName::from_static(FORWARDED_PATH_HEADER), value);
    }

    Ok(UpstreamRequest {
        url,
        method: method.clone(),
        headers: forwarded,
    })
}

/// Strip `prefix` from `path` at a path-segment boundary. Returns the
/// remainder (possibly empty) or `None` when the prefix matches only part of
/// a segment.
fn strip_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let prefix = prefix.trim_end_matches('/');
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}
