//! Inbound-to-outbound request rewriting.
//!
//! Everything here is synchronous and free of I/O: the director only moves
//! the request onto the origin's URL and records the host the client asked for.

use http::header::{HeaderValue, HOST, USER_AGENT};
use http::{Request, Uri};

use super::ProxyTarget;
use crate::config::ORIGINAL_HOST_HEADER;

/// Join two URL paths with exactly one `/` between them.
pub fn single_joining_slash(a: &str, b: &str) -> String {
    let a_slash = a.ends_with('/');
    let b_slash = b.starts_with('/');
    match (a_slash, b_slash) {
        (true, true) => format!("{}{}", a, &b[1..]),
        (false, false) => format!("{}/{}", a, b),
        _ => format!("{}{}", a, b),
    }
}

/// Origin query first, then request query; `&` only when both are non-empty.
pub fn merge_queries(target: &str, request: &str) -> String {
    if target.is_empty() || request.is_empty() {
        format!("{}{}", target, request)
    } else {
        format!("{}&{}", target, request)
    }
}

/// Host the client addressed: the `Host` header, or the URI authority for HTTP/2.
pub fn client_visible_host<B>(req: &Request<B>) -> Option<HeaderValue> {
    req.headers().get(HOST).cloned().or_else(|| {
        req.uri()
            .authority()
            .and_then(|authority| HeaderValue::from_str(authority.as_str()).ok())
    })
}

/// Rewrite `req` so it targets the origin described by `target`.
pub fn direct<B>(target: &ProxyTarget, mut req: Request<B>) -> Result<Request<B>, http::Error> {
    let path = single_joining_slash(target.base_path(), req.uri().path());
    let query = merge_queries(target.base_query(), req.uri().query().unwrap_or(""));
    let path_and_query = if query.is_empty() {
        path
    } else {
        format!("{}?{}", path, query)
    };

    let uri = Uri::builder()
        .scheme(target.scheme().clone())
        .authority(target.authority().clone())
        .path_and_query(path_and_query)
        .build()?;

    let original_host = client_visible_host(&req);
    *req.uri_mut() = uri;

    let headers = req.headers_mut();
    if !headers.contains_key(USER_AGENT) {
        // Keep the client library from injecting its own
        headers.insert(USER_AGENT, HeaderValue::from_static(""));
    }
    match original_host {
        Some(host) => {
            headers.insert(ORIGINAL_HOST_HEADER, host);
        }
        None => {
            headers.remove(ORIGINAL_HOST_HEADER);
        }
    }
    headers.insert(HOST, target.host_header().clone());

    Ok(req)
}
