//! Reverse proxy to the bucket origin.
//!
//! Requests arriving on the TLS listener are rewritten by the [`director`],
//! sent through a [`transport::Transport`] (normally a
//! [`RedirectSafeTransport`] over [`ReqwestTransport`]), and relayed back.
//! Hop-by-hop headers are dropped in both directions and the client address is
//! appended to `X-Forwarded-For`.

pub mod director;
pub mod transport;

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware;
use axum::response::Response;
use axum::Router;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION};
use http::uri::{Authority, Scheme};
use http::Uri;

pub use director::direct;
pub use transport::{RedirectSafeTransport, ReqwestTransport, Transport};

use crate::config::ConfigError;
use crate::error::ProxyError;
use crate::middleware::request_id_layer;
use crate::state::ProxyState;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Headers that describe a single connection and must not be relayed.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Where proxied requests are sent. Built once at startup.
#[derive(Debug, Clone)]
pub struct ProxyTarget {
    scheme: Scheme,
    authority: Authority,
    host_header: HeaderValue,
    base_path: String,
    base_query: String,
}

impl ProxyTarget {
    /// Build the origin for a bucket identifier such as `gs://www.example.com`.
    ///
    /// Any `<scheme>://` prefix is stripped and the origin is always reached
    /// over plain HTTP.
    pub fn from_bucket(bucket: &str) -> Result<Self, ConfigError> {
        let name = match bucket.find("://") {
            Some(idx) => &bucket[idx + 3..],
            None => bucket,
        };

        let uri: Uri = format!("http://{}", name).parse().map_err(|e| {
            ConfigError::Validation(format!("Invalid origin bucket {:?}: {}", bucket, e))
        })?;
        let authority = uri.authority().cloned().ok_or_else(|| {
            ConfigError::Validation(format!("Origin bucket {:?} has no host", bucket))
        })?;
        let host_header = HeaderValue::from_str(authority.as_str()).map_err(|e| {
            ConfigError::Validation(format!("Invalid origin host {:?}: {}", authority, e))
        })?;

        Ok(Self {
            scheme: Scheme::HTTP,
            authority,
            host_header,
            base_path: uri.path().to_string(),
            base_query: uri.query().unwrap_or("").to_string(),
        })
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn host_header(&self) -> &HeaderValue {
        &self.host_header
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn base_query(&self) -> &str {
        &self.base_query
    }

    /// Origin URL, for logging.
    pub fn url(&self) -> String {
        let mut url = format!("{}://{}{}", self.scheme, self.authority, self.base_path);
        if !self.base_query.is_empty() {
            url.push('?');
            url.push_str(&self.base_query);
        }
        url
    }
}

/// Router for the TLS listener: every path is proxied.
pub fn router(state: ProxyState) -> Router {
    Router::new()
        .fallback(forward)
        .with_state(state)
        .layer(middleware::from_fn(request_id_layer))
}

/// Proxy one request to the origin.
pub async fn forward(
    State(state): State<ProxyState>,
    req: Request,
) -> Result<Response, ProxyError> {
    let client_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let mut outbound = direct(&state.target, req)?;
    remove_hop_by_hop_headers(outbound.headers_mut());
    if let Some(ip) = client_ip {
        append_forwarded_for(outbound.headers_mut(), ip);
    }

    let mut response = state.transport.round_trip(outbound).await?;
    remove_hop_by_hop_headers(response.headers_mut());
    Ok(response)
}

/// Drop the fixed hop-by-hop headers plus any listed in `Connection`.
pub fn remove_hop_by_hop_headers(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

/// Append `ip` to any `X-Forwarded-For` chain already on the request.
pub fn append_forwarded_for(headers: &mut HeaderMap, ip: IpAddr) {
    let prior: Vec<&str> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect();

    let chain = if prior.is_empty() {
        ip.to_string()
    } else {
        format!("{}, {}", prior.join(", "), ip)
    };

    if let Ok(value) = HeaderValue::from_str(&chain) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bucket_strips_gs_prefix() {
        let target = ProxyTarget::from_bucket("gs://www.blog.example").unwrap();
        assert_eq!(target.authority().as_str(), "www.blog.example");
        assert_eq!(target.scheme(), &Scheme::HTTP);
        assert_eq!(target.base_query(), "");
        assert_eq!(target.url(), "http://www.blog.example/");
    }

    #[test]
    fn test_from_bucket_strips_any_scheme() {
        let target = ProxyTarget::from_bucket("https://bucket.example").unwrap();
        assert_eq!(target.authority().as_str(), "bucket.example");
        assert_eq!(target.scheme(), &Scheme::HTTP);
    }

    #[test]
    fn test_from_bucket_plain_name() {
        let target = ProxyTarget::from_bucket("bucket.example/prefix?x=1").unwrap();
        assert_eq!(target.host_header(), "bucket.example");
        assert_eq!(target.base_path(), "/prefix");
        assert_eq!(target.base_query(), "x=1");
        assert_eq!(target.url(), "http://bucket.example/prefix?x=1");
    }

    #[test]
    fn test_from_bucket_rejects_garbage() {
        assert!(matches!(
            ProxyTarget::from_bucket("gs://bad host"),
            Err(ConfigError::Validation(_))
        ));
        assert!(ProxyTarget::from_bucket("gs://").is_err());
    }

    #[test]
    fn test_remove_hop_by_hop_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive, x-custom-hop"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("x-custom-hop", HeaderValue::from_static("1"));
        headers.insert("content-type", HeaderValue::from_static("text/html"));

        remove_hop_by_hop_headers(&mut headers);

        assert_eq!(headers.len(), 1);
        assert_eq!(headers["content-type"], "text/html");
    }

    #[test]
    fn test_append_forwarded_for() {
        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, "203.0.113.7".parse().unwrap());
        assert_eq!(headers[X_FORWARDED_FOR], "203.0.113.7");

        append_forwarded_for(&mut headers, "10.0.0.1".parse().unwrap());
        assert_eq!(headers[X_FORWARDED_FOR], "203.0.113.7, 10.0.0.1");
    }
}
