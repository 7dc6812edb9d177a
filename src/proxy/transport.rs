//! Origin transports.
//!
//! [`ReqwestTransport`] performs the actual HTTP exchange with the origin.
//! [`RedirectSafeTransport`] wraps any transport and rewrites redirect
//! `Location` headers so the origin's hostname never reaches the client.

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use http::header::{HeaderMap, HeaderValue, LOCATION};
use http::uri::Authority;
use http::{Request, Response, StatusCode};
use url::Url;

use crate::config::{UpstreamConfig, ORIGINAL_HOST_HEADER};
use crate::error::ProxyError;

/// Largest request body forwarded to the origin.
pub const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

/// A single request/response exchange with the origin.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn round_trip(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError>;
}

/// Transport backed by a shared `reqwest` client.
///
/// Redirects are never followed; the client sees them (rewritten) instead.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &UpstreamConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn round_trip(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let (parts, body) = req.into_parts();
        let body = axum::body::to_bytes(body, MAX_REQUEST_BODY_BYTES)
            .await
            .map_err(request_body_error)?;

        let mut builder = self
            .client
            .request(parts.method, parts.uri.to_string())
            .headers(parts.headers);
        if !body.is_empty() {
            builder = builder.body(body);
        }

        let upstream = builder.send().await?;

        let status = upstream.status();
        let headers = upstream.headers().clone();
        tracing::debug!(status = status.as_u16(), "Origin responded");

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Distinguish the body size limit from other read failures.
fn request_body_error(err: axum::Error) -> ProxyError {
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        if cause.is::<http_body_util::LengthLimitError>() {
            return ProxyError::RequestTooLarge {
                limit: MAX_REQUEST_BODY_BYTES,
            };
        }
        source = cause.source();
    }
    ProxyError::RequestBody(err)
}

/// Wraps a transport and rewrites 301/302 `Location` headers to the client-visible host.
pub struct RedirectSafeTransport<T> {
    inner: T,
}

impl<T> RedirectSafeTransport<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: Transport> Transport for RedirectSafeTransport<T> {
    async fn round_trip(&self, mut req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let client_host = req.headers_mut().remove(ORIGINAL_HOST_HEADER);
        let request_url = req.uri().to_string();

        let mut response = self.inner.round_trip(req).await?;

        if is_rewritten_redirect(response.status()) {
            rewrite_location(response.headers_mut(), &request_url, client_host.as_ref())?;
        }
        Ok(response)
    }
}

fn is_rewritten_redirect(status: StatusCode) -> bool {
    status == StatusCode::MOVED_PERMANENTLY || status == StatusCode::FOUND
}

/// Point the `Location` header at `https://<client_host>`, keeping path, query and fragment.
///
/// An absolute location keeps its path, query and fragment byte for byte.
/// Relative locations are resolved against `request_url` first, which
/// normalizes dot segments. Without a client host the location is reduced to
/// its path and query. A response without `Location` is left alone.
pub fn rewrite_location(
    headers: &mut HeaderMap,
    request_url: &str,
    client_host: Option<&HeaderValue>,
) -> Result<(), ProxyError> {
    let Some(location) = headers.get(LOCATION) else {
        return Ok(());
    };
    let location = String::from_utf8_lossy(location.as_bytes()).into_owned();

    let base = Url::parse(request_url).ok();
    let parsed = Url::options()
        .base_url(base.as_ref())
        .parse(&location)
        .map_err(|source| ProxyError::RedirectParse {
            location: location.clone(),
            source,
        })?;

    let tail = if Url::parse(&location).is_ok() {
        raw_path_and_rest(&location)
    } else {
        resolved_path_and_rest(&parsed)
    };

    let mut rewritten = String::new();
    if let Some(authority) = client_host
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.parse::<Authority>().ok())
    {
        rewritten.push_str("https://");
        rewritten.push_str(authority.as_str());
    }
    rewritten.push_str(&tail);

    let value = HeaderValue::from_str(&rewritten).map_err(http::Error::from)?;
    headers.insert(LOCATION, value);
    tracing::debug!(from = %location, to = %rewritten, "Rewrote origin redirect");
    Ok(())
}

/// Everything after the authority of an absolute URL, as written.
fn raw_path_and_rest(location: &str) -> String {
    let after_scheme = match location.find("://") {
        Some(idx) => &location[idx + 3..],
        None => location,
    };
    match after_scheme.find(|c: char| matches!(c, '/' | '?' | '#')) {
        Some(idx) if after_scheme[idx..].starts_with('/') => after_scheme[idx..].to_string(),
        Some(idx) => format!("/{}", &after_scheme[idx..]),
        None => "/".to_string(),
    }
}

fn resolved_path_and_rest(url: &Url) -> String {
    let mut tail = url.path().to_string();
    if let Some(query) = url.query() {
        tail.push('?');
        tail.push_str(query);
    }
    if let Some(fragment) = url.fragment() {
        tail.push('#');
        tail.push_str(fragment);
    }
    tail
}
