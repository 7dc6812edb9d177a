//! Plaintext listener: ACME HTTP-01 challenges, everything else to HTTPS.
//!
//! The challenge route is matched before the redirect fallback. If the order
//! were reversed the ACME authority would be bounced to HTTPS and validation
//! of a not-yet-issued certificate could never succeed.

use std::convert::Infallible;

use axum::extract::Request;
use axum::http::header::LOCATION;
use axum::http::uri::Authority;
use axum::http::{StatusCode, Uri};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use axum_extra::extract::Host;
use tower::Service;

use crate::config::{ACME_CHALLENGE_ROUTE, DEFAULT_HTTPS_PORT};
use crate::middleware::request_id_layer;

/// Build the plaintext router around the ACME challenge service.
pub fn plaintext_router<S>(challenge: S, https_port: u16) -> Router
where
    S: Service<Request, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Response: IntoResponse,
    S::Future: Send + 'static,
{
    Router::new()
        .route_service(ACME_CHALLENGE_ROUTE, challenge)
        .fallback(any(move |Host(host): Host, uri: Uri| async move {
            redirect_to_https(&host, &uri, https_port)
        }))
        .layer(middleware::from_fn(request_id_layer))
}

/// 301 to the same host and path over HTTPS.
pub fn redirect_to_https(host: &str, uri: &Uri, https_port: u16) -> Response {
    let host_without_port = host
        .parse::<Authority>()
        .map(|authority| authority.host().to_string())
        .unwrap_or_else(|_| host.split(':').next().unwrap_or(host).to_string());

    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

    let https_url = if https_port == DEFAULT_HTTPS_PORT {
        format!("https://{}{}", host_without_port, path_and_query)
    } else {
        format!("https://{}:{}{}", host_without_port, https_port, path_and_query)
    };

    tracing::debug!(from = %uri, to = %https_url, "Redirecting HTTP to HTTPS");

    (StatusCode::MOVED_PERMANENTLY, [(LOCATION, https_url)]).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use tower::ServiceExt;

    fn challenge_stub() -> axum::routing::RouterIntoService<Body> {
        Router::new()
            .fallback(|| async { (StatusCode::OK, "key-authorization") })
            .into_service()
    }

    fn get(uri: &str, host: &str) -> Request {
        Request::builder()
            .uri(uri)
            .header("host", host)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_plain_request_redirected_permanently() {
        let app = plaintext_router(challenge_stub(), 443);
        let response = app
            .oneshot(get("/any/path", "blog.example"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers()[LOCATION],
            "https://blog.example/any/path"
        );
    }

    #[tokio::test]
    async fn test_query_and_port_handling() {
        let app = plaintext_router(challenge_stub(), 443);
        let response = app
            .oneshot(get("/search?q=rust&page=2", "blog.example:80"))
            .await
            .unwrap();
        assert_eq!(
            response.headers()[LOCATION],
            "https://blog.example/search?q=rust&page=2"
        );
    }

    #[tokio::test]
    async fn test_non_default_https_port_included() {
        let app = plaintext_router(challenge_stub(), 8443);
        let response = app.oneshot(get("/", "blog.example:8080")).await.unwrap();
        assert_eq!(response.headers()[LOCATION], "https://blog.example:8443/");
    }

    #[tokio::test]
    async fn test_challenge_reaches_acme_handler_first() {
        let app = plaintext_router(challenge_stub(), 443);
        let response = app
            .oneshot(get("/.well-known/acme-challenge/abc123", "blog.example"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(LOCATION).is_none());
        assert_eq!(body_string(response).await, "key-authorization");
    }

    #[tokio::test]
    async fn test_challenge_prefix_without_token_redirects() {
        let app = plaintext_router(challenge_stub(), 443);
        let response = app
            .oneshot(get("/.well-known/acme-challenge/", "blog.example"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    }

    #[test]
    fn test_redirect_to_https_ipv6_host() {
        let uri: Uri = "/x".parse().unwrap();
        let response = redirect_to_https("[::1]:80", &uri, 443);
        assert_eq!(response.headers()[LOCATION], "https://[::1]/x");
    }
}
