use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::config::ConfigError;
use crate::http::ServerError;
use crate::store::StoreError;

/// Failures scoped to a single proxied request.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("Origin returned an unparseable redirect location {location:?}: {source}")]
    RedirectParse {
        location: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Failed to read request body: {0}")]
    RequestBody(#[source] axum::Error),

    #[error("Request body exceeds {limit} bytes")]
    RequestTooLarge { limit: usize },

    #[error("Failed to build upstream request: {0}")]
    Request(#[from] http::Error),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            ProxyError::Upstream(_) | ProxyError::RedirectParse { .. } => {
                tracing::warn!(error = %self, "Proxy request failed");
                StatusCode::BAD_GATEWAY
            }
            ProxyError::RequestBody(_) => {
                tracing::debug!(error = %self, "Rejected request body");
                StatusCode::BAD_REQUEST
            }
            ProxyError::RequestTooLarge { .. } => {
                tracing::debug!(error = %self, "Rejected request body");
                StatusCode::PAYLOAD_TOO_LARGE
            }
            ProxyError::Request(_) => {
                tracing::error!("Internal error: {:?}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let reason = status.canonical_reason().unwrap_or("Error");
        (status, reason).into_response()
    }
}

/// Any condition that stops the process. All of them are fatal.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Certificate store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Server(#[from] ServerError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_parse_maps_to_bad_gateway() {
        let source = url::Url::parse("http://[::1").unwrap_err();
        let err = ProxyError::RedirectParse {
            location: "http://[::1".to_string(),
            source,
        };
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_oversized_body_maps_to_payload_too_large() {
        let response = ProxyError::RequestTooLarge { limit: 1024 }.into_response();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_request_build_failure_is_internal() {
        let err = http::Request::builder()
            .uri("http://exa mple/")
            .body(())
            .unwrap_err();
        let response = ProxyError::Request(err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
