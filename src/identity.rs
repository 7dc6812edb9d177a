//! Operating project resolution.
//!
//! The certificate store is partitioned by project. When no project is
//! configured, the instance metadata server is asked for it, the same way
//! cloud client libraries discover their default project.

use std::time::Duration;

use crate::config::ConfigError;

/// Header the metadata server requires on every request.
const METADATA_FLAVOR_HEADER: &str = "Metadata-Flavor";
const METADATA_FLAVOR: &str = "Google";

const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

/// Return `explicit` if set, otherwise query `metadata_url` for the project id.
pub async fn resolve_project(
    explicit: Option<&str>,
    metadata_url: &str,
) -> Result<String, ConfigError> {
    if let Some(project) = explicit {
        tracing::debug!(project = %project, "Using configured project");
        return Ok(project.to_string());
    }

    tracing::info!(url = %metadata_url, "No project configured, querying metadata server");

    let client = reqwest::Client::builder()
        .timeout(METADATA_TIMEOUT)
        .build()
        .map_err(|e| ConfigError::Identity(format!("Failed to build metadata client: {}", e)))?;

    let response = client
        .get(metadata_url)
        .header(METADATA_FLAVOR_HEADER, METADATA_FLAVOR)
        .send()
        .await
        .map_err(|e| ConfigError::Identity(format!("Metadata request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ConfigError::Identity(format!(
            "Metadata server returned {}",
            status
        )));
    }

    let body = response
        .text()
        .await
        .map_err(|e| ConfigError::Identity(format!("Failed to read metadata response: {}", e)))?;

    let project = body.trim();
    if project.is_empty() {
        return Err(ConfigError::Identity(
            "Metadata server returned an empty project id".to_string(),
        ));
    }

    tracing::info!(project = %project, "Resolved project from metadata server");
    Ok(project.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::Router;

    async fn spawn_metadata(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/computeMetadata/v1/project/project-id", addr)
    }

    #[tokio::test]
    async fn test_explicit_project_skips_metadata() {
        // Unroutable URL: any request would fail
        let project = resolve_project(Some("configured"), "http://127.0.0.1:1/")
            .await
            .unwrap();
        assert_eq!(project, "configured");
    }

    #[tokio::test]
    async fn test_project_from_metadata() {
        let app = Router::new().route(
            "/computeMetadata/v1/project/project-id",
            get(|headers: HeaderMap| async move {
                if headers.get(METADATA_FLAVOR_HEADER).map(|v| v.as_bytes())
                    == Some(METADATA_FLAVOR.as_bytes())
                {
                    (StatusCode::OK, "detected-project\n")
                } else {
                    (StatusCode::FORBIDDEN, "")
                }
            }),
        );
        let url = spawn_metadata(app).await;

        let project = resolve_project(None, &url).await.unwrap();
        assert_eq!(project, "detected-project");
    }

    #[tokio::test]
    async fn test_metadata_error_status_is_identity_error() {
        let app = Router::new().route(
            "/computeMetadata/v1/project/project-id",
            get(|| async { (StatusCode::NOT_FOUND, "") }),
        );
        let url = spawn_metadata(app).await;

        let err = resolve_project(None, &url).await.unwrap_err();
        assert!(matches!(err, ConfigError::Identity(_)));
    }

    #[tokio::test]
    async fn test_empty_metadata_body_is_identity_error() {
        let app = Router::new().route(
            "/computeMetadata/v1/project/project-id",
            get(|| async { "  " }),
        );
        let url = spawn_metadata(app).await;

        assert!(matches!(
            resolve_project(None, &url).await,
            Err(ConfigError::Identity(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_metadata_is_identity_error() {
        let err = resolve_project(None, "http://127.0.0.1:1/project-id")
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Identity(_)));
    }
}
