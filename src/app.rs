//! Top-level commands run by the binary.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::StartupError;
use crate::http::{self, HostAllowList};
use crate::identity;
use crate::proxy::ProxyTarget;
use crate::store::{self, certificate_record_name, CertificateStore};

/// What the process was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run both listeners until shutdown.
    Serve,
    /// Remove the cached certificate for the configured hostnames.
    Evict,
}

/// Resolve identity, open the store, then run `command`.
pub async fn run(command: Command, config: AppConfig) -> Result<(), StartupError> {
    let project =
        identity::resolve_project(config.project.as_deref(), &config.metadata_url).await?;
    let store = store::open_store(&config.store, &project).await?;
    let allow = HostAllowList::new(&config.hostnames)?;

    match command {
        Command::Serve => serve(&config, allow, store).await,
        Command::Evict => evict(&config, &allow, store.as_ref()).await,
    }
}

async fn serve(
    config: &AppConfig,
    allow: HostAllowList,
    store: Arc<dyn CertificateStore>,
) -> Result<(), StartupError> {
    let target = ProxyTarget::from_bucket(&config.bucket)?;
    tracing::info!(origin = %target.url(), bucket = %config.bucket, "Serving site from origin");

    http::start_server(config, allow, store, target).await?;
    Ok(())
}

/// Delete the certificate record the ACME engine would load for `allow`.
///
/// The next `serve` then issues a fresh certificate. The account key is kept.
pub async fn evict(
    config: &AppConfig,
    allow: &HostAllowList,
    store: &dyn CertificateStore,
) -> Result<(), StartupError> {
    let name = certificate_record_name(allow.hosts(), config.acme.directory_url());
    store.delete(&name).await?;
    tracing::info!(record = %name, "Evicted cached certificate");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCertificateStore;

    fn config() -> AppConfig {
        AppConfig {
            hostnames: vec!["blog.example".to_string()],
            bucket: "gs://www.blog.example".to_string(),
            ..AppConfig::default()
        }
    }

    #[tokio::test]
    async fn test_evict_removes_certificate_only() {
        let config = config();
        let allow = HostAllowList::new(&config.hostnames).unwrap();
        let store = MemoryCertificateStore::new();

        let cert_name = certificate_record_name(allow.hosts(), config.acme.directory_url());
        store.put(&cert_name, b"pem").await.unwrap();
        store.put("acme_account+0123", b"key").await.unwrap();

        evict(&config, &allow, &store).await.unwrap();

        assert!(store.get(&cert_name).await.unwrap_err().is_miss());
        assert_eq!(store.get("acme_account+0123").await.unwrap(), b"key");
    }

    #[tokio::test]
    async fn test_evict_without_cached_certificate_succeeds() {
        let config = config();
        let allow = HostAllowList::new(&config.hostnames).unwrap();
        let store = MemoryCertificateStore::new();

        evict(&config, &allow, &store).await.unwrap();
        assert!(store.is_empty().await);
    }
}
