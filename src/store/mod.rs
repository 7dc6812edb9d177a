//! Persistent certificate storage.
//!
//! The ACME engine keeps account keys and issued certificate chains as opaque
//! byte blobs keyed by a record name. [`CertificateStore`] is the capability
//! it needs from a backend: a get that distinguishes "not found" from real
//! failures, an idempotent put, and a delete.
//!
//! Backends:
//! - [`SqliteCertificateStore`]: on-disk store, records partitioned by project
//! - [`MemoryCertificateStore`]: in-process store for development and tests
//!
//! [`AcmeStoreCache`] adapts any backend to the cache traits of `rustls-acme`.

mod acme;
mod memory;
mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;

pub use acme::{account_record_name, certificate_record_name, AcmeStoreCache};
pub use memory::MemoryCertificateStore;
pub use sqlite::SqliteCertificateStore;

use crate::config::{StoreBackend, StoreConfig};

/// Errors returned by certificate store backends.
///
/// `CacheMiss` is an expected outcome (no certificate yet) and must never be
/// folded into `Storage`: the ACME engine issues on a miss and retries on
/// anything else.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("No cached record named {0}")]
    CacheMiss(String),

    #[error("Certificate store failure: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Certificate store migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    /// True when the error only signals an absent record.
    pub fn is_miss(&self) -> bool {
        matches!(self, StoreError::CacheMiss(_))
    }
}

/// Key/value store for certificate material.
///
/// Implementations must be safe to call concurrently for different names.
/// `put` compares before writing and assumes a single active writer per name;
/// two processes racing `put` on the same name end up last-writer-wins.
#[async_trait]
pub trait CertificateStore: Send + Sync {
    /// Read the record for `name`, failing with [`StoreError::CacheMiss`] when absent.
    async fn get(&self, name: &str) -> Result<Vec<u8>, StoreError>;

    /// Store `data` under `name`, skipping the write if the stored bytes are identical.
    async fn put(&self, name: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Remove the record for `name`. Removing an absent record succeeds.
    async fn delete(&self, name: &str) -> Result<(), StoreError>;
}

/// Construct the configured backend for the given project.
pub async fn open_store(
    config: &StoreConfig,
    project: &str,
) -> Result<Arc<dyn CertificateStore>, StoreError> {
    match config.backend {
        StoreBackend::Sqlite => {
            let store = SqliteCertificateStore::connect(&config.database_url, project).await?;
            tracing::info!(
                database = %config.database_url,
                project = %project,
                "Opened SQLite certificate store"
            );
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory certificate store; certificates are lost on restart");
            Ok(Arc::new(MemoryCertificateStore::new()))
        }
    }
}
