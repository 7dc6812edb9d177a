//! SQLite-backed certificate store.
//!
//! Records live in a single `cached_certificates` table keyed by
//! `(project, name)`, so several deployments can share one database file
//! without seeing each other's certificates.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};

use super::{CertificateStore, StoreError};

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteCertificateStore {
    pool: SqlitePool,
    project: String,
    writes: AtomicU64,
}

impl SqliteCertificateStore {
    /// Open (creating if needed) the database at `database_url` and run migrations.
    pub async fn connect(database_url: &str, project: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePool::connect_with(options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self::from_pool(pool, project))
    }

    pub fn from_pool(pool: SqlitePool, project: &str) -> Self {
        Self {
            pool,
            project: project.to_string(),
            writes: AtomicU64::new(0),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Number of puts that actually modified a row since this handle was opened.
    pub fn physical_writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CertificateStore for SqliteCertificateStore {
    async fn get(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        let row: Option<Vec<u8>> = sqlx::query_scalar(
            "SELECT certificate FROM cached_certificates WHERE project = ?1 AND name = ?2",
        )
        .bind(&self.project)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(name = %name, error = %e, "Failed to read cached certificate");
            e
        })?;

        match row {
            Some(data) => {
                tracing::debug!(name = %name, "Certificate store hit");
                Ok(data)
            }
            None => {
                tracing::info!(name = %name, "Certificate store miss");
                Err(StoreError::CacheMiss(name.to_string()))
            }
        }
    }

    async fn put(&self, name: &str, data: &[u8]) -> Result<(), StoreError> {
        // Take the write lock up front; a deferred transaction cannot upgrade
        // from read to write while another connection holds it, and fails
        // with SQLITE_BUSY without honouring the busy timeout.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let current: Option<Vec<u8>> = sqlx::query_scalar(
            "SELECT certificate FROM cached_certificates WHERE project = ?1 AND name = ?2",
        )
        .bind(&self.project)
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?;

        if current.as_deref() == Some(data) {
            tx.rollback().await?;
            tracing::debug!(name = %name, "Certificate unchanged, skipping write");
            return Ok(());
        }

        let updated_at = chrono::Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO cached_certificates (project, name, certificate, updated_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT (project, name) DO UPDATE \
             SET certificate = excluded.certificate, updated_at = excluded.updated_at",
        )
        .bind(&self.project)
        .bind(name)
        .bind(data)
        .bind(&updated_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = result {
            tracing::error!(name = %name, error = %e, "Failed to store certificate");
            return Err(e.into());
        }

        tx.commit().await.map_err(|e| {
            tracing::error!(name = %name, error = %e, "Failed to commit certificate write");
            e
        })?;

        self.writes.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(name = %name, bytes = data.len(), "Stored certificate");
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM cached_certificates WHERE project = ?1 AND name = ?2")
            .bind(&self.project)
            .bind(name)
            .execute(&self.pool)
            .await?;

        tracing::info!(name = %name, "Deleted cached certificate");
        Ok(())
    }
}
