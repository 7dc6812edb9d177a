//! In-process certificate store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CertificateStore, StoreError};

/// Certificate store backed by a `HashMap` behind an async lock.
///
/// Tracks the number of physical writes so callers can observe that
/// byte-identical puts are skipped.
#[derive(Debug, Default)]
pub struct MemoryCertificateStore {
    records: RwLock<HashMap<String, Vec<u8>>>,
    writes: AtomicU64,
}

impl MemoryCertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of puts that actually modified a record.
    pub fn physical_writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Number of records currently held.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl CertificateStore for MemoryCertificateStore {
    async fn get(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        match self.records.read().await.get(name) {
            Some(data) => {
                tracing::trace!(name = %name, "Memory store hit");
                Ok(data.clone())
            }
            None => {
                tracing::debug!(name = %name, "Memory store miss");
                Err(StoreError::CacheMiss(name.to_string()))
            }
        }
    }

    async fn put(&self, name: &str, data: &[u8]) -> Result<(), StoreError> {
        // Held for the whole compare-then-write
        let mut records = self.records.write().await;
        if records.get(name).map(Vec::as_slice) == Some(data) {
            tracing::trace!(name = %name, "Record unchanged, skipping write");
            return Ok(());
        }
        records.insert(name.to_string(), data.to_vec());
        self.writes.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(name = %name, bytes = data.len(), "Stored record in memory");
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.records.write().await.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_get_unknown_name_is_cache_miss() {
        let store = MemoryCertificateStore::new();
        let err = store.get("blog.example").await.unwrap_err();
        assert!(err.is_miss());
        assert!(matches!(err, StoreError::CacheMiss(name) if name == "blog.example"));
    }

    #[tokio::test]
    async fn test_put_then_get_round_trips_binary_content() {
        let store = MemoryCertificateStore::new();
        let data: Vec<u8> = (0..=255u8).collect();
        store.put("blog.example", &data).await.unwrap();
        assert_eq!(store.get("blog.example").await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_empty_content_is_stored_not_missing() {
        let store = MemoryCertificateStore::new();
        store.put("empty", &[]).await.unwrap();
        assert_eq!(store.get("empty").await.unwrap(), Vec::<u8>::new());
        assert_eq!(store.physical_writes(), 1);
    }

    #[tokio::test]
    async fn test_identical_put_skips_second_write() {
        let store = MemoryCertificateStore::new();
        store.put("blog.example", b"cert-v1").await.unwrap();
        store.put("blog.example", b"cert-v1").await.unwrap();

        assert_eq!(store.physical_writes(), 1);
        assert_eq!(store.get("blog.example").await.unwrap(), b"cert-v1");
    }

    #[tokio::test]
    async fn test_changed_put_overwrites() {
        let store = MemoryCertificateStore::new();
        store.put("blog.example", b"cert-v1").await.unwrap();
        store.put("blog.example", b"cert-v2").await.unwrap();

        assert_eq!(store.physical_writes(), 2);
        assert_eq!(store.get("blog.example").await.unwrap(), b"cert-v2");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_delete_makes_get_miss() {
        let store = MemoryCertificateStore::new();
        store.put("blog.example", b"cert").await.unwrap();
        store.delete("blog.example").await.unwrap();

        assert!(store.get("blog.example").await.unwrap_err().is_miss());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_absent_record_succeeds() {
        let store = MemoryCertificateStore::new();
        store.delete("never-stored").await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_puts_on_different_names() {
        let store = Arc::new(MemoryCertificateStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let name = format!("host{i}.example");
                store.put(&name, name.as_bytes()).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len().await, 16);
        assert_eq!(store.physical_writes(), 16);
        assert_eq!(store.get("host7.example").await.unwrap(), b"host7.example");
    }
}
