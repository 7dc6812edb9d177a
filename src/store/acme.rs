//! Bridges [`CertificateStore`] into the cache traits used by `rustls-acme`.
//!
//! The ACME engine addresses certificates by their domain list and accounts by
//! their contact list, both scoped to a directory URL. These are flattened into
//! record names that stay readable in the database while keeping staging and
//! production material apart.

use std::sync::Arc;

use async_trait::async_trait;
use rustls_acme::{AccountCache, CertCache};
use sha2::{Digest, Sha256};

use super::{CertificateStore, StoreError};

/// Hex digits of the digest kept in record names.
const TAG_LEN: usize = 16;

/// Prefix of ACME account key records.
pub const ACCOUNT_RECORD_PREFIX: &str = "acme_account";

fn tag(parts: &[String], directory_url: &str) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(directory_url.as_bytes());
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(TAG_LEN);
    hex
}

/// Record name for the certificate covering `domains` issued by `directory_url`.
pub fn certificate_record_name(domains: &[String], directory_url: &str) -> String {
    format!("{}+{}", domains.join(","), tag(domains, directory_url))
}

/// Record name for the ACME account registered with `contact` at `directory_url`.
pub fn account_record_name(contact: &[String], directory_url: &str) -> String {
    format!("{}+{}", ACCOUNT_RECORD_PREFIX, tag(contact, directory_url))
}

/// `rustls-acme` cache backed by a [`CertificateStore`].
#[derive(Clone)]
pub struct AcmeStoreCache {
    store: Arc<dyn CertificateStore>,
}

impl AcmeStoreCache {
    pub fn new(store: Arc<dyn CertificateStore>) -> Self {
        Self { store }
    }

    async fn load(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self.store.get(name).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.is_miss() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl CertCache for AcmeStoreCache {
    type EC = StoreError;

    async fn load_cert(
        &self,
        domains: &[String],
        directory_url: &str,
    ) -> Result<Option<Vec<u8>>, Self::EC> {
        self.load(&certificate_record_name(domains, directory_url))
            .await
    }

    async fn store_cert(
        &self,
        domains: &[String],
        directory_url: &str,
        cert: &[u8],
    ) -> Result<(), Self::EC> {
        let name = certificate_record_name(domains, directory_url);
        tracing::info!(name = %name, "Caching issued certificate");
        self.store.put(&name, cert).await
    }
}

#[async_trait]
impl AccountCache for AcmeStoreCache {
    type EA = StoreError;

    async fn load_account(
        &self,
        contact: &[String],
        directory_url: &str,
    ) -> Result<Option<Vec<u8>>, Self::EA> {
        self.load(&account_record_name(contact, directory_url))
            .await
    }

    async fn store_account(
        &self,
        contact: &[String],
        directory_url: &str,
        account: &[u8],
    ) -> Result<(), Self::EA> {
        self.store
            .put(&account_record_name(contact, directory_url), account)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCertificateStore;

    const STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";
    const PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

    fn domains() -> Vec<String> {
        vec!["blog.example".to_string(), "www.blog.example".to_string()]
    }

    #[test]
    fn test_certificate_name_is_readable_and_stable() {
        let name = certificate_record_name(&domains(), PRODUCTION);
        assert!(name.starts_with("blog.example,www.blog.example+"));
        assert_eq!(name.len(), "blog.example,www.blog.example+".len() + TAG_LEN);
        assert_eq!(name, certificate_record_name(&domains(), PRODUCTION));
    }

    #[test]
    fn test_directories_do_not_share_records() {
        assert_ne!(
            certificate_record_name(&domains(), STAGING),
            certificate_record_name(&domains(), PRODUCTION)
        );
        let contact = vec!["mailto:admin@blog.example".to_string()];
        assert_ne!(
            account_record_name(&contact, STAGING),
            account_record_name(&contact, PRODUCTION)
        );
    }

    #[test]
    fn test_domain_boundaries_are_hashed() {
        // Same concatenation, different domain lists
        let a = vec!["ab".to_string(), "c".to_string()];
        let b = vec!["a".to_string(), "bc".to_string()];
        assert_ne!(tag(&a, PRODUCTION), tag(&b, PRODUCTION));
    }

    #[tokio::test]
    async fn test_load_cert_miss_is_none() {
        let cache = AcmeStoreCache::new(Arc::new(MemoryCertificateStore::new()));
        let loaded = cache.load_cert(&domains(), PRODUCTION).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_store_cert_lands_in_backing_store() {
        let store = Arc::new(MemoryCertificateStore::new());
        let cache = AcmeStoreCache::new(store.clone());

        cache
            .store_cert(&domains(), PRODUCTION, b"pem-chain")
            .await
            .unwrap();

        let name = certificate_record_name(&domains(), PRODUCTION);
        assert_eq!(store.get(&name).await.unwrap(), b"pem-chain");
        assert_eq!(
            cache.load_cert(&domains(), PRODUCTION).await.unwrap(),
            Some(b"pem-chain".to_vec())
        );
    }

    #[tokio::test]
    async fn test_account_round_trip() {
        let cache = AcmeStoreCache::new(Arc::new(MemoryCertificateStore::new()));
        let contact: Vec<String> = Vec::new();

        assert!(cache
            .load_account(&contact, STAGING)
            .await
            .unwrap()
            .is_none());
        cache
            .store_account(&contact, STAGING, b"account-key")
            .await
            .unwrap();
        assert_eq!(
            cache.load_account(&contact, STAGING).await.unwrap(),
            Some(b"account-key".to_vec())
        );
    }
}
