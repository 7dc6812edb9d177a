//! TLS admission control and ACME wiring.
//!
//! Certificates are only served, and therefore only ever requested, for the
//! configured hostnames. A handshake naming any other host (or none at all) is
//! refused before the ACME resolver sees it.

use std::sync::Arc;

use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use rustls_acme::{AcmeConfig, UseChallenge};

use crate::config::{AcmeSettings, ConfigError};
use crate::store::{AcmeStoreCache, CertificateStore, StoreError};

/// Hostnames this server is willing to terminate TLS for.
///
/// Matching ignores ASCII case and a trailing dot. Order of first appearance
/// is kept because the ACME engine keys its cached certificate on the list.
#[derive(Debug, Clone)]
pub struct HostAllowList {
    hosts: Arc<Vec<String>>,
}

impl HostAllowList {
    pub fn new<I, S>(hosts: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for host in hosts {
            let host = normalize(host.as_ref());
            if !host.is_empty() && !normalized.contains(&host) {
                normalized.push(host);
            }
        }

        if normalized.is_empty() {
            return Err(ConfigError::Validation(
                "At least one hostname must be allowed".to_string(),
            ));
        }

        Ok(Self {
            hosts: Arc::new(normalized),
        })
    }

    pub fn permits(&self, host: &str) -> bool {
        let host = normalize(host);
        self.hosts.iter().any(|allowed| *allowed == host)
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }
}

fn normalize(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Certificate resolver that consults the allow-list before delegating.
#[derive(Debug)]
pub struct AllowListResolver {
    allow: HostAllowList,
    inner: Arc<dyn ResolvesServerCert>,
}

impl AllowListResolver {
    pub fn new(allow: HostAllowList, inner: Arc<dyn ResolvesServerCert>) -> Self {
        Self { allow, inner }
    }

    /// Whether a handshake carrying `server_name` may proceed.
    pub fn admits(&self, server_name: Option<&str>) -> bool {
        server_name.is_some_and(|name| self.allow.permits(name))
    }
}

impl ResolvesServerCert for AllowListResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let server_name = client_hello.server_name();
        if !self.admits(server_name) {
            tracing::warn!(
                server_name = server_name.unwrap_or("-"),
                "Rejected TLS handshake for host not in allow-list"
            );
            return None;
        }
        self.inner.resolve(client_hello)
    }
}

/// ACME configuration for the allowed hosts, persisted through `store`.
pub fn acme_config(
    settings: &AcmeSettings,
    allow: &HostAllowList,
    store: Arc<dyn CertificateStore>,
) -> AcmeConfig<StoreError, StoreError> {
    AcmeConfig::new(allow.hosts().to_vec())
        .contact(settings.contact_list())
        .cache(AcmeStoreCache::new(store))
        .directory_lets_encrypt(settings.production)
        .challenge_type(UseChallenge::Http01)
}

/// Server configuration that resolves certificates through the allow-list.
pub fn server_config(
    allow: HostAllowList,
    inner: Arc<dyn ResolvesServerCert>,
) -> Result<Arc<ServerConfig>, rustls::Error> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(AllowListResolver::new(allow, inner)));
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}
