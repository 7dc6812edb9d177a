//! Configuration loading and constants.
//!
//! Configuration is layered once at startup: an optional TOML file, then
//! command-line / environment overrides, then validation. The resulting
//! [`AppConfig`] is immutable and handed to every component that needs it.

use std::path::Path;

use const_format::formatcp;
use serde::Deserialize;

// =============================================================================
// Listeners
// =============================================================================

/// Default bind address for both listeners
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Plaintext listener port (redirects and HTTP-01 challenges)
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// TLS listener port (proxied content)
pub const DEFAULT_HTTPS_PORT: u16 = 443;

// =============================================================================
// ACME
// =============================================================================

/// Path prefix the ACME authority probes during HTTP-01 validation
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge";

/// Router pattern for HTTP-01 challenge tokens
pub const ACME_CHALLENGE_ROUTE: &str = formatcp!("{}/{{token}}", ACME_CHALLENGE_PREFIX);

// =============================================================================
// Upstream origin
// =============================================================================

/// Connect timeout for origin requests, in seconds
pub const DEFAULT_UPSTREAM_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Whole-request timeout for origin requests (headers and body), in seconds
pub const DEFAULT_UPSTREAM_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Sideband header carrying the client-visible host from director to transport
pub const ORIGINAL_HOST_HEADER: &str = "x-original-host";

// =============================================================================
// Identity and storage
// =============================================================================

/// Metadata endpoint returning the project id of the running instance
pub const DEFAULT_METADATA_PROJECT_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/project/project-id";

/// Default SQLite database for cached certificates
pub const DEFAULT_DATABASE_URL: &str = "sqlite://certificates.db";

// =============================================================================
// Logging
// =============================================================================

/// Default log filter when neither --log-level nor RUST_LOG is set
pub const DEFAULT_LOG_FILTER: &str = "bucket_front=info,rustls_acme=info";

/// Default log format (text or json)
pub const DEFAULT_LOG_FORMAT: &str = "text";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Project identity that partitions the certificate store.
    /// Resolved from the metadata server when absent.
    pub project: Option<String>,
    /// Hostnames allowed to receive certificates
    #[serde(default)]
    pub hostnames: Vec<String>,
    /// Origin bucket identifier, e.g. `gs://www.example.com`
    #[serde(default)]
    pub bucket: String,
    /// Metadata endpoint used to resolve `project`
    #[serde(default = "AppConfig::default_metadata_url")]
    pub metadata_url: String,
    #[serde(default)]
    pub http: HttpServerConfig,
    #[serde(default)]
    pub acme: AcmeSettings,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default = "HttpServerConfig::default_host")]
    pub host: String,
    #[serde(default = "HttpServerConfig::default_http_port")]
    pub http_port: u16,
    #[serde(default = "HttpServerConfig::default_https_port")]
    pub https_port: u16,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            http_port: Self::default_http_port(),
            https_port: Self::default_https_port(),
        }
    }
}

impl HttpServerConfig {
    fn default_host() -> String {
        DEFAULT_BIND_HOST.to_string()
    }

    fn default_http_port() -> u16 {
        DEFAULT_HTTP_PORT
    }

    fn default_https_port() -> u16 {
        DEFAULT_HTTPS_PORT
    }
}

/// ACME account settings
#[derive(Debug, Clone, Deserialize)]
pub struct AcmeSettings {
    /// Contact email registered with the ACME account
    pub contact: Option<String>,
    /// Use the Let's Encrypt production directory (staging otherwise)
    #[serde(default = "AcmeSettings::default_production")]
    pub production: bool,
}

impl Default for AcmeSettings {
    fn default() -> Self {
        Self {
            contact: None,
            production: Self::default_production(),
        }
    }
}

impl AcmeSettings {
    fn default_production() -> bool {
        true
    }

    /// ACME directory URL selected by `production`.
    pub fn directory_url(&self) -> &'static str {
        if self.production {
            rustls_acme::acme::LETS_ENCRYPT_PRODUCTION_DIRECTORY
        } else {
            rustls_acme::acme::LETS_ENCRYPT_STAGING_DIRECTORY
        }
    }

    /// Contact list in the form the ACME account expects.
    pub fn contact_list(&self) -> Vec<String> {
        self.contact
            .iter()
            .map(|email| format!("mailto:{}", email))
            .collect()
    }
}

/// Certificate store backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "StoreConfig::default_database_url")]
    pub database_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            database_url: Self::default_database_url(),
        }
    }
}

impl StoreConfig {
    fn default_database_url() -> String {
        DEFAULT_DATABASE_URL.to_string()
    }
}

/// Origin client timeouts
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "UpstreamConfig::default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "UpstreamConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: Self::default_connect_timeout(),
            request_timeout_seconds: Self::default_request_timeout(),
        }
    }
}

impl UpstreamConfig {
    fn default_connect_timeout() -> u64 {
        DEFAULT_UPSTREAM_CONNECT_TIMEOUT_SECS
    }

    fn default_request_timeout() -> u64 {
        DEFAULT_UPSTREAM_REQUEST_TIMEOUT_SECS
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "text" (human-readable, default) or "json" (structured)
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_LOG_FORMAT.to_string(),
        }
    }
}

impl LoggingConfig {
    fn default_format() -> String {
        DEFAULT_LOG_FORMAT.to_string()
    }

    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

/// Values supplied on the command line or through the environment.
/// Each `Some` replaces the corresponding file value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub project: Option<String>,
    pub hostnames: Option<Vec<String>>,
    pub bucket: Option<String>,
}

impl AppConfig {
    fn default_metadata_url() -> String {
        DEFAULT_METADATA_PROJECT_URL.to_string()
    }

    /// Parse a TOML configuration file without validating it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Build the effective configuration: file (if any), then overrides, then validation.
    pub fn resolve(file: Option<&Path>, overrides: Overrides) -> Result<Self, ConfigError> {
        let mut config = match file {
            Some(path) => Self::load(path)?,
            None => Self {
                metadata_url: Self::default_metadata_url(),
                ..Self::default()
            },
        };

        if let Some(project) = overrides.project {
            config.project = Some(project);
        }
        if let Some(hostnames) = overrides.hostnames {
            config.hostnames = hostnames;
        }
        if let Some(bucket) = overrides.bucket {
            config.bucket = bucket;
        }

        config.normalize();
        config.validate()?;
        Ok(config)
    }

    fn normalize(&mut self) {
        self.hostnames = self
            .hostnames
            .iter()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .collect();
        self.bucket = self.bucket.trim().to_string();
        self.project = self
            .project
            .take()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.hostnames.is_empty() {
            return Err(ConfigError::Validation(
                "No hostnames configured. Set `hostnames` or pass --hostnames".to_string(),
            ));
        }
        if self.bucket.is_empty() {
            return Err(ConfigError::Validation(
                "No origin bucket configured. Set `bucket` or pass --bucket".to_string(),
            ));
        }
        if self.http.http_port == self.http.https_port {
            return Err(ConfigError::Validation(format!(
                "http_port and https_port must differ (both are {})",
                self.http.http_port
            )));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Configuration error: {0}")]
    Validation(String),
    #[error("Failed to resolve project identity: {0}")]
    Identity(String),
}
