//! bucket-front: an HTTPS front end for an HTTP-only bucket origin.
//!
//! Certificates for a fixed set of hostnames are obtained over ACME HTTP-01 and
//! persisted in a [`store::CertificateStore`]. Requests on the TLS listener are
//! proxied to the origin, with origin redirects rewritten to the client-visible
//! host.

pub mod app;
pub mod config;
pub mod error;
pub mod http;
pub mod identity;
pub mod middleware;
pub mod proxy;
pub mod state;
pub mod store;

pub use app::{run, Command};
pub use error::{ProxyError, StartupError};
