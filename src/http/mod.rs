//! HTTP and HTTPS listeners.
//!
//! - **Plaintext**: ACME HTTP-01 challenge passthrough wrapping a 301 redirect
//! - **TLS**: ACME-managed certificates for allowed hosts, reverse proxy to the origin
//!
//! Graceful shutdown on SIGTERM/SIGINT drains both listeners.

pub mod redirect;
mod server;
mod shutdown;
pub mod tls;

pub use server::{run_listeners, serve_plaintext, start_server, ServerError};
pub use tls::{AllowListResolver, HostAllowList};
