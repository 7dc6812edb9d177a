//! Listener orchestration.
//!
//! Two listeners run for the life of the process:
//! - plaintext (`http_port`): ACME HTTP-01 challenges, otherwise a 301 to HTTPS
//! - TLS (`https_port`): certificates from ACME, every request proxied to the origin
//!
//! Either listener failing ends the process; the other is dropped with it.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::Router;
use axum_server::Handle;
use futures::StreamExt;
use rustls_acme::axum::AxumAcceptor;

use crate::config::AppConfig;
use crate::proxy::{self, ProxyTarget, RedirectSafeTransport, ReqwestTransport};
use crate::state::ProxyState;
use crate::store::CertificateStore;

use super::redirect;
use super::shutdown;
use super::tls::{self, HostAllowList};

/// Server startup error
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid http.host {host:?}: {source}")]
    Address {
        host: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("{listener} listener on {addr} failed: {source}")]
    Listen {
        listener: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build TLS configuration: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Failed to build origin client: {0}")]
    Upstream(#[from] reqwest::Error),
}

/// Start both listeners and run until one fails or a shutdown signal drains them.
pub async fn start_server(
    config: &AppConfig,
    allow: HostAllowList,
    store: Arc<dyn CertificateStore>,
    target: ProxyTarget,
) -> Result<(), ServerError> {
    let ip: IpAddr = config
        .http
        .host
        .parse()
        .map_err(|source| ServerError::Address {
            host: config.http.host.clone(),
            source,
        })?;
    let http_addr = SocketAddr::new(ip, config.http.http_port);
    let https_addr = SocketAddr::new(ip, config.http.https_port);

    let env_name = if config.acme.production {
        "production"
    } else {
        "staging"
    };
    tracing::info!(
        %http_addr,
        %https_addr,
        domains = ?allow.hosts(),
        contact = config.acme.contact.as_deref().unwrap_or("-"),
        environment = %env_name,
        "Starting HTTPS front end (ACME)"
    );

    if !config.acme.production {
        tracing::warn!(
            "Using Let's Encrypt staging environment - certificates will NOT be trusted by browsers. \
             Set acme.production = true for production use."
        );
    }

    let mut acme_state = tls::acme_config(&config.acme, &allow, store).state();
    let challenge = acme_state.http01_challenge_tower_service();
    let rustls_config = tls::server_config(allow, acme_state.resolver())?;
    let acceptor = acme_state.axum_acceptor(rustls_config);

    // Drives issuance and renewal; certificates land in the store via the cache.
    tokio::spawn(async move {
        loop {
            match acme_state.next().await {
                Some(Ok(event)) => {
                    tracing::info!(event = ?event, "ACME event");
                }
                Some(Err(err)) => {
                    tracing::error!(error = %err, "ACME error");
                }
                None => {
                    tracing::debug!("ACME state stream ended");
                    break;
                }
            }
        }
    });

    let handle = Handle::new();
    shutdown::setup_shutdown_handler(handle.clone());

    let transport = RedirectSafeTransport::new(ReqwestTransport::new(&config.upstream)?);
    let proxy_app = proxy::router(ProxyState::new(target, transport));
    let redirect_app = redirect::plaintext_router(challenge, https_addr.port());

    run_listeners(
        serve_plaintext(http_addr, redirect_app, handle.clone()),
        serve_tls(https_addr, proxy_app, acceptor, handle),
    )
    .await
}

/// Serve the plaintext router until shutdown.
pub async fn serve_plaintext(
    addr: SocketAddr,
    app: Router,
    handle: Handle,
) -> Result<(), ServerError> {
    tracing::info!(%addr, "Starting HTTP listener (challenges and redirect)");

    axum_server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service())
        .await
        .map_err(|source| ServerError::Listen {
            listener: "http",
            addr,
            source,
        })
}

async fn serve_tls(
    addr: SocketAddr,
    app: Router,
    acceptor: AxumAcceptor,
    handle: Handle,
) -> Result<(), ServerError> {
    tracing::info!(%addr, "Starting HTTPS listener (proxy)");

    axum_server::bind(addr)
        .handle(handle)
        .acceptor(acceptor)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|source| ServerError::Listen {
            listener: "https",
            addr,
            source,
        })
}

/// Run both listener futures; the first error wins and drops the other.
pub async fn run_listeners<P, T>(plaintext: P, tls: T) -> Result<(), ServerError>
where
    P: Future<Output = Result<(), ServerError>>,
    T: Future<Output = Result<(), ServerError>>,
{
    tokio::try_join!(plaintext, tls)?;
    Ok(())
}
