//! bucket-front: HTTPS with automatic certificates in front of a bucket origin.
//!
//! This is the application entry point. It parses arguments, resolves the
//! configuration, initializes tracing, and hands off to [`bucket_front::run`].

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bucket_front::config::{AppConfig, Overrides, DEFAULT_LOG_FILTER};
use bucket_front::Command;

/// bucket-front: HTTPS front end for an HTTP-only bucket origin
#[derive(Parser, Debug)]
#[command(name = "bucket-front", version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "BUCKET_FRONT_CONFIG")]
    config: Option<PathBuf>,

    /// Project identity partitioning the certificate store
    #[arg(long, env = "BUCKET_FRONT_PROJECT")]
    project: Option<String>,

    /// Comma-separated hostnames allowed to receive certificates
    #[arg(long, env = "BUCKET_FRONT_HOSTNAMES", value_delimiter = ',')]
    hostnames: Option<Vec<String>>,

    /// Origin bucket, e.g. gs://www.example.com
    #[arg(long, env = "BUCKET_FRONT_BUCKET")]
    bucket: Option<String>,

    /// Log level filter (e.g., "bucket_front=debug,rustls_acme=info")
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum CliCommand {
    /// Run the HTTP and HTTPS listeners (default)
    Serve,
    /// Delete the cached certificate for the configured hostnames
    Evict,
}

impl From<CliCommand> for Command {
    fn from(command: CliCommand) -> Self {
        match command {
            CliCommand::Serve => Command::Serve,
            CliCommand::Evict => Command::Evict,
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let overrides = Overrides {
        project: args.project,
        hostnames: args.hostnames,
        bucket: args.bucket,
    };
    let config = AppConfig::resolve(args.config.as_deref(), overrides);

    let json = config.as_ref().is_ok_and(|c| c.logging.is_json());
    init_tracing(args.log_level, json);

    // Both rustls-acme and the listener build TLS configs through the process default.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let command = args.command.map(Command::from).unwrap_or(Command::Serve);
    let result = match config {
        Ok(config) => {
            tracing::info!(
                hostnames = ?config.hostnames,
                command = ?command,
                "Loaded configuration"
            );
            bucket_front::run(command, config).await
        }
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "Fatal error");
        std::process::exit(1);
    }
}

/// Initialize tracing with priority: CLI > env > default
fn init_tracing(log_level: Option<String>, json: bool) {
    let log_filter = log_level
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    let registry =
        tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(&log_filter));

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
