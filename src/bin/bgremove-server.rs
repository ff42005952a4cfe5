//! Background removal HTTP server
//!
//! Reads configuration from the environment (after loading `.env`), applies
//! command-line overrides and serves the API until SIGINT or SIGTERM, then
//! drains in-flight jobs before exiting.

use anyhow::{Context, Result};
use bgremove_service::tracing_config::{TracingConfig, TracingFormat};
use bgremove_service::{api, metadata, RemovalService, ServiceConfig};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

/// Background removal HTTP server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "bgremove-server")]
struct Cli {
    /// Bind address (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Maximum concurrent engine calls (overrides MAX_WORKERS)
    #[arg(long)]
    workers: Option<usize>,

    /// Scratch directory (overrides TEMP_DIR)
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log format: console, compact or json (json needs the tracing-json feature)
    #[arg(long, default_value = "console", env = "LOG_FORMAT")]
    log_format: String,

    /// Also write logs to this file (daily rotation)
    #[cfg(feature = "tracing-files")]
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Load environment variables from this file instead of ./.env
    #[arg(long)]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("Failed to load env file {}", path.display()))?;
        },
        None => {
            dotenvy::dotenv().ok();
        },
    }

    let format: TracingFormat = cli.log_format.parse()?;
    #[allow(unused_mut)]
    let mut log_config = TracingConfig::new()
        .with_verbosity(cli.verbose)
        .with_format(format);
    #[cfg(feature = "tracing-files")]
    if let Some(path) = &cli.log_file {
        log_config = log_config.with_output(bgremove_service::tracing_config::TracingOutput::Both(
            path.clone(),
        ));
    }
    let _tracing_guard = log_config.init()?;

    let mut config = ServiceConfig::from_env().context("Invalid service configuration")?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(workers) = cli.workers {
        config.override_max_workers(workers, |key| std::env::var(key).ok());
    }
    if let Some(temp_dir) = cli.temp_dir {
        config.temp_dir = temp_dir;
    }
    config.validate().context("Invalid service configuration")?;

    let host = config.host.clone();
    let port = config.port;

    let store = metadata::store_from_config(&config)
        .await
        .context("Failed to open metadata store")?;
    let service = Arc::new(
        RemovalService::builder(config)
            .metadata_store(store)
            .build()
            .context("Failed to start removal service")?,
    );
    let app = api::router(api::AppState::new(Arc::clone(&service)));

    let listener = tokio::net::TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", host, port))?;
    tracing::info!(addr = %listener.local_addr()?, "Starting server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped accepting connections, draining jobs");
    service.shutdown().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
