//! hfx-importer - bulk health data import service
//!
//! Pulls health metrics and workouts from a device over its JSON-RPC
//! service, chunk by chunk, and forwards each chunk to the ingestion
//! endpoint. One import runs at a time; progress is streamed over SSE.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hfx_importer::config::{CliOverrides, ServiceConfig};
use hfx_importer::services::{DiscardingSink, HttpIngestionSink, ImportManager, IngestionSink};
use hfx_importer::AppState;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for hfx-importer
#[derive(Parser, Debug)]
#[command(name = "hfx-importer")]
#[command(about = "Bulk health data importer for HFX")]
#[command(version)]
struct Args {
    /// TOML config file
    #[arg(short, long, env = "HFX_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "HFX_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "HFX_PORT")]
    port: Option<u16>,

    /// SQLite database holding the import audit log
    #[arg(short, long, env = "HFX_DATABASE")]
    database: Option<PathBuf>,

    /// Default log filter (RUST_LOG takes precedence)
    #[arg(long, env = "HFX_LOG_LEVEL")]
    log_level: Option<String>,

    /// Push-ingestion endpoint receiving fetched chunks
    #[arg(long, env = "HFX_INGEST_URL")]
    ingest_url: Option<String>,
}

impl From<Args> for CliOverrides {
    fn from(args: Args) -> Self {
        Self {
            config: args.config,
            host: args.host,
            port: args.port,
            database: args.database,
            log_level: args.log_level,
            ingest_url: args.ingest_url,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ServiceConfig::resolve(args.into()).context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting hfx-importer");
    info!(
        "Version: {} ({} {}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_PROFILE"),
        env!("BUILD_TIMESTAMP")
    );
    info!("Configuration: {}", config.source);

    // Step 1: Open or create the audit database
    info!("Database: {}", config.database_path().display());
    let db_pool = hfx_importer::db::init_database_pool(config.database_path())
        .await
        .context("Failed to open database")?;

    // Step 2: Close runs a previous process left open
    hfx_importer::db::import_runs::reconcile_stale_runs(&db_pool)
        .await
        .context("Failed to reconcile interrupted import runs")?;

    // Step 3: Ingestion sink
    let settings = config.import_settings();
    let sink: Arc<dyn IngestionSink> = match &config.import.ingest_url {
        Some(url) => {
            info!("Ingestion endpoint: {}", url);
            Arc::new(
                HttpIngestionSink::new(url.clone(), settings.request_timeout)
                    .context("Failed to build ingestion client")?,
            )
        }
        None => {
            warn!("No ingestion endpoint configured; fetched data will be discarded");
            Arc::new(DiscardingSink)
        }
    };

    // Step 4: Import manager and router
    let grace = settings.conflict_grace;
    let imports = Arc::new(ImportManager::new(db_pool.clone(), sink, settings));
    let state = AppState::new(db_pool, Arc::clone(&imports));
    let shutdown = state.shutdown.clone();
    let app = hfx_importer::build_router(state);

    // Step 5: Serve until Ctrl-C / SIGTERM
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.listen_addr))?;
    info!("Listening on http://{}", config.listen_addr);
    info!("Health check: http://{}/health", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
            imports.shutdown(grace).await;
        })
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
