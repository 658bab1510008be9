//! mutr-node - Lineage node service
//!
//! Accepts content nodes over HTTP, classifies each through the remote
//! engine strictly after its parent, and streams results to subscribers.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use mutr_common::config::{
    load_toml_config, resolve_root_folder, write_toml_config, ConfigSource,
};
use mutr_common::events::EventBus;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mutr_node::config::{NodeServiceConfig, CONFIG_FILE_NAME, DATABASE_FILE_NAME, ROOT_FOLDER_ENV};
use mutr_node::services::{EventBusSink, HttpClassificationEngine};
use mutr_node::{build_router, start_analysis_pipeline, AppState};

/// Event bus buffer
const EVENT_BUS_CAPACITY: usize = 256;
/// How long shutdown waits for in-progress analyses
const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Command-line arguments for mutr-node
#[derive(Parser, Debug)]
#[command(name = "mutr-node")]
#[command(about = "Lineage node service with ordered AI analysis")]
#[command(version)]
struct Args {
    /// TOML config file (default: platform config dir)
    #[arg(short, long, env = "MUTR_NODE_CONFIG")]
    config: Option<PathBuf>,

    /// Data folder holding the database
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Address to bind
    #[arg(long, env = "MUTR_NODE_BIND")]
    bind: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "MUTR_NODE_PORT")]
    port: Option<u16>,

    /// Classification engine base URL
    #[arg(long, env = "MUTR_ENGINE_URL")]
    engine_url: Option<String>,

    /// Analysis worker count
    #[arg(long, env = "MUTR_NODE_WORKERS")]
    workers: Option<usize>,

    /// Skip startup recovery of unfinished analyses
    #[arg(long)]
    no_recovery: bool,

    /// Log filter (overridden by RUST_LOG)
    #[arg(long, env = "MUTR_LOG_LEVEL")]
    log_level: Option<String>,

    /// Write the effective configuration to this TOML file and exit
    #[arg(long, value_name = "PATH")]
    write_config: Option<PathBuf>,
}

impl Args {
    fn apply_to(&self, config: &mut NodeServiceConfig) {
        if let Some(bind) = &self.bind {
            config.server.bind_address = bind.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(url) = &self.engine_url {
            config.engine.base_url = url.clone();
        }
        if let Some(workers) = self.workers {
            config.analysis.worker_count = workers;
        }
        if self.no_recovery {
            config.recovery.enabled = false;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config is loaded before tracing so the configured level applies
    let config_source = ConfigSource::locate(args.config.as_deref(), CONFIG_FILE_NAME);
    let mut config: NodeServiceConfig = match config_source.file() {
        Some(path) => load_toml_config(path).context("Failed to load configuration")?,
        None => NodeServiceConfig::default(),
    };
    args.apply_to(&mut config);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate().context("Invalid configuration")?;

    if let Some(path) = &args.write_config {
        write_toml_config(&config, path).context("Failed to write configuration")?;
        info!("Wrote configuration to {}", path.display());
        return Ok(());
    }

    info!("Starting mutr-node (lineage node service)");
    info!(
        "Version: {} (git {}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("MUTR_GIT_HASH"),
        env!("MUTR_BUILD_TIMESTAMP")
    );
    config_source.log(CONFIG_FILE_NAME);

    let root_folder = resolve_root_folder(
        args.root_folder.as_deref(),
        ROOT_FOLDER_ENV,
        config.root_folder.as_deref(),
    );
    let db_path = root_folder.join(DATABASE_FILE_NAME);
    info!("Database: {}", db_path.display());

    let db_pool = mutr_node::db::init_database_pool(&db_path)
        .await
        .context("Failed to open database")?;
    info!("Database connection established");

    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
    info!("Event bus capacity: {}", event_bus.capacity());

    let engine = Arc::new(
        HttpClassificationEngine::new(
            &config.engine.base_url,
            Duration::from_millis(config.engine.timeout_ms),
        )
        .context("Failed to build classification engine client")?,
    );
    info!("Classification engine: {}", engine.base_url());

    let cancel = CancellationToken::new();
    let pipeline = start_analysis_pipeline(
        db_pool.clone(),
        event_bus.clone(),
        engine.clone(),
        Arc::new(EventBusSink::new(event_bus.clone())),
        &config,
        cancel.clone(),
    );

    let janitor = {
        let coordinator = pipeline.coordinator.clone();
        let interval = Duration::from_secs(config.analysis.purge_interval_secs.max(1));
        let cancel = cancel.clone();
        tokio::spawn(async move { coordinator.run_janitor(interval, cancel).await })
    };

    let state = AppState::new(
        db_pool.clone(),
        event_bus,
        &pipeline,
        engine.base_url().to_string(),
    );
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.bind_address, config.server.port)
        .parse()
        .context("Invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    // Recovery runs once the listener is up
    if config.recovery.enabled {
        let recovery = pipeline.recovery.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            recovery.run(cancel).await;
        });
    } else {
        info!("Startup recovery disabled");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Stopping analysis workers");
    cancel.cancel();
    let drain = futures::future::join_all(pipeline.worker_handles);
    if tokio::time::timeout(WORKER_DRAIN_TIMEOUT, drain).await.is_err() {
        warn!("Analysis workers still busy at shutdown, unfinished nodes resume on next start");
    }
    janitor.abort();

    db_pool.close().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
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
            Ok(mut stream) => {
                stream.recv().await;
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
