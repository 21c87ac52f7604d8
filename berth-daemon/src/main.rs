//! Berth Daemon
//!
//! A single-host job orchestrator. Clients submit container specs over HTTP;
//! the daemon queues them, hands them to a pool of polling workers bounded by
//! a GPU pool, and runs recurring jobs from cron workers.
//!
//! Architecture:
//! - Configuration: settings from environment or defaults
//! - Repositories: queue, job and schedule stores (memory or SQLite)
//! - Scheduler: dispatch, execution driver, worker pool and cron workers
//! - Services/API: operations exposed through axum

pub mod api;
pub mod backend;
pub mod config;
pub mod db;
pub mod error;
pub mod gpu;
pub mod observer;
pub mod repository;
pub mod scheduler;
pub mod service;
pub mod workspace;

#[cfg(test)]
pub mod testing;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::backend::{ContainerCliBackend, check_runtime_available};
use crate::config::{Config, StoreBackend};
use crate::observer::{ObserverSet, TracingObserver};
use crate::repository::Stores;
use crate::scheduler::Scheduler;
use crate::service::AppState;

#[derive(Parser)]
#[command(name = "berth-daemon")]
#[command(about = "Local job orchestration daemon", long_about = None)]
struct Cli {
    /// Address to bind
    #[arg(long, env = "BERTH_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind
    #[arg(long, env = "BERTH_PORT", default_value_t = 8080)]
    port: u16,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.debug {
        "berth_daemon=debug,tower_http=debug"
    } else {
        "berth_daemon=info,tower_http=debug"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Berth Daemon");

    // Load configuration
    let config = load_config()?;
    info!(
        "Loaded configuration: workers={}, gpus={:?}, store={:?}",
        config.num_workers, config.gpu_ids, config.store_backend
    );

    let stores = open_stores(&config).await?;

    if let Err(e) = check_runtime_available(&config.container_runtime).await {
        warn!("Container runtime check failed: {:#}", e);
    }

    let backend = Arc::new(ContainerCliBackend::new(config.container_runtime.clone()));
    let observers = ObserverSet::new().with(Arc::new(TracingObserver));
    let num_workers = config.num_workers;

    let scheduler = Scheduler::new(config, stores, backend, observers);
    let (requeued, failed) = scheduler
        .recover_orphans()
        .await
        .context("Failed to recover interrupted jobs")?;
    if requeued + failed > 0 {
        info!("Recovered interrupted jobs: {} requeued, {} failed", requeued, failed);
    }
    let state = AppState::new(scheduler);

    for _ in 0..num_workers {
        state.workers.add().await;
    }
    info!("Started {} worker(s)", num_workers);

    let recovered = state
        .cron
        .recover()
        .await
        .context("Failed to recover scheduled jobs")?;
    info!("Recovered {} scheduled job(s)", recovered);

    // Build router with all API endpoints
    let app = api::create_router(state.clone());

    let addr = format!("{}:{}", cli.host, cli.port);
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down workers");
    state.shutdown().await;

    Ok(())
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(e) => {
            info!("Failed to load config from environment ({}), using defaults", e);
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

/// Opens the stores selected by the configuration
async fn open_stores(config: &Config) -> Result<Stores> {
    match config.store_backend {
        StoreBackend::Memory => Ok(Stores::memory()),
        StoreBackend::Sqlite => {
            info!("Connecting to database...");

            let pool = db::create_pool(&config.database_url)
                .await
                .context("Failed to create database pool")?;

            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;

            Ok(Stores::sqlite(pool))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
