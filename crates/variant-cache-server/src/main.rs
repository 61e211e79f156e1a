//! Variant cache server
//!
//! Owns the single cache engine of the process and serves it over HTTP.

mod error;
mod server;
mod types;

use crate::error::Result;
use crate::server::{start_server, ServerState, SharedState};
use crate::types::ServerConfig;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};
use variant_cache::CacheEngine;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("variant_cache=info".parse()?)
        .add_directive("variant_cache_server=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting variant cache server...");

    let config = ServerConfig::from_env()?;
    info!("Port: {}", config.port);
    info!("Cache dir: {:?}", config.cache.cache_dir);
    info!(
        "Cache capacity: {} MB",
        config.cache.capacity_bytes / (1024 * 1024)
    );
    info!("Journal: {}", config.cache.journal.name());

    let engine = CacheEngine::open(config.cache).await?;
    if let Err(e) = engine.init().await {
        warn!(error = %e, "Serving with an empty cache");
    }

    let state: SharedState = Arc::new(ServerState::new(engine));

    let served = start_server(state.clone(), config.port, shutdown_signal()).await;

    // Let queued writes and cleanups reach the disk before exiting.
    state.engine.shutdown().await;

    served?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
