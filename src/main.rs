//! Rabbitpool - demo entry point
//!
//! Loads a connection table, opens the consumer and publisher connections for
//! one name and keeps the consumer running until Ctrl+C.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use rabbitpool::{Config, ConnectionManager, VERSION};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let config_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("rabbitpool.toml"));
    let name = args.next().unwrap_or_else(|| "default".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    rabbitpool::util::init_tracing(&config.logging)?;

    info!(version = VERSION, config_path = ?config_path, "Starting rabbitpool");

    if config.metrics.enabled {
        rabbitpool::metrics::init_metrics(&config.metrics)?;
        info!(bind_addr = %config.metrics.bind_addr, "Metrics endpoint started");
    }

    let manager = Arc::new(ConnectionManager::lapin(config.rabbitmq));

    let Some(consumer) = manager.get_consumer(&name)? else {
        warn!(conn_name = %name, "No configuration for connection");
        return Ok(());
    };
    let publisher = manager
        .get_publisher(&name)?
        .context("publisher lookup failed after consumer succeeded")?;

    info!(consumer = %consumer.id(), publisher = %publisher.id(), "Connections created");
    info!(
        connections = %serde_json::to_string(&manager.list_connections())?,
        "Registered connections"
    );

    consumer.start().await;

    manager.drain(DRAIN_TIMEOUT).await;
    info!("Stopped");
    Ok(())
}
