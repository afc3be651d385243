mod api;
mod config;
mod error;
mod models;
mod storage;
mod utils;
mod verifier;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use config::Config;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use storage::JsonFileStorage;
use tokio::task;
use tracing::info;
use verifier::VerificationStore;

/// Serial number verification service
#[derive(Debug, Parser)]
#[command(name = "serial-verifier", version, about)]
struct Cli {
    /// Optional TOML config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address the HTTP API binds to
    #[arg(long, env = "SERIAL_VERIFIER_LISTEN")]
    listen: Option<String>,

    /// Snapshot file holding scan state between restarts
    #[arg(long, env = "SERIAL_VERIFIER_DATA_FILE")]
    data_file: Option<PathBuf>,

    /// Number of serials in the canonical pool
    #[arg(long, env = "SERIAL_VERIFIER_POOL_SIZE")]
    pool_size: Option<u32>,

    /// Zero-padded width of each serial
    #[arg(long, env = "SERIAL_VERIFIER_SERIAL_WIDTH")]
    serial_width: Option<usize>,
}

impl Cli {
    fn resolve(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load_from_file(path)?,
            None => Config::default(),
        };
        if let Some(listen) = self.listen {
            config.listen_address = listen;
        }
        if let Some(data_file) = self.data_file {
            config.data_file = data_file;
        }
        if let Some(size) = self.pool_size {
            config.pool.size = size;
        }
        if let Some(width) = self.serial_width {
            config.pool.width = width;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().resolve()?;
    let addr: SocketAddr = config
        .listen_address
        .parse()
        .map_err(|e| anyhow!("Invalid listen address '{}': {}", config.listen_address, e))?;

    let storage = JsonFileStorage::new(&config.data_file);
    info!(
        data_file = %storage.path().display(),
        pool_size = config.pool.size,
        serial_width = config.pool.width,
        "starting serial verifier"
    );
    let pool = config.pool;
    let store = task::spawn_blocking(move || VerificationStore::open(pool, Box::new(storage)))
        .await
        .context("loading verification store")?;

    api::serve(addr, Arc::new(RwLock::new(store)), shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
