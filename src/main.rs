mod auth;
mod config;
mod controller;
mod error;
mod logging;
mod model;
mod relay;
mod server;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use auth::SpotifyConnector;
use config::{Args, Config};
use controller::Bridge;
use relay::Relay;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_args(Args::parse())?;

    if let Err(e) = logging::init_logging(&config.log_dir()) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %config.data_dir.display(),
        "=== Spotify Bridge Starting ==="
    );

    let listener = server::bind(&config.host, config.port).await?;

    let connector = SpotifyConnector::new(&config);
    let bridge = Bridge::new(config, Relay::new(), Arc::new(connector));
    let shutdown = bridge.shutdown_token();

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted");
            ctrl_c.cancel();
        }
    });

    server::serve(listener, bridge.clone(), shutdown).await;

    let _ = bridge.quit().await;
    tracing::info!("Spotify Bridge shutting down");
    Ok(())
}
