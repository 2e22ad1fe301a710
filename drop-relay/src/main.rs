//! peerdrop-relay binary entry point.
//!
//! Usage:
//! ```bash
//! peerdrop-relay --config relay.toml
//! PORT=8080 peerdrop-relay
//! ```

use anyhow::Context;
use peerdrop_relay::{http::build_router, Config, SignalRelay};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = load_config()?;
    config.apply_port_override(std::env::var("PORT").ok().as_deref())?;
    let addr = config.socket_addr()?;
    let ws_path = config.server.ws_path.clone();

    let relay = Arc::new(SignalRelay::new(config).context("invalid relay configuration")?);
    let app = build_router(relay);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(
        "peerdrop-relay v{} listening on ws://{}{}",
        env!("CARGO_PKG_VERSION"),
        addr,
        ws_path
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("peerdrop-relay stopped");
    Ok(())
}

/// Explicit `--config` path, else `relay.toml` when present, else defaults.
fn load_config() -> anyhow::Result<Config> {
    match get_config_path() {
        Some(path) => Ok(Config::from_file(&path)?),
        None => {
            let fallback = PathBuf::from("relay.toml");
            if fallback.exists() {
                Ok(Config::from_file(&fallback)?)
            } else {
                tracing::info!("No relay.toml found, using defaults");
                Ok(Config::default())
            }
        }
    }
}

fn get_config_path() -> Option<PathBuf> {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
