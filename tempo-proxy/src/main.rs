//! Tempo Proxy Engine
//!
//! Loads the configuration from the environment, starts the selected transport
//! and serves until interrupted.

use anyhow::Context;
use tempo_proxy::{ProxyConfig, Server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// The primary entrypoint for the Tempo load balancer.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ProxyConfig::from_env().context("invalid configuration")?;
    let server = Server::start(config).await.context("failed to start")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!("shutting down");
    server.stop().await;
    Ok(())
}
