//! Marketplace ledger server binary

use bazaar_core::{Config, Market};
use std::error::Error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting Bazaar Market Server");

    // Load configuration
    let config = Config::from_env()?;

    // Open market
    let market = Market::open(config).await?;
    tracing::info!("Market opened successfully");

    // Log every change until interrupted
    let mut changes = market.subscribe();
    let watcher = tokio::spawn(async move {
        while let Ok(notification) = changes.recv().await {
            tracing::info!(id = %notification.id, change = ?notification.change, "change");
        }
    });

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down market server");
    market.shutdown().await?;
    watcher.abort();
    Ok(())
}
