//! blindfixd - keeps the monitor interface alive without rebooting

use anyhow::{Context, Result};
use blindfix_common::{Capabilities, Config, Watchdog};
use blindfixd::BlindfixDaemon;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("blindfixd v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::load();
    let caps = Capabilities::system(&config)?;
    let watchdog = Watchdog::new(config, caps).context("Invalid configuration")?;

    BlindfixDaemon::new(watchdog).run().await?;

    info!("Shutting down gracefully");
    Ok(())
}
