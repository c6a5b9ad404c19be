//! blindfixctl - operator CLI

use anyhow::Result;
use blindfixctl::{commands, Cli, Commands};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Check => commands::check(config).await,
        Commands::Reload { yes, force } => commands::reload(config, yes, force).await,
        Commands::Status { json } => commands::status(config, json).await,
        Commands::Config => commands::show_config(&config),
    }
}
