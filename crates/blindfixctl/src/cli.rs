//! CLI - Command-line argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Blindfix watchdog control
#[derive(Parser, Debug)]
#[command(name = "blindfixctl")]
#[command(about = "Inspect and drive the brcmfmac blind-bug watchdog", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (overrides $BLINDFIX_CONFIG and the system paths)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at info level instead of warn
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Read the logs once and report whether a fault signature fires
    Check,

    /// Reload the driver and recreate the monitor interface now
    Reload {
        /// Skip the countdown
        #[arg(short, long)]
        yes: bool,

        /// Run even if the daemon reports a recovery in progress
        #[arg(long)]
        force: bool,
    },

    /// Show the last status written by the daemon
    Status {
        /// Output JSON only
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,
}
