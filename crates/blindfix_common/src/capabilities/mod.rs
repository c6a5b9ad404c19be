//! Capabilities the watchdog consumes from its host
//!
//! The recovery core never spawns processes or talks HTTP itself. It goes
//! through these traits so that:
//! - tests run the whole state machine with fakes, without root or a radio
//! - the host can swap the scanner backend
//!
//! Production implementations live next to the traits; the fakes used by
//! the test suites are in [`fakes`].

use crate::config::Config;
use crate::error::RecoveryError;
use crate::signatures::LogSource;
use crate::timing::{Clock, Sleeper, SystemClock, TokioSleeper};
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub mod bettercap;
pub mod fakes;
pub mod journal;
pub mod shell;
pub mod sink;

pub use bettercap::BettercapClient;
pub use journal::JournalReader;
pub use shell::ShellCommandRunner;
pub use sink::LogStatusSink;

/// Runs a shell command and returns its stdout
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str) -> Result<String, RecoveryError>;
}

/// Reads the most recent lines of a log source, oldest first
#[async_trait]
pub trait LogReader: Send + Sync {
    async fn recent_lines(
        &self,
        source: LogSource,
        count: usize,
    ) -> Result<Vec<String>, RecoveryError>;
}

/// Acknowledgement returned by the scanning subsystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanAck {
    pub success: bool,
    pub detail: String,
}

impl ScanAck {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
        }
    }

    pub fn rejected(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
        }
    }
}

/// Control surface of the scanning subsystem
#[async_trait]
pub trait ScanControl: Send + Sync {
    async fn set_scanning_enabled(&self, enabled: bool) -> ScanAck;
    async fn set_scan_target_interface(&self, name: &str) -> ScanAck;
    async fn clear_scan_state(&self) -> ScanAck;
}

/// Face shown next to a status message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Bored,
    Cool,
    Smart,
    Intense,
    Happy,
    Broken,
}

/// Best-effort status display. Errors are logged and dropped by callers.
pub trait StatusSink: Send + Sync {
    fn notify(&self, text: &str, mood: Mood) -> anyhow::Result<()>;
}

/// Everything the watchdog needs from the outside world
#[derive(Clone)]
pub struct Capabilities {
    pub commands: Arc<dyn CommandRunner>,
    pub logs: Arc<dyn LogReader>,
    pub scanner: Arc<dyn ScanControl>,
    pub status: Arc<dyn StatusSink>,
    pub clock: Arc<dyn Clock>,
    pub sleeper: Arc<dyn Sleeper>,
}

impl Capabilities {
    /// Real shell, journal, bettercap, wall clock
    pub fn system(config: &Config) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.watchdog.command_timeout_secs);
        let scanner =
            BettercapClient::new(&config.scanner).context("Failed to build bettercap client")?;
        Ok(Self {
            commands: Arc::new(ShellCommandRunner::new(timeout)),
            logs: Arc::new(JournalReader::new(timeout)),
            scanner: Arc::new(scanner),
            status: Arc::new(LogStatusSink),
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
        })
    }
}
