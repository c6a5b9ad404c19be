//! Watchdog status snapshot and its on-disk copy
//!
//! The daemon rewrites `/run/blindfix/status.json` after every check so
//! `blindfixctl status` can show it without talking to the daemon.

use crate::guard::GuardSnapshot;
use crate::orchestrator::EpisodeReport;
use crate::watchdog::CheckOutcome;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{create_dir_all, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Short code describing what the managed interface is going through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfacePhase {
    Unknown,
    Loaded,
    Up,
    /// Fault signature seen during startup
    FaultAtStartup,
    /// Interface could not even be queried
    ProbeFailed,
    /// Recovery started
    Blind,
    Down,
    Unloaded,
    Reloaded,
    /// Nothing to report
    Clear,
}

impl InterfacePhase {
    pub fn code(&self) -> Option<&'static str> {
        match self {
            InterfacePhase::Unknown => Some("--"),
            InterfacePhase::Loaded => Some("ld"),
            InterfacePhase::Up => Some("up"),
            InterfacePhase::FaultAtStartup => Some("XX"),
            InterfacePhase::ProbeFailed => Some("xx"),
            InterfacePhase::Blind => Some("BL"),
            InterfacePhase::Down => Some("dn"),
            InterfacePhase::Unloaded => Some("ul"),
            InterfacePhase::Reloaded => Some("rl"),
            InterfacePhase::Clear => None,
        }
    }

    /// Display label: `mon0 rl` while something is going on, else `rst#N`
    pub fn label(&self, interface: &str, successes: u64) -> String {
        match self.code() {
            Some(code) => format!("{} {}", interface, code),
            None => format!("rst#{}", successes),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRecord {
    pub at: DateTime<Utc>,
    pub outcome: CheckOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogStatus {
    pub interface: String,
    pub phase: InterfacePhase,
    pub label: String,
    pub guard: GuardSnapshot,
    pub shutting_down: bool,
    pub last_check: Option<CheckRecord>,
    pub last_episode: Option<EpisodeReport>,
    pub updated_at: DateTime<Utc>,
}

/// JSON status file
#[derive(Debug, Clone)]
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn save(&self, status: &WatchdogStatus) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            create_dir_all(dir)
                .await
                .context("Failed to create status directory")?;
        }

        let json = serde_json::to_string_pretty(status).context("Failed to serialize status")?;

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .await
            .context("Failed to open status file for writing")?;

        file.write_all(json.as_bytes())
            .await
            .context("Failed to write status file")?;

        debug!("Saved status to {}", self.path.display());
        Ok(())
    }

    /// `None` when the daemon has never written a status
    pub async fn load(&self) -> Result<Option<WatchdogStatus>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .context("Failed to read status file")?;
        let status = serde_json::from_str(&contents).context("Failed to parse status JSON")?;
        Ok(Some(status))
    }
}
