//! Watchdog facade
//!
//! One explicitly constructed instance owns the guard, the detector and the
//! orchestrator. The daemon's schedulers hold it behind an `Arc` and call
//! the `on_*` entry points; nothing here is process-global.

use crate::capabilities::{Capabilities, LogReader, Mood, StatusSink};
use crate::config::{Config, HopStuckRemedy};
use crate::detector::{Detection, Detector, LogWindow};
use crate::error::{ConfigError, RecoveryError};
use crate::guard::{EpisodeGuard, GuardPolicy};
use crate::orchestrator::{EpisodeReport, RecoveryOrchestrator, RecoverySettings, Trigger};
use crate::signatures::{signature_table, FaultKind, LogSource};
use crate::status::{CheckRecord, InterfacePhase, StatusFile, WatchdogStatus};
use crate::timing::Clock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Result of one entry-point invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CheckOutcome {
    /// Cooldown or an episode in flight; logs were not read
    Deferred,
    ShuttingDown,
    LogUnavailable { log: LogSource, detail: String },
    Clear,
    Episode { report: EpisodeReport },
    /// A fault was seen but another episode holds the guard
    Busy { trigger: Trigger },
    ScanRestarted { fault: FaultKind, success: bool },
}

impl CheckOutcome {
    pub fn summary(&self) -> String {
        match self {
            CheckOutcome::Deferred => "deferred (cooling down)".to_string(),
            CheckOutcome::ShuttingDown => "shutting down".to_string(),
            CheckOutcome::LogUnavailable { log, detail } => {
                format!("{} log unavailable: {}", log, detail)
            }
            CheckOutcome::Clear => "logs look good".to_string(),
            CheckOutcome::Episode { report } => format!(
                "recovery {:?} after {} cycle(s)",
                report.outcome, report.cycles_attempted
            ),
            CheckOutcome::Busy { trigger } => format!("recovery already running ({})", trigger),
            CheckOutcome::ScanRestarted { fault, success } => {
                format!("recon restarted for {} (success={})", fault, success)
            }
        }
    }
}

pub struct Watchdog {
    config: Config,
    detector: Detector,
    guard: Arc<EpisodeGuard>,
    orchestrator: RecoveryOrchestrator,
    logs: Arc<dyn LogReader>,
    status: Arc<dyn StatusSink>,
    clock: Arc<dyn Clock>,
    shutdown: Arc<AtomicBool>,
    last_check: Mutex<Option<CheckRecord>>,
    last_episode: Mutex<Option<EpisodeReport>>,
    status_file: Option<StatusFile>,
}

impl Watchdog {
    pub fn new(config: Config, caps: Capabilities) -> Result<Self, ConfigError> {
        config.validate()?;

        let detector = Detector::new(
            signature_table(&config.signatures)?,
            config.watchdog.window_lines,
        );
        let guard = Arc::new(EpisodeGuard::new(GuardPolicy {
            stale_after: secs(config.watchdog.stale_after_secs),
            success_cooldown: secs(config.watchdog.success_cooldown_secs),
            failure_rewind: secs(config.watchdog.failure_rewind_secs),
        }));
        let shutdown = Arc::new(AtomicBool::new(false));

        let orchestrator = RecoveryOrchestrator::new(
            RecoverySettings::from_config(&config),
            Arc::clone(&guard),
            caps.commands,
            caps.scanner,
            Arc::clone(&caps.status),
            Arc::clone(&caps.clock),
            caps.sleeper,
            Arc::clone(&shutdown),
        );
        orchestrator.set_interface_phase(InterfacePhase::Loaded);

        let status_file = config
            .status
            .enabled
            .then(|| StatusFile::new(config.status.path.clone()));

        Ok(Self {
            config,
            detector,
            guard,
            orchestrator,
            logs: caps.logs,
            status: caps.status,
            clock: caps.clock,
            shutdown,
            last_check: Mutex::new(None),
            last_episode: Mutex::new(None),
            status_file,
        })
    }

    /// Replace (or drop) the status file destination
    pub fn with_status_file(mut self, file: Option<StatusFile>) -> Self {
        self.status_file = file;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn guard(&self) -> &EpisodeGuard {
        &self.guard
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    pub fn interface_phase(&self) -> InterfacePhase {
        self.orchestrator.interface_phase()
    }

    fn notify(&self, text: &str, mood: Mood) {
        if let Err(e) = self.status.notify(text, mood) {
            debug!("Status sink failed: {}", e);
        }
    }

    async fn read_windows(
        &self,
        sources: &[LogSource],
    ) -> Result<Vec<LogWindow>, (LogSource, RecoveryError)> {
        let count = self.detector.window_lines();
        let mut windows = Vec::with_capacity(sources.len());
        for &source in sources {
            let lines = self
                .logs
                .recent_lines(source, count)
                .await
                .map_err(|e| (source, e))?;
            windows.push(LogWindow::new(source, lines, count));
        }
        Ok(windows)
    }

    /// Read the logs and run the detector, with no other effect
    pub async fn detect_now(&self) -> Result<Detection, RecoveryError> {
        let windows = self
            .read_windows(&self.detector.required_sources())
            .await
            .map_err(|(_, e)| e)?;
        Ok(self.detector.detect_in(&windows))
    }

    /// Timer entry point
    pub async fn on_periodic_check(&self) -> CheckOutcome {
        if self.shutdown_requested() {
            return self.record(CheckOutcome::ShuttingDown).await;
        }

        if !self.guard.detection_allowed(self.clock.now()) {
            debug!("Skipping check, recent recovery");
            return self.record(CheckOutcome::Deferred).await;
        }

        let windows = match self.read_windows(&self.detector.required_sources()).await {
            Ok(windows) => windows,
            Err((log, e)) => {
                warn!("Skipping check: {}", e);
                return self
                    .record(CheckOutcome::LogUnavailable {
                        log,
                        detail: e.to_string(),
                    })
                    .await;
            }
        };

        let outcome = match self.detector.detect_in(&windows) {
            Detection::Clear => {
                debug!("Logs look good");
                CheckOutcome::Clear
            }
            Detection::Fault { kind, matches } => {
                info!(fault = %kind, matches, "Fault signature detected");
                self.announce(kind);
                self.remedy(kind, Trigger::Periodic { fault: kind }).await
            }
        };
        self.record(outcome).await
    }

    /// Cheap pre-filter for the journal follower
    pub fn is_external_fault(&self, line: &str) -> bool {
        self.detector.matches_line(FaultKind::ChannelHopStuck, line)
    }

    /// A single log line delivered by the host. `None` when it is not a fault.
    pub async fn on_external_fault_event(&self, line: &str) -> Option<CheckOutcome> {
        if !self.is_external_fault(line) {
            return None;
        }
        if self.shutdown_requested() {
            return Some(self.record(CheckOutcome::ShuttingDown).await);
        }

        info!("Log event match: {}", line.trim());
        let fault = FaultKind::ChannelHopStuck;
        let outcome = self.remedy(fault, Trigger::ExternalEvent { fault }).await;
        Some(self.record(outcome).await)
    }

    /// Steps in flight finish, then the episode aborts and recon stays paused.
    pub fn on_shutdown_requested(&self) {
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            info!("Shutdown requested");
        }
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// An episode currently holds the guard
    pub fn episode_in_flight(&self) -> bool {
        self.guard.is_busy(self.clock.now())
    }

    /// First check after the daemon comes up: the interface must exist and
    /// the kernel log must not already show the fault.
    pub async fn on_startup(&self) -> CheckOutcome {
        if self.shutdown_requested() {
            return self.record(CheckOutcome::ShuttingDown).await;
        }

        match self.orchestrator.probe_interface().await {
            Err(e) => {
                error!("Interface probe failed: {}", e);
                self.orchestrator
                    .set_interface_phase(InterfacePhase::ProbeFailed);
                let outcome = self.run_episode(Trigger::Startup).await;
                return self.record(outcome).await;
            }
            Ok(true) => {
                info!("{} is up", self.config.watchdog.interface);
                self.orchestrator.set_interface_phase(InterfacePhase::Up);
            }
            Ok(false) => info!("{} is down", self.config.watchdog.interface),
        }

        let windows = match self.read_windows(&[LogSource::Kernel]).await {
            Ok(windows) => windows,
            Err((log, e)) => {
                warn!("Startup check skipped: {}", e);
                return self
                    .record(CheckOutcome::LogUnavailable {
                        log,
                        detail: e.to_string(),
                    })
                    .await;
            }
        };

        let outcome = match self.detector.detect_in(&windows) {
            Detection::Fault { kind, matches } => {
                info!(fault = %kind, matches, "Fault present at startup");
                self.orchestrator
                    .set_interface_phase(InterfacePhase::FaultAtStartup);
                self.announce(kind);
                self.run_episode(Trigger::Startup).await
            }
            Detection::Clear => {
                info!("Startup logs look good");
                self.orchestrator.set_interface_phase(InterfacePhase::Clear);
                CheckOutcome::Clear
            }
        };
        self.record(outcome).await
    }

    /// Operator-requested reload, still subject to the guard
    pub async fn force_recovery(&self) -> CheckOutcome {
        if self.shutdown_requested() {
            return self.record(CheckOutcome::ShuttingDown).await;
        }

        info!("Manual recovery requested");
        let outcome = self.run_episode(Trigger::Manual).await;
        self.record(outcome).await
    }

    fn announce(&self, kind: FaultKind) {
        match kind {
            FaultKind::ChannelSetFailure => {
                self.notify("Blind-Bug detected. Restarting.", Mood::Bored)
            }
            FaultKind::ChannelHopStuck => {
                self.notify("Wifi channel stuck. Restarting recon.", Mood::Bored)
            }
        }
    }

    async fn remedy(&self, fault: FaultKind, trigger: Trigger) -> CheckOutcome {
        let light = fault == FaultKind::ChannelHopStuck
            && self.config.remedy.hop_stuck == HopStuckRemedy::RestartScan;
        if !light {
            return self.run_episode(trigger).await;
        }

        if self.episode_in_flight() {
            info!("Recovery in flight, not touching recon");
            return CheckOutcome::Busy { trigger };
        }
        let ack = self.orchestrator.restart_scanning().await;
        CheckOutcome::ScanRestarted {
            fault,
            success: ack.success,
        }
    }

    async fn run_episode(&self, trigger: Trigger) -> CheckOutcome {
        match self.orchestrator.recover(trigger).await {
            Some(report) => {
                *self.last_episode.lock().unwrap_or_else(|e| e.into_inner()) =
                    Some(report.clone());
                CheckOutcome::Episode { report }
            }
            None => CheckOutcome::Busy { trigger },
        }
    }

    async fn record(&self, outcome: CheckOutcome) -> CheckOutcome {
        *self.last_check.lock().unwrap_or_else(|e| e.into_inner()) = Some(CheckRecord {
            at: self.clock.now(),
            outcome: outcome.clone(),
        });

        if let Some(file) = &self.status_file {
            if let Err(e) = file.save(&self.status()).await {
                warn!("Failed to save status: {:#}", e);
            }
        }
        outcome
    }

    pub fn status(&self) -> WatchdogStatus {
        let guard = self.guard.snapshot();
        let phase = self.orchestrator.interface_phase();
        let interface = self.config.watchdog.interface.clone();
        WatchdogStatus {
            label: phase.label(&interface, guard.success_count),
            interface,
            phase,
            guard,
            shutting_down: self.shutdown_requested(),
            last_check: self
                .last_check
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            last_episode: self
                .last_episode
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            updated_at: self.clock.now(),
        }
    }
}

fn secs(s: u64) -> chrono::Duration {
    i64::try_from(s)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}
