//! Recovery orchestrator
//!
//! Instead of rebooting, pause recon, drop the monitor interface, reload
//! the driver module, recreate the interface and point the scanner at it.
//!
//! ```text
//!  Stopping ──► ┌─ Unloading ─► Reloading ─► RecreatingInterface ─► Verifying ─┐
//!               │                                                               │
//!               └───────────────── Retry (max_cycles) ◄─────────────────────────┘
//!                                                                │ Ok
//!                                                                ▼
//!                                   Resuming (always, unless shutting down) ─► Done
//! ```
//!
//! Every step returns a [`StepOutcome`]; one driver loop decides whether to
//! continue, retry the cycle or abort. `Aborted` is only reachable through
//! a shutdown request.

use crate::capabilities::{CommandRunner, Mood, ScanAck, ScanControl, StatusSink};
use crate::config::{Config, DelayConfig};
use crate::error::RecoveryError;
use crate::guard::{EpisodeGuard, EpisodeOutcome};
use crate::signatures::FaultKind;
use crate::status::InterfacePhase;
use crate::timing::{Clock, Sleeper};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPhase {
    Stopping,
    Unloading,
    Reloading,
    RecreatingInterface,
    Verifying,
    Resuming,
    Done,
    Aborted,
}

/// Steps repeated in every retry cycle, in order
const CYCLE: [RecoveryPhase; 4] = [
    RecoveryPhase::Unloading,
    RecoveryPhase::Reloading,
    RecoveryPhase::RecreatingInterface,
    RecoveryPhase::Verifying,
];

/// Result of one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Ok,
    /// This cycle failed; the driver loop may start another
    Retry(RecoveryError),
    /// Stop the episode now
    Abort,
}

enum CycleResult {
    Verified,
    Failed,
    Aborted,
}

/// What started an episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    Periodic { fault: FaultKind },
    ExternalEvent { fault: FaultKind },
    Startup,
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Periodic { fault } => write!(f, "periodic check ({})", fault),
            Trigger::ExternalEvent { fault } => write!(f, "log event ({})", fault),
            Trigger::Startup => f.write_str("startup check"),
            Trigger::Manual => f.write_str("manual request"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleFailure {
    pub cycle: u32,
    pub phase: RecoveryPhase,
    pub error: String,
}

/// Summary of one finished episode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeReport {
    pub id: String,
    pub trigger: Trigger,
    pub interface: String,
    pub outcome: EpisodeOutcome,
    pub final_phase: RecoveryPhase,
    pub cycles_attempted: u32,
    pub scanning_resumed: bool,
    pub failures: Vec<CycleFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl EpisodeReport {
    fn begin(trigger: Trigger, interface: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            id: format!("episode_{}", uuid::Uuid::new_v4()),
            trigger,
            interface: interface.to_string(),
            outcome: EpisodeOutcome::Failure,
            final_phase: RecoveryPhase::Stopping,
            cycles_attempted: 0,
            scanning_resumed: false,
            failures: Vec::new(),
            started_at,
            finished_at: started_at,
        }
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == EpisodeOutcome::Success
    }
}

/// Episode parameters
#[derive(Debug, Clone)]
pub struct RecoverySettings {
    pub interface: String,
    pub driver: String,
    pub max_cycles: u32,
    pub delays: DelayConfig,
}

impl RecoverySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interface: config.watchdog.interface.clone(),
            driver: config.watchdog.driver.clone(),
            max_cycles: config.watchdog.max_cycles,
            delays: config.delays.clone(),
        }
    }

    pub fn probe_command(&self) -> String {
        format!("ip link show {}", self.interface)
    }

    pub fn teardown_command(&self) -> String {
        format!(
            "ifconfig {iface} down && iw dev {iface} del",
            iface = self.interface
        )
    }

    pub fn unload_command(&self) -> String {
        format!("modprobe -r {}", self.driver)
    }

    pub fn reload_command(&self) -> String {
        format!("modprobe {}", self.driver)
    }

    pub fn phy_query_command(&self) -> &'static str {
        "iw phy"
    }

    pub fn recreate_command(&self, phy: &str) -> String {
        format!(
            "iw phy {phy} interface add {iface} type monitor && ifconfig {iface} up",
            phy = phy,
            iface = self.interface
        )
    }
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// First radio listed by `iw phy` (`Wiphy phy0` → `phy0`)
pub fn parse_phy_name(output: &str) -> Option<String> {
    output
        .lines()
        .find(|l| !l.trim().is_empty())
        .and_then(|l| l.split_whitespace().nth(1))
        .map(str::to_string)
}

/// Whether `ip link show` reports the UP flag
pub fn link_is_up(output: &str) -> bool {
    let Some(start) = output.find('<') else {
        return false;
    };
    let Some(len) = output[start..].find('>') else {
        return false;
    };
    output[start + 1..start + len].split(',').any(|flag| flag == "UP")
}

pub struct RecoveryOrchestrator {
    settings: RecoverySettings,
    guard: Arc<EpisodeGuard>,
    commands: Arc<dyn CommandRunner>,
    scanner: Arc<dyn ScanControl>,
    status: Arc<dyn StatusSink>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    shutdown: Arc<AtomicBool>,
    phase: Mutex<InterfacePhase>,
}

impl RecoveryOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: RecoverySettings,
        guard: Arc<EpisodeGuard>,
        commands: Arc<dyn CommandRunner>,
        scanner: Arc<dyn ScanControl>,
        status: Arc<dyn StatusSink>,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            settings,
            guard,
            commands,
            scanner,
            status,
            clock,
            sleeper,
            shutdown,
            phase: Mutex::new(InterfacePhase::Unknown),
        }
    }

    pub fn interface_phase(&self) -> InterfacePhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_interface_phase(&self, phase: InterfacePhase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn notify(&self, text: &str, mood: Mood) {
        if let Err(e) = self.status.notify(text, mood) {
            debug!("Status sink failed: {}", e);
        }
    }

    async fn settle(&self, duration: Duration) {
        if !duration.is_zero() {
            self.sleeper.sleep(duration).await;
        }
    }

    /// Query the managed interface; `Ok(true)` when it is up.
    pub async fn probe_interface(&self) -> Result<bool, RecoveryError> {
        let output = self.commands.run(&self.settings.probe_command()).await?;
        Ok(link_is_up(&output))
    }

    /// Light remedy: toggle scanning without touching the driver
    pub async fn restart_scanning(&self) -> ScanAck {
        let off = self.scanner.set_scanning_enabled(false).await;
        if !off.success {
            warn!("Pausing recon failed: {}", off.detail);
        }
        let on = self.scanner.set_scanning_enabled(true).await;
        if on.success {
            info!("Recon restarted");
            self.notify("Wifi recon flipped!", Mood::Cool);
        } else {
            warn!("Restarting recon failed: {}", on.detail);
        }
        on
    }

    /// Run one guarded episode. `None` when another episode holds the guard.
    pub async fn recover(&self, trigger: Trigger) -> Option<EpisodeReport> {
        let started_at = self.clock.now();
        let ticket = self.guard.try_enter(started_at)?;

        let report = self.run_episode(trigger, started_at).await;
        if !self.guard.exit(ticket, report.outcome, self.clock.now()) {
            warn!(episode = %report.id, "Guard was taken over while this episode ran");
        }
        Some(report)
    }

    async fn run_episode(&self, trigger: Trigger, started_at: DateTime<Utc>) -> EpisodeReport {
        let mut report = EpisodeReport::begin(trigger, &self.settings.interface, started_at);
        info!(
            episode = %report.id,
            interface = %self.settings.interface,
            "Starting recovery after {}",
            trigger
        );
        self.set_interface_phase(InterfacePhase::Blind);
        self.notify("I'm blind! Try turning it off and on again", Mood::Bored);

        let mut aborted = self.stop_scanning().await == StepOutcome::Abort;
        let mut verified_cycle = None;

        if !aborted {
            for cycle in 0..self.settings.max_cycles {
                report.cycles_attempted = cycle + 1;
                match self.run_cycle(cycle, &mut report).await {
                    CycleResult::Verified => {
                        verified_cycle = Some(cycle);
                        break;
                    }
                    CycleResult::Failed => {
                        if cycle + 1 < self.settings.max_cycles {
                            info!("{} didn't make it, trying again", self.settings.interface);
                        }
                    }
                    CycleResult::Aborted => {
                        aborted = true;
                        break;
                    }
                }
            }
        }

        if verified_cycle.is_some() {
            report.outcome = EpisodeOutcome::Success;
            info!(episode = %report.id, "{} back up", self.settings.interface);
            self.notify("And back on again...", Mood::Intense);
        } else if !aborted {
            let err = RecoveryError::RetriesExhausted {
                cycles: self.settings.max_cycles,
            };
            error!(episode = %report.id, "{}", err);
            self.notify("Still blind, resuming anyway", Mood::Broken);
        }

        if aborted {
            let err = RecoveryError::ShutdownRequested;
            info!(
                episode = %report.id,
                error_kind = err.kind(),
                "Episode stopped ({}), leaving recon paused",
                err
            );
        } else {
            let cycles = verified_cycle.unwrap_or(self.settings.max_cycles);
            match self.resume_scanning(cycles).await {
                StepOutcome::Ok => report.scanning_resumed = true,
                StepOutcome::Abort => aborted = true,
                StepOutcome::Retry(err) => {
                    error!(episode = %report.id, "Recon did not start up: {}", err);
                }
            }
        }

        report.final_phase = if aborted {
            RecoveryPhase::Aborted
        } else {
            RecoveryPhase::Done
        };
        report.finished_at = self.clock.now();
        info!(
            episode = %report.id,
            outcome = ?report.outcome,
            cycles = report.cycles_attempted,
            "Recovery finished"
        );
        report
    }

    async fn run_cycle(&self, cycle: u32, report: &mut EpisodeReport) -> CycleResult {
        for phase in CYCLE {
            if self.shutdown_requested() {
                return CycleResult::Aborted;
            }
            match self.run_step(phase, cycle).await {
                StepOutcome::Ok => {}
                StepOutcome::Retry(err) => {
                    warn!(
                        cycle,
                        phase = ?phase,
                        error_kind = err.kind(),
                        "Recovery step failed: {}",
                        err
                    );
                    report.failures.push(CycleFailure {
                        cycle,
                        phase,
                        error: err.to_string(),
                    });
                    return CycleResult::Failed;
                }
                StepOutcome::Abort => return CycleResult::Aborted,
            }
        }
        CycleResult::Verified
    }

    async fn run_step(&self, phase: RecoveryPhase, cycle: u32) -> StepOutcome {
        match phase {
            RecoveryPhase::Unloading => self.unload_driver(cycle).await,
            RecoveryPhase::Reloading => self.reload_driver(cycle).await,
            RecoveryPhase::RecreatingInterface => self.recreate_interface(cycle).await,
            RecoveryPhase::Verifying => self.verify_interface().await,
            _ => StepOutcome::Ok,
        }
    }

    /// Best-effort: a scanner that will not stop must not block the reload.
    async fn stop_scanning(&self) -> StepOutcome {
        if self.shutdown_requested() {
            return StepOutcome::Abort;
        }

        match self.probe_interface().await {
            Ok(true) => info!("{} is up, resetting anyway", self.settings.interface),
            Ok(false) => info!("{} is down", self.settings.interface),
            Err(e) => warn!("Interface probe failed: {}", e),
        }

        let ack = self.scanner.set_scanning_enabled(false).await;
        if ack.success {
            info!("Recon paused");
            self.notify("Wifi recon paused!", Mood::Cool);
            self.settle(self.settings.delays.after_stop.for_cycle(0)).await;
        } else {
            warn!("Pausing recon failed, continuing: {}", ack.detail);
            self.notify("Recon was busted (probably)", Mood::Broken);
        }

        match self.commands.run(&self.settings.teardown_command()).await {
            Ok(_) => {
                self.set_interface_phase(InterfacePhase::Down);
                self.notify(&format!("{} down", self.settings.interface), Mood::Bored);
            }
            Err(e) => warn!("Removing {} failed: {}", self.settings.interface, e),
        }

        StepOutcome::Ok
    }

    async fn unload_driver(&self, cycle: u32) -> StepOutcome {
        if let Err(e) = self.commands.run(&self.settings.unload_command()).await {
            return StepOutcome::Retry(e);
        }
        info!(cycle, "Unloaded {}", self.settings.driver);
        self.set_interface_phase(InterfacePhase::Unloaded);
        self.notify(&format!("Turning it off #{}", cycle), Mood::Smart);
        self.settle(self.settings.delays.after_unload.for_cycle(cycle))
            .await;
        StepOutcome::Ok
    }

    async fn reload_driver(&self, cycle: u32) -> StepOutcome {
        if let Err(e) = self.commands.run(&self.settings.reload_command()).await {
            return StepOutcome::Retry(e);
        }
        info!(cycle, "Reloaded {}", self.settings.driver);
        self.set_interface_phase(InterfacePhase::Reloaded);
        self.settle(self.settings.delays.after_reload.for_cycle(cycle))
            .await;
        StepOutcome::Ok
    }

    async fn recreate_interface(&self, cycle: u32) -> StepOutcome {
        let phy = match self.resolve_phy().await {
            Ok(phy) => phy,
            Err(e) => return StepOutcome::Retry(e),
        };

        let command = self.settings.recreate_command(&phy);
        if let Err(e) = self.commands.run(&command).await {
            return StepOutcome::Retry(e);
        }
        info!(cycle, phy = %phy, "Created {}", self.settings.interface);
        self.set_interface_phase(InterfacePhase::Up);
        self.settle(self.settings.delays.after_recreate.for_cycle(cycle))
            .await;
        StepOutcome::Ok
    }

    /// Right after a reload the radio may not be enumerated yet.
    async fn resolve_phy(&self) -> Result<String, RecoveryError> {
        let output = self
            .commands
            .run(self.settings.phy_query_command())
            .await
            .map_err(|e| RecoveryError::HardwareEnumerationUnavailable(e.to_string()))?;
        parse_phy_name(&output).ok_or_else(|| {
            RecoveryError::HardwareEnumerationUnavailable("no wireless phy listed".to_string())
        })
    }

    async fn verify_interface(&self) -> StepOutcome {
        let ack = self
            .scanner
            .set_scan_target_interface(&self.settings.interface)
            .await;
        if !ack.success {
            return StepOutcome::Retry(RecoveryError::ScanRejected {
                command: format!("target {}", self.settings.interface),
                detail: ack.detail,
            });
        }
        info!("Scanner accepted {}", self.settings.interface);
        self.settle(self.settings.delays.after_verify.for_cycle(0))
            .await;
        StepOutcome::Ok
    }

    /// Always re-enable scanning so a later check gets another chance.
    async fn resume_scanning(&self, cycles: u32) -> StepOutcome {
        self.settle(self.settings.delays.before_resume.for_cycle(cycles))
            .await;
        if self.shutdown_requested() {
            return StepOutcome::Abort;
        }

        let cleared = self.scanner.clear_scan_state().await;
        if !cleared.success {
            warn!("Clearing scan state failed: {}", cleared.detail);
        }

        let ack = self.scanner.set_scanning_enabled(true).await;
        if !ack.success {
            return StepOutcome::Retry(RecoveryError::ScanRejected {
                command: "resume recon".to_string(),
                detail: ack.detail,
            });
        }
        self.set_interface_phase(InterfacePhase::Clear);
        self.notify("I can see again! (probably)", Mood::Happy);
        StepOutcome::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_phy_name() {
        assert_eq!(
            parse_phy_name("Wiphy phy0\n\tmax # scan SSIDs: 10\n"),
            Some("phy0".to_string())
        );
        assert_eq!(parse_phy_name("\nWiphy phy1\n"), Some("phy1".to_string()));
        assert_eq!(parse_phy_name(""), None);
        assert_eq!(parse_phy_name("Wiphy"), None);
    }

    #[test]
    fn test_link_is_up() {
        assert!(link_is_up(
            "3: mon0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc"
        ));
        assert!(!link_is_up("3: mon0: <BROADCAST,MULTICAST> mtu 1500 state DOWN"));
        assert!(!link_is_up("3: mon0: <NO-CARRIER,BROADCAST,LOWER_UP>"));
        assert!(!link_is_up("Device \"mon0\" does not exist."));
    }

    #[test]
    fn test_commands_follow_settings() {
        let settings = RecoverySettings::default();
        assert_eq!(settings.unload_command(), "modprobe -r brcmfmac");
        assert_eq!(settings.reload_command(), "modprobe brcmfmac");
        assert_eq!(
            settings.recreate_command("phy0"),
            "iw phy phy0 interface add mon0 type monitor && ifconfig mon0 up"
        );
        assert_eq!(
            settings.teardown_command(),
            "ifconfig mon0 down && iw dev mon0 del"
        );
    }

    #[test]
    fn test_trigger_display() {
        let t = Trigger::Periodic {
            fault: FaultKind::ChannelSetFailure,
        };
        assert_eq!(t.to_string(), "periodic check (channel-set failure)");
    }
}
