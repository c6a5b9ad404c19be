//! Recovery episode tests
//!
//! Drive whole episodes against fake capabilities and a simulated clock.
//! Nothing here touches a real radio, journal or bettercap.

mod common;

use async_trait::async_trait;
use blindfix_common::capabilities::fakes::{
    FakeCommandRunner, FakeLogReader, FakeScanControl, RecordingStatusSink, ScanCall,
};
use blindfix_common::capabilities::{CommandRunner, Mood};
use blindfix_common::guard::{EpisodeGuard, GuardPolicy};
use blindfix_common::orchestrator::{RecoveryOrchestrator, RecoverySettings};
use blindfix_common::timing::Clock;
use blindfix_common::{
    CheckOutcome, EpisodeOutcome, EpisodeReport, FaultKind, InterfacePhase, LogSource, RecoveryError,
    RecoveryPhase, RecoveryState, Trigger,
};
use common::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

fn blind_logs() -> FakeLogReader {
    FakeLogReader::new().with_matches(LogSource::Kernel, CHANNEL_SET_LINE, 4)
}

fn episode(outcome: CheckOutcome) -> EpisodeReport {
    match outcome {
        CheckOutcome::Episode { report } => report,
        other => panic!("expected an episode, got {:?}", other),
    }
}

// ============================================================================
// Successful Episodes
// ============================================================================

/// Four channel-set failures in the kernel log run one clean episode
#[tokio::test]
async fn test_first_cycle_success() {
    let h = Harness::healthy(blind_logs());
    let watchdog = h.watchdog();

    let report = episode(watchdog.on_periodic_check().await);

    assert!(report.succeeded());
    assert_eq!(report.cycles_attempted, 1);
    assert_eq!(report.final_phase, RecoveryPhase::Done);
    assert!(report.scanning_resumed);
    assert!(report.failures.is_empty());
    assert!(report.id.starts_with("episode_"));
    assert_eq!(
        report.trigger,
        Trigger::Periodic {
            fault: FaultKind::ChannelSetFailure
        }
    );

    assert_eq!(
        h.scanner.calls(),
        vec![
            ScanCall::Enabled(false),
            ScanCall::Target("mon0".to_string()),
            ScanCall::Clear,
            ScanCall::Enabled(true),
        ]
    );
    assert_eq!(h.commands().count_matching("modprobe -r brcmfmac"), 1);
    assert_eq!(h.commands().count_matching("interface add mon0 type monitor"), 1);

    // stop, unload, reload, recreate, verify, resume
    assert_eq!(h.delay_secs(), vec![2, 1, 10, 5, 1, 8]);

    let guard = watchdog.guard().snapshot();
    assert_eq!(guard.state, RecoveryState::CoolingDown);
    assert_eq!(guard.success_count, 1);
    assert_eq!(guard.failure_count, 0);
}

/// Interface creation fails once: the second cycle succeeds after 46 s
#[tokio::test]
async fn test_retry_after_interface_creation_failure() {
    let commands = FakeCommandRunner::healthy().failing_times(
        "interface add",
        1,
        "command failed: Device or resource busy (-16)",
    );
    let h = Harness::new(commands, blind_logs(), FakeScanControl::new());
    let watchdog = h.watchdog();

    let report = episode(watchdog.on_periodic_check().await);

    assert_eq!(report.outcome, EpisodeOutcome::Success);
    assert_eq!(report.cycles_attempted, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].cycle, 0);
    assert_eq!(report.failures[0].phase, RecoveryPhase::RecreatingInterface);

    assert_eq!(h.delay_secs(), vec![2, 1, 10, 2, 14, 6, 1, 10]);
    assert_eq!(h.sleeper.total().as_secs(), 46);
    assert_eq!(report.elapsed(), chrono::Duration::seconds(46));

    assert_eq!(h.commands().count_matching("modprobe -r brcmfmac"), 2);
    assert_eq!(h.scanner.scanning_enabled(), Some(true));
    assert_eq!(watchdog.guard().snapshot().success_count, 1);
}

/// Radio not enumerated yet: the cycle is retried, not aborted
#[tokio::test]
async fn test_missing_phy_retries_cycle() {
    let commands = FakeCommandRunner::healthy().failing_times("iw phy", 1, "nl80211 not found");
    let h = Harness::new(commands, blind_logs(), FakeScanControl::new());
    let watchdog = h.watchdog();

    let report = episode(watchdog.on_periodic_check().await);

    assert!(report.succeeded());
    assert_eq!(report.cycles_attempted, 2);
    assert_eq!(report.failures[0].phase, RecoveryPhase::RecreatingInterface);
    assert!(report.failures[0].error.contains("radio hardware not enumerated"));
}

/// A scanner that will not pause does not block the reload
#[tokio::test]
async fn test_pause_rejection_continues() {
    let h = Harness::new(
        FakeCommandRunner::healthy(),
        blind_logs(),
        FakeScanControl::new().reject_pause("module wifi.recon is not running"),
    );
    let watchdog = h.watchdog();

    let report = episode(watchdog.on_periodic_check().await);

    assert!(report.succeeded());
    // no settle delay after a failed pause
    assert_eq!(h.delay_secs(), vec![1, 10, 5, 1, 8]);
    assert!(h
        .sink
        .messages()
        .contains(&("Recon was busted (probably)".to_string(), Mood::Broken)));
}

/// Status display failures never abort an episode
#[tokio::test]
async fn test_broken_status_sink_is_ignored() {
    let h = Harness::healthy(blind_logs()).with_sink(RecordingStatusSink::broken());
    let watchdog = h.watchdog();

    let report = episode(watchdog.on_periodic_check().await);

    assert!(report.succeeded());
    assert!(!h.sink.messages().is_empty());
}

/// Scanner refuses to restart: reported, verified outcome kept, guard released once
#[tokio::test]
async fn test_resume_rejection_keeps_verified_outcome() {
    let h = Harness::new(
        FakeCommandRunner::healthy(),
        blind_logs(),
        FakeScanControl::new().reject_resume("wifi.recon: interface busy"),
    );
    let watchdog = h.watchdog();

    let report = episode(watchdog.on_periodic_check().await);

    assert_eq!(report.outcome, EpisodeOutcome::Success);
    assert_eq!(report.cycles_attempted, 1);
    assert_eq!(report.final_phase, RecoveryPhase::Done);
    assert!(!report.scanning_resumed);
    assert_eq!(h.scanner.calls().last(), Some(&ScanCall::Enabled(true)));
    assert_eq!(h.delay_secs(), vec![2, 1, 10, 5, 1, 8]);

    let guard = watchdog.guard().snapshot();
    assert_eq!(guard.state, RecoveryState::CoolingDown);
    assert_eq!(guard.success_count, 1);
    assert_eq!(guard.failure_count, 0);
}

// ============================================================================
// Failed Episodes
// ============================================================================

/// Every verification rejected: three cycles, failure, scanning back on
#[tokio::test]
async fn test_exhausted_episode_still_resumes_scanning() {
    let h = Harness::new(
        FakeCommandRunner::healthy(),
        blind_logs(),
        FakeScanControl::new().reject_target_always("interface mon0 not found"),
    );
    let watchdog = h.watchdog();

    let report = episode(watchdog.on_periodic_check().await);

    assert_eq!(report.outcome, EpisodeOutcome::Failure);
    assert_eq!(report.cycles_attempted, 3);
    assert_eq!(report.final_phase, RecoveryPhase::Done);
    assert_eq!(report.failures.len(), 3);
    assert!(report
        .failures
        .iter()
        .all(|f| f.phase == RecoveryPhase::Verifying));
    assert!(report.scanning_resumed);
    assert_eq!(h.scanner.scanning_enabled(), Some(true));
    assert_eq!(h.commands().count_matching("modprobe -r brcmfmac"), 3);

    let guard = watchdog.guard().snapshot();
    assert_eq!(guard.state, RecoveryState::CoolingDown);
    assert_eq!(guard.failure_count, 1);
    assert_eq!(guard.success_count, 0);

    // the failure rewind lets the very next check try again
    assert!(watchdog.guard().detection_allowed(h.clock.now()));
    let again = episode(watchdog.on_periodic_check().await);
    assert_eq!(again.outcome, EpisodeOutcome::Failure);
    assert_eq!(watchdog.guard().snapshot().failure_count, 2);
}

/// Driver unload failing fails the cycle
#[tokio::test]
async fn test_unload_failure_fails_cycle() {
    let commands = FakeCommandRunner::healthy().failing("modprobe -r", "Module brcmfmac is in use");
    let h = Harness::new(commands, blind_logs(), FakeScanControl::new());
    let watchdog = h.watchdog();

    let report = episode(watchdog.on_periodic_check().await);

    assert_eq!(report.outcome, EpisodeOutcome::Failure);
    assert!(report
        .failures
        .iter()
        .all(|f| f.phase == RecoveryPhase::Unloading));
    assert_eq!(h.commands().count_matching("modprobe brcmfmac"), 0);
    assert!(report.scanning_resumed);
}

// ============================================================================
// Shutdown
// ============================================================================

/// Runs healthy commands but raises the shutdown flag on driver unload
struct ShutdownOnUnload {
    inner: FakeCommandRunner,
    flag: Arc<AtomicBool>,
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl CommandRunner for ShutdownOnUnload {
    async fn run(&self, command: &str) -> Result<String, RecoveryError> {
        self.calls.lock().unwrap().push(command.to_string());
        if command.starts_with("modprobe -r") {
            self.flag.store(true, Ordering::SeqCst);
        }
        self.inner.run(command).await
    }
}

/// A shutdown mid-episode finishes the running step, then aborts without resuming
#[tokio::test]
async fn test_shutdown_aborts_without_resume() {
    let flag = Arc::new(AtomicBool::new(false));
    let runner = Arc::new(ShutdownOnUnload {
        inner: FakeCommandRunner::healthy(),
        flag: Arc::clone(&flag),
        calls: Mutex::new(Vec::new()),
    });
    let h = Harness::healthy(blind_logs());
    let guard = Arc::new(EpisodeGuard::new(GuardPolicy::default()));
    let orchestrator = RecoveryOrchestrator::new(
        RecoverySettings::default(),
        Arc::clone(&guard),
        runner.clone(),
        h.scanner.clone(),
        h.sink.clone(),
        h.clock.clone(),
        h.sleeper.clone(),
        flag,
    );

    let report = orchestrator.recover(Trigger::Manual).await.unwrap();

    assert_eq!(report.final_phase, RecoveryPhase::Aborted);
    assert_eq!(report.outcome, EpisodeOutcome::Failure);
    assert!(!report.scanning_resumed);
    assert_eq!(h.scanner.calls(), vec![ScanCall::Enabled(false)]);

    let calls = runner.calls.lock().unwrap().clone();
    assert!(calls.iter().any(|c| c == "modprobe -r brcmfmac"));
    assert!(!calls.iter().any(|c| c == "modprobe brcmfmac"));

    let snapshot = guard.snapshot();
    assert_eq!(snapshot.state, RecoveryState::CoolingDown);
    assert_eq!(snapshot.failure_count, 1);
}

/// After a shutdown request no entry point starts anything
#[tokio::test]
async fn test_no_work_after_shutdown() {
    let h = Harness::healthy(blind_logs());
    let watchdog = h.watchdog();
    watchdog.on_shutdown_requested();

    assert!(matches!(
        watchdog.on_periodic_check().await,
        CheckOutcome::ShuttingDown
    ));
    assert!(matches!(
        watchdog.on_external_fault_event(HOP_STUCK_LINE).await,
        Some(CheckOutcome::ShuttingDown)
    ));
    assert!(matches!(
        watchdog.force_recovery().await,
        CheckOutcome::ShuttingDown
    ));
    assert!(matches!(watchdog.on_startup().await, CheckOutcome::ShuttingDown));

    assert!(h.commands().calls().is_empty());
    assert!(h.scanner.calls().is_empty());
    assert!(h.sink.messages().is_empty());
    assert_eq!(watchdog.interface_phase(), InterfacePhase::Loaded);
    assert_eq!(watchdog.guard().snapshot().failure_count, 0);
}
