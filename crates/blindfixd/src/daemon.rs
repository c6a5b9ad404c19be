//! Daemon main loop

use crate::{follower, signals};
use anyhow::Result;
use blindfix_common::Watchdog;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// How long shutdown waits for a running episode to reach a step boundary
const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);
const DRAIN_POLL: Duration = Duration::from_millis(250);

pub struct BlindfixDaemon {
    watchdog: Arc<Watchdog>,
}

impl BlindfixDaemon {
    pub fn new(watchdog: Watchdog) -> Self {
        Self {
            watchdog: Arc::new(watchdog),
        }
    }

    pub fn watchdog(&self) -> Arc<Watchdog> {
        Arc::clone(&self.watchdog)
    }

    /// Run until SIGINT/SIGTERM
    pub async fn run(&self) -> Result<()> {
        let config = self.watchdog.config();
        info!(
            interface = %config.watchdog.interface,
            driver = %config.watchdog.driver,
            interval_secs = config.watchdog.check_interval_secs,
            "Starting watchdog"
        );

        let checks = self.spawn_check_scheduler();

        let follower = if config.watchdog.follow_journal {
            Some(follower::spawn_follower(Arc::clone(&self.watchdog)))
        } else {
            info!("Journal follower disabled");
            None
        };

        let signal = signals::wait_for_shutdown().await?;
        info!("{} received", signal);
        self.watchdog.on_shutdown_requested();

        if !self.drain(SHUTDOWN_GRACE).await {
            warn!("Recovery still running after {:?}, exiting anyway", SHUTDOWN_GRACE);
        }
        checks.abort();
        if let Some(follower) = follower {
            // kills the running journalctl
            follower.abort();
        }
        Ok(())
    }

    /// Startup check, then one periodic check per interval. Checks never
    /// overlap; a long episode delays the next tick.
    fn spawn_check_scheduler(&self) -> JoinHandle<()> {
        let watchdog = Arc::clone(&self.watchdog);
        let period = Duration::from_secs(watchdog.config().watchdog.check_interval_secs);

        tokio::spawn(async move {
            let outcome = watchdog.on_startup().await;
            info!("Startup check: {}", outcome.summary());

            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if watchdog.shutdown_requested() {
                    break;
                }
                let outcome = watchdog.on_periodic_check().await;
                debug!("Periodic check: {}", outcome.summary());
            }
        })
    }

    /// Wait for an in-flight episode to stop. `false` on timeout.
    pub async fn drain(&self, grace: Duration) -> bool {
        let waited = tokio::time::timeout(grace, async {
            while self.watchdog.episode_in_flight() {
                tokio::time::sleep(DRAIN_POLL).await;
            }
        })
        .await;
        waited.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blindfix_common::capabilities::fakes::{
        FakeCommandRunner, FakeLogReader, FakeScanControl, RecordingStatusSink,
    };
    use blindfix_common::capabilities::Capabilities;
    use blindfix_common::timing::{Clock, ManualClock, RecordingSleeper};
    use blindfix_common::Config;
    use chrono::Utc;

    fn daemon() -> (BlindfixDaemon, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut config = Config::default();
        config.status.enabled = false;
        let caps = Capabilities {
            commands: Arc::new(FakeCommandRunner::healthy()),
            logs: Arc::new(FakeLogReader::new()),
            scanner: Arc::new(FakeScanControl::new()),
            status: Arc::new(RecordingStatusSink::new()),
            sleeper: Arc::new(RecordingSleeper::with_clock(Arc::clone(&clock))),
            clock: clock.clone(),
        };
        (BlindfixDaemon::new(Watchdog::new(config, caps).unwrap()), clock)
    }

    #[tokio::test]
    async fn test_drain_returns_when_idle() {
        let (daemon, _) = daemon();
        assert!(daemon.drain(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_drain_times_out_while_busy() {
        let (daemon, clock) = daemon();
        assert!(daemon.watchdog().guard().try_enter(clock.now()).is_some());

        assert!(!daemon.drain(Duration::from_millis(50)).await);
    }
}
