//! Shared fixtures for the integration suites

#![allow(dead_code)]

use blindfix_common::capabilities::fakes::{
    FakeCommandRunner, FakeLogReader, FakeScanControl, RecordingStatusSink,
};
use blindfix_common::capabilities::Capabilities;
use blindfix_common::timing::{ManualClock, RecordingSleeper};
use blindfix_common::{Config, Watchdog};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

pub const CHANNEL_SET_LINE: &str =
    "kernel: brcmfmac: brcmf_cfg80211_nexmon_set_channel: Set Channel failed: chspec=4102";
pub const HOP_STUCK_LINE: &str =
    "bettercap[812]: [wifi.recon] wifi error while hopping to channel 11: 255";

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub fn quiet_config() -> Config {
    let mut config = Config::default();
    config.status.enabled = false;
    config
}

/// Fakes plus a manual clock the sleeper advances
pub struct Harness {
    pub commands: Arc<FakeCommandRunner>,
    pub logs: Arc<FakeLogReader>,
    pub scanner: Arc<FakeScanControl>,
    pub sink: Arc<RecordingStatusSink>,
    pub clock: Arc<ManualClock>,
    pub sleeper: Arc<RecordingSleeper>,
}

impl Harness {
    pub fn new(commands: FakeCommandRunner, logs: FakeLogReader, scanner: FakeScanControl) -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        Self {
            commands: Arc::new(commands),
            logs: Arc::new(logs),
            scanner: Arc::new(scanner),
            sink: Arc::new(RecordingStatusSink::new()),
            sleeper: Arc::new(RecordingSleeper::with_clock(Arc::clone(&clock))),
            clock,
        }
    }

    pub fn healthy(logs: FakeLogReader) -> Self {
        Self::new(FakeCommandRunner::healthy(), logs, FakeScanControl::new())
    }

    pub fn with_sink(mut self, sink: RecordingStatusSink) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn commands(&self) -> &FakeCommandRunner {
        &self.commands
    }

    pub fn caps(&self) -> Capabilities {
        Capabilities {
            commands: self.commands.clone(),
            logs: self.logs.clone(),
            scanner: self.scanner.clone(),
            status: self.sink.clone(),
            clock: self.clock.clone(),
            sleeper: self.sleeper.clone(),
        }
    }

    pub fn watchdog(&self) -> Watchdog {
        self.watchdog_with(quiet_config())
    }

    pub fn watchdog_with(&self, config: Config) -> Watchdog {
        Watchdog::new(config, self.caps()).unwrap()
    }

    pub fn delay_secs(&self) -> Vec<u64> {
        self.sleeper.delays().iter().map(|d| d.as_secs()).collect()
    }
}

pub fn clean_logs() -> FakeLogReader {
    FakeLogReader::new()
        .with_matches(blindfix_common::LogSource::Kernel, "kernel: usb 1-1: new device", 2)
        .with_matches(blindfix_common::LogSource::System, "systemd[1]: Started session", 2)
}
