//! Fake capabilities for deterministic testing
//!
//! No processes, no journal, no HTTP. Each fake records what it was asked
//! to do so tests can assert on the exact recovery sequence.
//!
//! ```rust,ignore
//! let commands = FakeCommandRunner::healthy()
//!     .failing_times("interface add", 1, "device busy");
//! let scanner = FakeScanControl::new().reject_target_always("no such device");
//! ```

use super::{CommandRunner, LogReader, Mood, ScanAck, ScanControl, StatusSink};
use crate::error::RecoveryError;
use crate::signatures::LogSource;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug, Clone)]
struct FakeRule {
    needle: String,
    reply: Result<String, String>,
    /// None = unlimited
    remaining: Option<usize>,
}

/// Scripted command runner.
///
/// Commands are matched by substring. Rules added later take precedence;
/// a rule with a use count drops out once exhausted. Unmatched commands
/// succeed with empty output.
#[derive(Debug, Default)]
pub struct FakeCommandRunner {
    rules: Mutex<Vec<FakeRule>>,
    calls: Mutex<Vec<String>>,
}

impl FakeCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// A system where every step works and `iw phy` lists one radio
    pub fn healthy() -> Self {
        Self::new()
            .with_output("ip link show", "3: mon0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500\n")
            .with_output("iw phy", "Wiphy phy0\n\tmax # scan SSIDs: 10\n")
    }

    fn push(self, needle: &str, reply: Result<String, String>, remaining: Option<usize>) -> Self {
        lock(&self.rules).push(FakeRule {
            needle: needle.to_string(),
            reply,
            remaining,
        });
        self
    }

    pub fn with_output(self, needle: &str, output: &str) -> Self {
        self.push(needle, Ok(output.to_string()), None)
    }

    pub fn failing(self, needle: &str, error: &str) -> Self {
        self.push(needle, Err(error.to_string()), None)
    }

    /// Fail the next `times` matching commands, then fall through
    pub fn failing_times(self, needle: &str, times: usize, error: &str) -> Self {
        self.push(needle, Err(error.to_string()), Some(times))
    }

    /// Every command executed, in order
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn count_matching(&self, needle: &str) -> usize {
        lock(&self.calls).iter().filter(|c| c.contains(needle)).count()
    }
}

#[async_trait]
impl CommandRunner for FakeCommandRunner {
    async fn run(&self, command: &str) -> Result<String, RecoveryError> {
        lock(&self.calls).push(command.to_string());

        let mut rules = lock(&self.rules);
        let rule = rules
            .iter_mut()
            .rev()
            .find(|r| command.contains(&r.needle) && r.remaining != Some(0));

        match rule {
            Some(rule) => {
                if let Some(n) = rule.remaining.as_mut() {
                    *n -= 1;
                }
                rule.reply
                    .clone()
                    .map_err(|e| RecoveryError::command_failed(command, e))
            }
            None => Ok(String::new()),
        }
    }
}

// ============================================================================
// Logs
// ============================================================================

/// Log reader with fixed contents per source
#[derive(Debug, Default)]
pub struct FakeLogReader {
    sources: Mutex<HashMap<LogSource, Result<Vec<String>, String>>>,
    reads: Mutex<Vec<(LogSource, usize)>>,
}

impl FakeLogReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lines<S: AsRef<str>>(self, source: LogSource, lines: &[S]) -> Self {
        let lines = lines.iter().map(|l| l.as_ref().to_string()).collect();
        lock(&self.sources).insert(source, Ok(lines));
        self
    }

    /// `hits` copies of `line` after some unrelated noise
    pub fn with_matches(self, source: LogSource, line: &str, hits: usize) -> Self {
        let mut lines: Vec<String> = (0..10usize.saturating_sub(hits))
            .map(|i| format!("{} systemd[1]: routine message {}", source, i))
            .collect();
        lines.extend(std::iter::repeat(line.to_string()).take(hits));
        self.with_lines(source, &lines)
    }

    pub fn unavailable(self, source: LogSource, error: &str) -> Self {
        lock(&self.sources).insert(source, Err(error.to_string()));
        self
    }

    pub fn replace_lines<S: AsRef<str>>(&self, source: LogSource, lines: &[S]) {
        let lines = lines.iter().map(|l| l.as_ref().to_string()).collect();
        lock(&self.sources).insert(source, Ok(lines));
    }

    pub fn reads(&self) -> Vec<(LogSource, usize)> {
        lock(&self.reads).clone()
    }
}

#[async_trait]
impl LogReader for FakeLogReader {
    async fn recent_lines(
        &self,
        source: LogSource,
        count: usize,
    ) -> Result<Vec<String>, RecoveryError> {
        lock(&self.reads).push((source, count));
        match lock(&self.sources).get(&source) {
            Some(Ok(lines)) => {
                let skip = lines.len().saturating_sub(count);
                Ok(lines[skip..].to_vec())
            }
            Some(Err(detail)) => Err(RecoveryError::LogUnavailable {
                log: source,
                detail: detail.clone(),
            }),
            None => Ok(Vec::new()),
        }
    }
}

// ============================================================================
// Scanner
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanCall {
    Enabled(bool),
    Target(String),
    Clear,
}

#[derive(Debug, Default)]
struct ScanScript {
    reject_pause: Option<String>,
    reject_resume: Option<String>,
    /// (remaining, detail); None remaining = always
    reject_target: Option<(Option<usize>, String)>,
}

/// Scanner that accepts everything unless told otherwise
#[derive(Debug, Default)]
pub struct FakeScanControl {
    script: Mutex<ScanScript>,
    calls: Mutex<Vec<ScanCall>>,
}

impl FakeScanControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_pause(self, detail: &str) -> Self {
        lock(&self.script).reject_pause = Some(detail.to_string());
        self
    }

    pub fn reject_resume(self, detail: &str) -> Self {
        lock(&self.script).reject_resume = Some(detail.to_string());
        self
    }

    pub fn reject_target_always(self, detail: &str) -> Self {
        lock(&self.script).reject_target = Some((None, detail.to_string()));
        self
    }

    pub fn reject_target_times(self, times: usize, detail: &str) -> Self {
        lock(&self.script).reject_target = Some((Some(times), detail.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<ScanCall> {
        lock(&self.calls).clone()
    }

    /// Scanning state implied by the last enable/disable call
    pub fn scanning_enabled(&self) -> Option<bool> {
        lock(&self.calls).iter().rev().find_map(|c| match c {
            ScanCall::Enabled(on) => Some(*on),
            _ => None,
        })
    }
}

#[async_trait]
impl ScanControl for FakeScanControl {
    async fn set_scanning_enabled(&self, enabled: bool) -> ScanAck {
        lock(&self.calls).push(ScanCall::Enabled(enabled));
        let script = lock(&self.script);
        let rejection = if enabled {
            &script.reject_resume
        } else {
            &script.reject_pause
        };
        match rejection {
            Some(detail) => ScanAck::rejected(detail.clone()),
            None => ScanAck::ok(""),
        }
    }

    async fn set_scan_target_interface(&self, name: &str) -> ScanAck {
        lock(&self.calls).push(ScanCall::Target(name.to_string()));
        let mut script = lock(&self.script);
        match script.reject_target.as_mut() {
            Some((None, detail)) => ScanAck::rejected(detail.clone()),
            Some((Some(n), detail)) if *n > 0 => {
                *n -= 1;
                ScanAck::rejected(detail.clone())
            }
            _ => ScanAck::ok(""),
        }
    }

    async fn clear_scan_state(&self) -> ScanAck {
        lock(&self.calls).push(ScanCall::Clear);
        ScanAck::ok("")
    }
}

// ============================================================================
// Status
// ============================================================================

/// Records status messages; can be told to fail every call
#[derive(Debug, Default)]
pub struct RecordingStatusSink {
    messages: Mutex<Vec<(String, Mood)>>,
    broken: bool,
}

impl RecordingStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose display is gone; every notify errors
    pub fn broken() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            broken: true,
        }
    }

    pub fn messages(&self) -> Vec<(String, Mood)> {
        lock(&self.messages).clone()
    }
}

impl StatusSink for RecordingStatusSink {
    fn notify(&self, text: &str, mood: Mood) -> anyhow::Result<()> {
        lock(&self.messages).push((text.to_string(), mood));
        if self.broken {
            anyhow::bail!("display unavailable");
        }
        Ok(())
    }
}
