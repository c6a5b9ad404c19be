//! Fault detector
//!
//! Pure decision over fresh log snapshots. Nothing is carried between
//! checks, so overlapping windows are never double-counted.

use crate::signatures::{FaultKind, FaultSignature, LogSource};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;

/// Last N lines of one log source, taken at check time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogWindow {
    source: LogSource,
    lines: Vec<String>,
}

impl LogWindow {
    /// Keep only the trailing `capacity` lines
    pub fn new(source: LogSource, mut lines: Vec<String>, capacity: usize) -> Self {
        if lines.len() > capacity {
            lines.drain(..lines.len() - capacity);
        }
        Self { source, lines }
    }

    pub fn source(&self) -> LogSource {
        self.source
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Detector verdict for one check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Detection {
    Clear,
    Fault { kind: FaultKind, matches: usize },
}

impl Detection {
    pub fn fault(&self) -> Option<FaultKind> {
        match self {
            Detection::Clear => None,
            Detection::Fault { kind, .. } => Some(*kind),
        }
    }
}

pub struct Detector {
    /// Sorted by priority, highest first
    signatures: Vec<FaultSignature>,
    window_lines: usize,
}

impl Detector {
    pub fn new(mut signatures: Vec<FaultSignature>, window_lines: usize) -> Self {
        signatures.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self {
            signatures,
            window_lines,
        }
    }

    pub fn window_lines(&self) -> usize {
        self.window_lines
    }

    /// Log sources the table needs, in table order, without duplicates
    pub fn required_sources(&self) -> Vec<LogSource> {
        let mut sources = Vec::new();
        for sig in &self.signatures {
            if !sources.contains(&sig.source) {
                sources.push(sig.source);
            }
        }
        sources
    }

    /// Two-window form: kernel log and system log
    pub fn detect(&self, kernel: &LogWindow, system: &LogWindow) -> Detection {
        self.detect_in(&[kernel, system])
    }

    /// Evaluate every signature against the window of its source. The first
    /// signature (highest priority) that reaches its threshold wins.
    pub fn detect_in<W: Borrow<LogWindow>>(&self, windows: &[W]) -> Detection {
        for sig in &self.signatures {
            let Some(window) = windows
                .iter()
                .map(Borrow::<LogWindow>::borrow)
                .find(|w| w.source() == sig.source)
            else {
                continue;
            };
            let tail = tail(window.lines(), self.window_lines);
            let matches = sig.count_matches(tail);
            if matches >= sig.threshold {
                return Detection::Fault {
                    kind: sig.kind,
                    matches,
                };
            }
        }
        Detection::Clear
    }

    /// Does a single externally delivered line carry the given fault?
    pub fn matches_line(&self, kind: FaultKind, line: &str) -> bool {
        self.signatures
            .iter()
            .any(|sig| sig.kind == kind && sig.matches(line))
    }
}

fn tail(lines: &[String], n: usize) -> &[String] {
    &lines[lines.len().saturating_sub(n)..]
}
