//! Fault signatures
//!
//! Declarative table of the log patterns that indicate the radio went
//! blind. Adding a fault type means adding a row, not a branch.

use crate::config::SignatureConfig;
use crate::error::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a signature's lines come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    /// Kernel ring buffer (`journalctl -k`)
    Kernel,
    /// Whole system journal
    System,
}

impl LogSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogSource::Kernel => "kernel",
            LogSource::System => "system",
        }
    }
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Known driver faults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Firmware refuses channel changes; the interface is effectively dead
    ChannelSetFailure,
    /// The scanner keeps failing to hop channels
    ChannelHopStuck,
}

impl FaultKind {
    pub fn label(&self) -> &'static str {
        match self {
            FaultKind::ChannelSetFailure => "channel-set failure",
            FaultKind::ChannelHopStuck => "channel-hop stuck",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One row of the signature table
#[derive(Debug, Clone)]
pub struct FaultSignature {
    pub kind: FaultKind,
    pub source: LogSource,
    /// Minimum matching lines within the window
    pub threshold: usize,
    /// Higher wins when several signatures fire in one check
    pub priority: u8,
    pattern: Regex,
}

impl FaultSignature {
    pub fn new(
        kind: FaultKind,
        source: LogSource,
        pattern: &str,
        threshold: usize,
        priority: u8,
    ) -> Result<Self, ConfigError> {
        let pattern = Regex::new(pattern).map_err(|e| ConfigError::Pattern {
            signature: kind.label().to_string(),
            detail: e.to_string(),
        })?;
        Ok(Self {
            kind,
            source,
            threshold,
            priority,
            pattern,
        })
    }

    pub fn matches(&self, line: &str) -> bool {
        self.pattern.is_match(line)
    }

    /// Number of lines containing the pattern
    pub fn count_matches<S: AsRef<str>>(&self, lines: &[S]) -> usize {
        lines.iter().filter(|l| self.matches(l.as_ref())).count()
    }

    pub fn fires(&self, lines: &[String]) -> bool {
        self.count_matches(lines) >= self.threshold
    }
}

/// Build the signature table, highest priority first
pub fn signature_table(config: &SignatureConfig) -> Result<Vec<FaultSignature>, ConfigError> {
    let mut table = vec![
        FaultSignature::new(
            FaultKind::ChannelSetFailure,
            LogSource::Kernel,
            &config.channel_set_pattern,
            config.channel_set_threshold,
            2,
        )?,
        FaultSignature::new(
            FaultKind::ChannelHopStuck,
            LogSource::System,
            &config.hop_stuck_pattern,
            config.hop_stuck_threshold,
            1,
        )?,
    ];
    table.sort_by(|a, b| b.priority.cmp(&a.priority));
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SET_CHANNEL_LINE: &str = "kernel: brcmfmac: brcmf_cfg80211_nexmon_set_channel: \
                                    Set Channel failed: chspec=1234";

    #[test]
    fn test_default_table_order() {
        let table = signature_table(&SignatureConfig::default()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table[0].kind, FaultKind::ChannelSetFailure);
        assert_eq!(table[0].source, LogSource::Kernel);
        assert_eq!(table[0].threshold, 3);
        assert_eq!(table[1].kind, FaultKind::ChannelHopStuck);
        assert_eq!(table[1].threshold, 5);
    }

    #[test]
    fn test_channel_set_pattern_tolerates_intervening_text() {
        let table = signature_table(&SignatureConfig::default()).unwrap();
        let sig = &table[0];
        assert!(sig.matches(SET_CHANNEL_LINE));
        assert!(sig.matches("brcmf_cfg80211_nexmon_set_channel anything at all Set Channel failed"));
        // order matters
        assert!(!sig.matches("Set Channel failed in brcmf_cfg80211_nexmon_set_channel"));
        assert!(!sig.matches("brcmf_cfg80211_nexmon_set_channel: ok"));
    }

    #[test]
    fn test_count_matches_counts_lines() {
        let table = signature_table(&SignatureConfig::default()).unwrap();
        let hop = &table[1];
        let lines = vec![
            "bettercap: wifi error while hopping to channel 6".to_string(),
            "unrelated".to_string(),
            "bettercap: wifi error while hopping to channel 11".to_string(),
        ];
        assert_eq!(hop.count_matches(&lines), 2);
        assert!(!hop.fires(&lines));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let config = SignatureConfig {
            channel_set_pattern: "(unclosed".to_string(),
            ..SignatureConfig::default()
        };
        let err = signature_table(&config).unwrap_err();
        assert!(matches!(err, ConfigError::Pattern { .. }));
    }
}
