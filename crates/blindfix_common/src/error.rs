//! Error types for the blind-bug watchdog.
//!
//! Recovery errors never escape to the daemon's event loop: every step
//! catches them at its boundary and folds them into the retry decision.

use crate::signatures::LogSource;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecoveryError {
    #[error("{log} log unavailable: {detail}")]
    LogUnavailable { log: LogSource, detail: String },

    #[error("command `{command}` failed: {detail}")]
    CommandFailed { command: String, detail: String },

    #[error("radio hardware not enumerated: {0}")]
    HardwareEnumerationUnavailable(String),

    #[error("scanner rejected `{command}`: {detail}")]
    ScanRejected { command: String, detail: String },

    #[error("recovery gave up after {cycles} cycles")]
    RetriesExhausted { cycles: u32 },

    #[error("shutdown requested")]
    ShutdownRequested,
}

impl RecoveryError {
    pub fn command_failed(command: &str, detail: impl Into<String>) -> Self {
        RecoveryError::CommandFailed {
            command: command.to_string(),
            detail: detail.into(),
        }
    }

    /// Short machine-friendly name, used in structured log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            RecoveryError::LogUnavailable { .. } => "log_unavailable",
            RecoveryError::CommandFailed { .. } => "command_failed",
            RecoveryError::HardwareEnumerationUnavailable(_) => "hardware_enumeration_unavailable",
            RecoveryError::ScanRejected { .. } => "scan_rejected",
            RecoveryError::RetriesExhausted { .. } => "retries_exhausted",
            RecoveryError::ShutdownRequested => "shutdown_requested",
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid pattern for {signature}: {detail}")]
    Pattern { signature: String, detail: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = RecoveryError::command_failed("modprobe -r brcmfmac", "module in use");
        assert_eq!(
            err.to_string(),
            "command `modprobe -r brcmfmac` failed: module in use"
        );
        assert_eq!(err.kind(), "command_failed");

        let err = RecoveryError::LogUnavailable {
            log: LogSource::Kernel,
            detail: "journalctl missing".to_string(),
        };
        assert_eq!(err.to_string(), "kernel log unavailable: journalctl missing");
    }
}
