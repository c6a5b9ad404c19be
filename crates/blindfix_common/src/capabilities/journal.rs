//! systemd journal access via journalctl

use super::LogReader;
use crate::error::RecoveryError;
use crate::signatures::LogSource;
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

#[derive(Debug, Clone)]
pub struct JournalReader {
    timeout: Duration,
}

impl JournalReader {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// journalctl arguments for the last `count` lines of a source
    pub fn args(source: LogSource, count: usize) -> Vec<String> {
        let mut args = vec![format!("-n{}", count), "--no-pager".to_string(), "-q".to_string()];
        if source == LogSource::Kernel {
            args.push("-k".to_string());
        }
        args
    }
}

impl Default for JournalReader {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl LogReader for JournalReader {
    async fn recent_lines(
        &self,
        source: LogSource,
        count: usize,
    ) -> Result<Vec<String>, RecoveryError> {
        let unavailable = |detail: String| RecoveryError::LogUnavailable { log: source, detail };

        let output = timeout(
            self.timeout,
            Command::new("journalctl")
                .args(Self::args(source, count))
                .output(),
        )
        .await
        .map_err(|_| unavailable("journalctl timed out".to_string()))?
        .map_err(|e| unavailable(format!("failed to run journalctl: {}", e)))?;

        if !output.status.success() {
            return Err(unavailable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let lines: Vec<String> = stdout.lines().map(str::to_string).collect();
        let skip = lines.len().saturating_sub(count);
        Ok(lines.into_iter().skip(skip).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_args() {
        assert_eq!(
            JournalReader::args(LogSource::Kernel, 10),
            vec!["-n10", "--no-pager", "-q", "-k"]
        );
    }

    #[test]
    fn test_system_args() {
        assert_eq!(
            JournalReader::args(LogSource::System, 25),
            vec!["-n25", "--no-pager", "-q"]
        );
    }
}
