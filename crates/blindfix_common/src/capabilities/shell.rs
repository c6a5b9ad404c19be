//! Shell command execution

use super::CommandRunner;
use crate::error::RecoveryError;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Runs commands through `sh -c` so `&&` chains and pipes work.
#[derive(Debug, Clone)]
pub struct ShellCommandRunner {
    timeout: Duration,
}

impl ShellCommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(&self, command: &str) -> Result<String, RecoveryError> {
        if command.trim().is_empty() {
            return Err(RecoveryError::command_failed(command, "empty command"));
        }

        debug!("Executing: {}", command);

        // On timeout we stop waiting; the child is left to finish on its own.
        let output = timeout(
            self.timeout,
            Command::new("sh")
                .arg("-c")
                .arg(command)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output(),
        )
        .await
        .map_err(|_| {
            RecoveryError::command_failed(command, format!("timed out after {:?}", self.timeout))
        })?
        .map_err(|e| RecoveryError::command_failed(command, e.to_string()))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let detail = match output.status.code() {
                Some(code) if stderr.is_empty() => format!("exit status {}", code),
                Some(code) => format!("exit status {}: {}", code, stderr),
                None => format!("terminated by signal: {}", stderr),
            };
            Err(RecoveryError::command_failed(command, detail))
        }
    }
}
