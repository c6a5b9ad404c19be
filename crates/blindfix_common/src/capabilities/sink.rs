//! Status sinks

use super::{Mood, StatusSink};
use tracing::info;

/// Writes status messages to the log. Used when no display is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn notify(&self, text: &str, mood: Mood) -> anyhow::Result<()> {
        info!(?mood, "status: {}", text);
        Ok(())
    }
}
