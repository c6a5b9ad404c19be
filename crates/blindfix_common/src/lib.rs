//! Blindfix Common - recovery core for the brcmfmac "blind" bug
//!
//! Detects the firmware fault in the journal and brings the monitor
//! interface back by reloading the driver instead of rebooting.

pub mod capabilities;
pub mod config;
pub mod detector;
pub mod error;
pub mod guard;
pub mod orchestrator;
pub mod signatures;
pub mod status;
pub mod timing;
pub mod watchdog;

pub use capabilities::{Capabilities, Mood, ScanAck};
pub use config::Config;
pub use detector::{Detection, Detector, LogWindow};
pub use error::{ConfigError, RecoveryError};
pub use guard::{
    EpisodeGuard, EpisodeOutcome, EpisodeTicket, GuardPolicy, GuardSnapshot, RecoveryState,
};
pub use orchestrator::{EpisodeReport, RecoveryOrchestrator, RecoveryPhase, Trigger};
pub use signatures::{FaultKind, LogSource};
pub use status::{InterfacePhase, StatusFile, WatchdogStatus};
pub use watchdog::{CheckOutcome, Watchdog};
