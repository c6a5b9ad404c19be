//! blindfixd - blind-bug watchdog daemon
//!
//! Runs the periodic log check and the journal follower around one
//! [`blindfix_common::Watchdog`] instance.

pub mod daemon;
pub mod follower;
pub mod signals;

pub use daemon::BlindfixDaemon;
