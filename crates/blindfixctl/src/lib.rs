//! blindfixctl - operator CLI for the blind-bug watchdog

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
