//! Configuration management for blindfix.
//!
//! Loads settings from /etc/blindfix/config.toml or uses defaults.
//! Every field is optional in the file; missing values fall back to the
//! timings the watchdog has always used on the Pi Zero W.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/blindfix/config.toml";

/// Fallback config file path
pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/blindfix/config.toml";

/// Environment override for the config file location
pub const CONFIG_ENV: &str = "BLINDFIX_CONFIG";

/// Upper bound for every configured duration and delay
pub const MAX_DURATION_SECS: u64 = 86_400;

/// Watchdog core settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Monitor-mode interface managed by the watchdog
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Kernel module that gets unloaded and reloaded
    #[serde(default = "default_driver")]
    pub driver: String,

    /// Seconds between periodic log checks
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Number of recent log lines inspected per source
    #[serde(default = "default_window_lines")]
    pub window_lines: usize,

    /// Unload/reload/recreate/verify cycles per episode
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u32,

    /// An in-progress episode older than this is presumed dead
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    /// Quiet period after a successful episode before checks resume
    #[serde(default = "default_success_cooldown")]
    pub success_cooldown_secs: u64,

    /// How far the last-attempt stamp is rewound after a failed episode
    #[serde(default = "default_failure_rewind")]
    pub failure_rewind_secs: u64,

    /// Per-command timeout for shell steps
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Follow the system journal for fault lines between checks
    #[serde(default = "default_follow_journal")]
    pub follow_journal: bool,
}

fn default_interface() -> String {
    "mon0".to_string()
}

fn default_driver() -> String {
    "brcmfmac".to_string()
}

fn default_check_interval() -> u64 {
    30
}

fn default_window_lines() -> usize {
    10
}

fn default_max_cycles() -> u32 {
    3
}

fn default_stale_after() -> u64 {
    180
}

fn default_success_cooldown() -> u64 {
    120
}

fn default_failure_rewind() -> u64 {
    300
}

fn default_command_timeout() -> u64 {
    30
}

fn default_follow_journal() -> bool {
    true
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            driver: default_driver(),
            check_interval_secs: default_check_interval(),
            window_lines: default_window_lines(),
            max_cycles: default_max_cycles(),
            stale_after_secs: default_stale_after(),
            success_cooldown_secs: default_success_cooldown(),
            failure_rewind_secs: default_failure_rewind(),
            command_timeout_secs: default_command_timeout(),
            follow_journal: default_follow_journal(),
        }
    }
}

/// A settle delay: `base_secs + per_cycle_secs * cycle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delay {
    pub base_secs: u64,
    #[serde(default)]
    pub per_cycle_secs: u64,
}

impl Delay {
    pub const fn new(base_secs: u64, per_cycle_secs: u64) -> Self {
        Self {
            base_secs,
            per_cycle_secs,
        }
    }

    /// Delay for a zero-based cycle index
    pub fn for_cycle(&self, cycle: u32) -> Duration {
        let scaled = self.per_cycle_secs.saturating_mul(u64::from(cycle));
        Duration::from_secs(self.base_secs.saturating_add(scaled))
    }
}

/// Named settle points of the recovery procedure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayConfig {
    /// After scanning was paused
    #[serde(default = "default_after_stop")]
    pub after_stop: Delay,

    /// Between driver unload and reload
    #[serde(default = "default_after_unload")]
    pub after_unload: Delay,

    /// After reload, while the radio re-initialises
    #[serde(default = "default_after_reload")]
    pub after_reload: Delay,

    /// After the monitor interface came up
    #[serde(default = "default_after_recreate")]
    pub after_recreate: Delay,

    /// After the scanner accepted the new interface
    #[serde(default = "default_after_verify")]
    pub after_verify: Delay,

    /// Before scanning is re-enabled; scaled by cycles used
    #[serde(default = "default_before_resume")]
    pub before_resume: Delay,
}

fn default_after_stop() -> Delay {
    Delay::new(2, 0)
}

fn default_after_unload() -> Delay {
    Delay::new(1, 1)
}

fn default_after_reload() -> Delay {
    Delay::new(10, 4)
}

fn default_after_recreate() -> Delay {
    Delay::new(5, 1)
}

fn default_after_verify() -> Delay {
    Delay::new(1, 0)
}

fn default_before_resume() -> Delay {
    Delay::new(8, 2)
}

impl DelayConfig {
    fn named(&self) -> [(&'static str, Delay); 6] {
        [
            ("after_stop", self.after_stop),
            ("after_unload", self.after_unload),
            ("after_reload", self.after_reload),
            ("after_recreate", self.after_recreate),
            ("after_verify", self.after_verify),
            ("before_resume", self.before_resume),
        ]
    }
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            after_stop: default_after_stop(),
            after_unload: default_after_unload(),
            after_reload: default_after_reload(),
            after_recreate: default_after_recreate(),
            after_verify: default_after_verify(),
            before_resume: default_before_resume(),
        }
    }
}

/// Fault signature overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureConfig {
    #[serde(default = "default_channel_set_pattern")]
    pub channel_set_pattern: String,

    #[serde(default = "default_channel_set_threshold")]
    pub channel_set_threshold: usize,

    #[serde(default = "default_hop_stuck_pattern")]
    pub hop_stuck_pattern: String,

    #[serde(default = "default_hop_stuck_threshold")]
    pub hop_stuck_threshold: usize,
}

fn default_channel_set_pattern() -> String {
    r"brcmf_cfg80211_nexmon_set_channel.*?Set Channel failed".to_string()
}

fn default_channel_set_threshold() -> usize {
    3
}

fn default_hop_stuck_pattern() -> String {
    r"wifi error while hopping to channel".to_string()
}

fn default_hop_stuck_threshold() -> usize {
    5
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            channel_set_pattern: default_channel_set_pattern(),
            channel_set_threshold: default_channel_set_threshold(),
            hop_stuck_pattern: default_hop_stuck_pattern(),
            hop_stuck_threshold: default_hop_stuck_threshold(),
        }
    }
}

/// bettercap REST API used to drive wifi.recon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_scanner_url")]
    pub url: String,

    #[serde(default = "default_scanner_user")]
    pub username: String,

    #[serde(default = "default_scanner_password")]
    pub password: String,

    #[serde(default = "default_scanner_timeout")]
    pub timeout_secs: u64,
}

fn default_scanner_url() -> String {
    "http://127.0.0.1:8081".to_string()
}

fn default_scanner_user() -> String {
    "pwnagotchi".to_string()
}

fn default_scanner_password() -> String {
    "pwnagotchi".to_string()
}

fn default_scanner_timeout() -> u64 {
    10
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            url: default_scanner_url(),
            username: default_scanner_user(),
            password: default_scanner_password(),
            timeout_secs: default_scanner_timeout(),
        }
    }
}

/// What a "channel-hop stuck" detection does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HopStuckRemedy {
    /// Full recovery episode (driver reload)
    #[default]
    ReloadDriver,
    /// Only toggle scanning off and on again
    RestartScan,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RemedyConfig {
    #[serde(default)]
    pub hop_stuck: HopStuckRemedy,
}

/// Status snapshot persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_status_enabled")]
    pub enabled: bool,

    #[serde(default = "default_status_path")]
    pub path: PathBuf,
}

fn default_status_enabled() -> bool {
    true
}

fn default_status_path() -> PathBuf {
    PathBuf::from("/run/blindfix/status.json")
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: default_status_enabled(),
            path: default_status_path(),
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub watchdog: WatchdogConfig,

    #[serde(default)]
    pub delays: DelayConfig,

    #[serde(default)]
    pub signatures: SignatureConfig,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub remedy: RemedyConfig,

    #[serde(default)]
    pub status: StatusConfig,
}

impl Config {
    /// Load config: $BLINDFIX_CONFIG, then the system paths, then defaults
    pub fn load() -> Self {
        let candidates: Vec<PathBuf> = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .into_iter()
            .chain([PathBuf::from(CONFIG_PATH), PathBuf::from(DEFAULT_CONFIG_PATH)])
            .collect();

        for path in &candidates {
            if !path.exists() {
                continue;
            }
            match Self::load_from_path(path) {
                Ok(config) => return config,
                Err(e) => warn!("Ignoring config {}: {}", path.display(), e),
            }
        }

        warn!("Config not found, using defaults");
        Config::default()
    }

    /// Load and validate config from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Reject values that would make the watchdog misbehave
    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.watchdog;
        if w.interface.trim().is_empty() {
            return Err(ConfigError::Invalid("watchdog.interface is empty".into()));
        }
        if w.driver.trim().is_empty() {
            return Err(ConfigError::Invalid("watchdog.driver is empty".into()));
        }
        if w.window_lines == 0 {
            return Err(ConfigError::Invalid("watchdog.window_lines must be > 0".into()));
        }
        if w.max_cycles == 0 {
            return Err(ConfigError::Invalid("watchdog.max_cycles must be > 0".into()));
        }
        if w.check_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "watchdog.check_interval_secs must be > 0".into(),
            ));
        }
        if self.signatures.channel_set_threshold == 0 || self.signatures.hop_stuck_threshold == 0
        {
            return Err(ConfigError::Invalid("signature thresholds must be > 0".into()));
        }

        let durations = [
            ("watchdog.check_interval_secs", w.check_interval_secs),
            ("watchdog.stale_after_secs", w.stale_after_secs),
            ("watchdog.success_cooldown_secs", w.success_cooldown_secs),
            ("watchdog.failure_rewind_secs", w.failure_rewind_secs),
            ("watchdog.command_timeout_secs", w.command_timeout_secs),
            ("scanner.timeout_secs", self.scanner.timeout_secs),
        ];
        for (name, value) in durations {
            check_bound(name, value)?;
        }
        for (name, delay) in self.delays.named() {
            check_bound(&format!("delays.{}.base_secs", name), delay.base_secs)?;
            check_bound(&format!("delays.{}.per_cycle_secs", name), delay.per_cycle_secs)?;
        }
        Ok(())
    }

    /// Render the effective config as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

fn check_bound(name: &str, value: u64) -> Result<(), ConfigError> {
    if value > MAX_DURATION_SECS {
        return Err(ConfigError::Invalid(format!(
            "{} must be at most {} seconds",
            name, MAX_DURATION_SECS
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.watchdog.interface, "mon0");
        assert_eq!(config.watchdog.driver, "brcmfmac");
        assert_eq!(config.watchdog.window_lines, 10);
        assert_eq!(config.watchdog.max_cycles, 3);
        assert_eq!(config.watchdog.stale_after_secs, 180);
        assert_eq!(config.remedy.hop_stuck, HopStuckRemedy::ReloadDriver);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_delay_scales_with_cycle() {
        let delays = DelayConfig::default();
        assert_eq!(delays.after_unload.for_cycle(0), Duration::from_secs(1));
        assert_eq!(delays.after_unload.for_cycle(2), Duration::from_secs(3));
        assert_eq!(delays.after_reload.for_cycle(1), Duration::from_secs(14));
        assert_eq!(delays.before_resume.for_cycle(3), Duration::from_secs(14));
    }

    #[test]
    fn test_parse_toml_with_defaults() {
        let toml_str = r#"
[watchdog]
interface = "wlan0mon"
max_cycles = 5

[delays]
after_reload = { base_secs = 20 }

[remedy]
hop_stuck = "restart_scan"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.watchdog.interface, "wlan0mon");
        assert_eq!(config.watchdog.max_cycles, 5);
        assert_eq!(config.watchdog.driver, "brcmfmac");
        assert_eq!(config.delays.after_reload, Delay::new(20, 0));
        assert_eq!(config.delays.after_unload, Delay::new(1, 1));
        assert_eq!(config.remedy.hop_stuck, HopStuckRemedy::RestartScan);
        assert_eq!(config.signatures.channel_set_threshold, 3);
    }

    #[test]
    fn test_validate_rejects_zero_cycles() {
        let mut config = Config::default();
        config.watchdog.max_cycles = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_bounds_durations() {
        let mut config = Config::default();
        config.watchdog.stale_after_secs = 100_000_000_000_000_000;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.watchdog.failure_rewind_secs = 1_000_000_000_000_000;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.delays.after_reload = Delay::new(10, u64::MAX);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("delays.after_reload.per_cycle_secs"));

        let mut config = Config::default();
        config.watchdog.stale_after_secs = MAX_DURATION_SECS;
        config.delays.before_resume = Delay::new(MAX_DURATION_SECS, MAX_DURATION_SECS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_delay_saturates() {
        let delay = Delay::new(u64::MAX, u64::MAX);
        assert_eq!(delay.for_cycle(3), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scanner]\nurl = \"http://10.0.0.2:8081\"").unwrap();

        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.scanner.url, "http://10.0.0.2:8081");
        assert_eq!(config.scanner.username, "pwnagotchi");
    }

    #[test]
    fn test_effective_config_renders() {
        let rendered = Config::default().to_toml().unwrap();
        assert!(rendered.contains("[watchdog]"));
        assert!(rendered.contains("interface = \"mon0\""));
    }
}
