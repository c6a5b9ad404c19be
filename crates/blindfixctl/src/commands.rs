//! Command implementations

use anyhow::{bail, Context, Result};
use blindfix_common::guard::RecoveryState;
use blindfix_common::{
    Capabilities, CheckOutcome, Config, Detection, EpisodeReport, StatusFile, Watchdog,
    WatchdogStatus,
};
use chrono::{DateTime, Utc};
use owo_colors::OwoColorize;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// Seconds the operator gets to cancel a manual reload
pub const RELOAD_COUNTDOWN_SECS: u64 = 5;

/// `--config` wins; otherwise the usual search order
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(Config::load()),
    }
}

fn system_watchdog(config: Config) -> Result<Watchdog> {
    let caps = Capabilities::system(&config)?;
    Watchdog::new(config, caps).context("Invalid configuration")
}

pub async fn check(config: Config) -> Result<()> {
    let watchdog = system_watchdog(config)?.with_status_file(None);

    match watchdog.detect_now().await? {
        Detection::Clear => println!("{} No fault signature in the recent logs", "✓".green()),
        Detection::Fault { kind, matches } => {
            println!(
                "{} {} ({} matching lines)",
                "✗".red(),
                kind.to_string().bold(),
                matches
            );
            println!("  Run {} to recover now", "blindfixctl reload".cyan());
        }
    }
    Ok(())
}

/// Whether a status snapshot shows an episode that is still running
pub fn recovery_running(status: &WatchdogStatus, now: DateTime<Utc>, stale_after_secs: u64) -> bool {
    status.guard.state == RecoveryState::InProgress
        && status.guard.last_attempt.map_or(false, |last| {
            (now - last).num_seconds() <= i64::try_from(stale_after_secs).unwrap_or(i64::MAX)
        })
}

pub async fn reload(config: Config, yes: bool, force: bool) -> Result<()> {
    let status_file = StatusFile::new(config.status.path.clone());
    if !force {
        if let Some(status) = status_file.load().await.unwrap_or(None) {
            if recovery_running(&status, Utc::now(), config.watchdog.stale_after_secs) {
                bail!("The daemon is recovering {} right now (use --force to override)", status.interface);
            }
        }
    }

    let interface = config.watchdog.interface.clone();
    if !yes {
        countdown(&interface).await?;
    }

    // the daemon owns the status file
    let watchdog = system_watchdog(config)?.with_status_file(None);
    match watchdog.force_recovery().await {
        CheckOutcome::Episode { report } => {
            for line in report_lines(&report) {
                println!("{}", line);
            }
            if !report.succeeded() {
                bail!("{} is still blind", interface);
            }
            println!("{} {} is back", "✓".green(), interface);
            Ok(())
        }
        other => bail!("Reload did not run: {}", other.summary()),
    }
}

async fn countdown(interface: &str) -> Result<()> {
    let mut stdout = std::io::stdout();
    for remaining in (1..=RELOAD_COUNTDOWN_SECS).rev() {
        print!(
            "\rReloading driver and {} in {}s (ctrl-c to cancel) ",
            interface.bold(),
            remaining
        );
        stdout.flush().context("Failed to write to stdout")?;
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    println!();
    Ok(())
}

pub async fn status(config: Config, json: bool) -> Result<()> {
    let file = StatusFile::new(config.status.path.clone());
    let Some(status) = file.load().await? else {
        if json {
            println!("null");
        } else {
            println!(
                "{} No status at {} (daemon not running?)",
                "✗".red(),
                file.path().display()
            );
        }
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("{}", "Blindfix Status".bold());
    println!("{}", "=".repeat(40));
    for line in status_lines(&status, Utc::now()) {
        println!("{}", line);
    }
    if let Some(report) = &status.last_episode {
        println!();
        println!("{}", "Last episode:".bold());
        for line in report_lines(report) {
            println!("  {}", line);
        }
    }
    Ok(())
}

pub fn show_config(config: &Config) -> Result<()> {
    print!("{}", config.to_toml().context("Failed to render config")?);
    Ok(())
}

fn ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().max(0);
    match secs {
        0..=59 => format!("{}s ago", secs),
        60..=3599 => format!("{}m ago", secs / 60),
        _ => format!("{}h ago", secs / 3600),
    }
}

/// Plain-text status body
pub fn status_lines(status: &WatchdogStatus, now: DateTime<Utc>) -> Vec<String> {
    let mut lines = vec![
        format!("Interface:  {} [{}]", status.interface, status.label),
        format!("Guard:      {:?}", status.guard.state),
        format!(
            "Recoveries: {} ok, {} failed",
            status.guard.success_count, status.guard.failure_count
        ),
    ];
    if let Some(last) = status.guard.last_attempt {
        lines.push(format!("Last mark:  {}", ago(last, now)));
    }
    if let Some(check) = &status.last_check {
        lines.push(format!(
            "Last check: {} ({})",
            check.outcome.summary(),
            ago(check.at, now)
        ));
    }
    if status.shutting_down {
        lines.push("Daemon is shutting down".to_string());
    }
    lines.push(format!("Updated:    {}", ago(status.updated_at, now)));
    lines
}

/// Plain-text episode summary
pub fn report_lines(report: &EpisodeReport) -> Vec<String> {
    let mut lines = vec![
        format!("{} ({})", report.id, report.trigger),
        format!(
            "Outcome: {:?} after {} cycle(s) in {}s, final phase {:?}",
            report.outcome,
            report.cycles_attempted,
            report.elapsed().num_seconds(),
            report.final_phase
        ),
    ];
    for failure in &report.failures {
        lines.push(format!(
            "  cycle {} {:?}: {}",
            failure.cycle + 1,
            failure.phase,
            failure.error
        ));
    }
    if !report.scanning_resumed {
        lines.push("Recon was not resumed".to_string());
    }
    lines
}
