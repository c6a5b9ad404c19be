//! Journal follower
//!
//! Tails the system journal and hands every line that carries the
//! channel-hop fault to the watchdog, each on its own task so a running
//! episode never stalls the reader.

use anyhow::{Context, Result};
use blindfix_common::Watchdog;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

pub const FOLLOW_ARGS: [&str; 6] = ["-f", "-n0", "-q", "--no-pager", "-o", "cat"];

/// Pause before journalctl is started again after it exits
const RESTART_DELAY: Duration = Duration::from_secs(5);

/// Forward lines accepted by `filter` until EOF or until the receiver is gone.
/// Returns how many lines were forwarded.
pub async fn forward_lines<R, F>(reader: R, filter: F, tx: &mpsc::Sender<String>) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    F: Fn(&str) -> bool,
{
    let mut lines = reader.lines();
    let mut forwarded = 0;

    while let Some(line) = lines.next_line().await.context("Failed to read log line")? {
        if !filter(&line) {
            continue;
        }
        if tx.send(line).await.is_err() {
            debug!("Event receiver closed");
            break;
        }
        forwarded += 1;
    }

    Ok(forwarded)
}

/// Feed fault lines to the watchdog until the sender side is dropped, then
/// wait for the events still being handled.
pub async fn dispatch(watchdog: Arc<Watchdog>, mut rx: mpsc::Receiver<String>) {
    let mut handlers = JoinSet::new();

    loop {
        tokio::select! {
            line = rx.recv() => {
                let Some(line) = line else { break };
                let watchdog = Arc::clone(&watchdog);
                handlers.spawn(async move {
                    if let Some(outcome) = watchdog.on_external_fault_event(&line).await {
                        info!("Log event handled: {}", outcome.summary());
                    }
                });
            }
            Some(_) = handlers.join_next(), if !handlers.is_empty() => {}
        }
    }

    while handlers.join_next().await.is_some() {}
}

async fn follow_once(watchdog: &Arc<Watchdog>, tx: &mpsc::Sender<String>) -> Result<usize> {
    let mut child = Command::new("journalctl")
        .args(FOLLOW_ARGS)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .context("Failed to spawn journalctl")?;

    let stdout = child
        .stdout
        .take()
        .context("journalctl stdout not captured")?;

    let filter_watchdog = Arc::clone(watchdog);
    let forwarded = forward_lines(
        BufReader::new(stdout),
        move |line| filter_watchdog.is_external_fault(line),
        tx,
    )
    .await?;

    let status = child.wait().await.context("Failed to wait for journalctl")?;
    debug!("journalctl exited with {}", status);
    Ok(forwarded)
}

/// Start the follower and its dispatcher. journalctl is not restarted after
/// a shutdown request; aborting the returned handle kills the running one.
pub fn spawn_follower(watchdog: Arc<Watchdog>) -> JoinHandle<()> {
    let (tx, rx) = mpsc::channel(32);
    let dispatcher = tokio::spawn(dispatch(Arc::clone(&watchdog), rx));

    tokio::spawn(async move {
        info!("Following system journal");
        while !watchdog.shutdown_requested() {
            match follow_once(&watchdog, &tx).await {
                Ok(n) => warn!("journalctl exited after {} fault line(s), restarting", n),
                Err(e) => warn!("Journal follower failed: {:#}", e),
            }
            tokio::time::sleep(RESTART_DELAY).await;
        }

        drop(tx);
        let _ = dispatcher.await;
        debug!("Journal follower stopped");
    })
}
