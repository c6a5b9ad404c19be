//! Episode guard
//!
//! Exclusive-access token for the driver module and the monitor interface.
//! All transitions happen inside one mutex; the lock is never held across
//! an await point.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryState {
    Idle,
    InProgress,
    CoolingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeOutcome {
    Success,
    Failure,
}

/// Guard timings
#[derive(Debug, Clone, Copy)]
pub struct GuardPolicy {
    /// An `InProgress` flag older than this may be overridden
    pub stale_after: Duration,
    /// Detection stays closed this long after a successful episode
    pub success_cooldown: Duration,
    /// A failed episode backdates the last attempt by this much
    pub failure_rewind: Duration,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            stale_after: Duration::seconds(180),
            success_cooldown: Duration::seconds(120),
            failure_rewind: Duration::seconds(300),
        }
    }
}

/// Proof of a successful `try_enter`; only the current holder may exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "the ticket is needed to release the guard"]
pub struct EpisodeTicket {
    generation: u64,
}

impl EpisodeTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Point-in-time copy of the guard, for status reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardSnapshot {
    pub state: RecoveryState,
    pub last_attempt: Option<DateTime<Utc>>,
    pub success_count: u64,
    pub failure_count: u64,
}

#[derive(Debug)]
struct GuardInner {
    state: RecoveryState,
    last_attempt: Option<DateTime<Utc>>,
    success_count: u64,
    failure_count: u64,
    /// Bumped by every admitted episode
    generation: u64,
}

#[derive(Debug)]
pub struct EpisodeGuard {
    policy: GuardPolicy,
    inner: Mutex<GuardInner>,
}

impl EpisodeGuard {
    pub fn new(policy: GuardPolicy) -> Self {
        Self {
            policy,
            inner: Mutex::new(GuardInner {
                state: RecoveryState::Idle,
                last_attempt: None,
                success_count: 0,
                failure_count: 0,
                generation: 0,
            }),
        }
    }

    pub fn policy(&self) -> GuardPolicy {
        self.policy
    }

    fn lock(&self) -> MutexGuard<'_, GuardInner> {
        // a panic elsewhere must not wedge recovery forever
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the interface for a new episode.
    ///
    /// Succeeds unless an episode is in progress and younger than
    /// `stale_after`. An older in-progress flag is treated as left over
    /// from a dead attempt and overridden; the overridden episode's ticket
    /// stops being current.
    pub fn try_enter(&self, now: DateTime<Utc>) -> Option<EpisodeTicket> {
        let mut inner = self.lock();

        if inner.state == RecoveryState::InProgress {
            let stale = inner
                .last_attempt
                .map_or(true, |last| now - last > self.policy.stale_after);
            if !stale {
                info!("Duplicate recovery attempt ignored");
                return None;
            }
            warn!(
                last_attempt = ?inner.last_attempt,
                "Overriding stale in-progress recovery"
            );
        }

        inner.state = RecoveryState::InProgress;
        inner.last_attempt = Some(now);
        inner.generation += 1;
        Some(EpisodeTicket {
            generation: inner.generation,
        })
    }

    /// Release the interface after an episode. A ticket that was overridden
    /// as stale changes nothing; returns whether the release took effect.
    pub fn exit(
        &self,
        ticket: EpisodeTicket,
        outcome: EpisodeOutcome,
        now: DateTime<Utc>,
    ) -> bool {
        let mut inner = self.lock();
        if inner.state != RecoveryState::InProgress || ticket.generation != inner.generation {
            warn!(
                ticket = ticket.generation,
                current = inner.generation,
                ?outcome,
                "Ignoring exit from an overridden episode"
            );
            return false;
        }

        inner.state = RecoveryState::CoolingDown;
        match outcome {
            EpisodeOutcome::Success => {
                inner.last_attempt = Some(now);
                inner.success_count += 1;
            }
            EpisodeOutcome::Failure => {
                // retry soon after a failure instead of waiting out the cooldown
                inner.last_attempt = Some(
                    now.checked_sub_signed(self.policy.failure_rewind)
                        .unwrap_or(DateTime::<Utc>::MIN_UTC),
                );
                inner.failure_count += 1;
            }
        }
        debug!(?outcome, success_count = inner.success_count, "Episode guard released");
        true
    }

    /// Whether a periodic check may look for faults at all. Read-only.
    pub fn detection_allowed(&self, now: DateTime<Utc>) -> bool {
        let inner = self.lock();
        let since = |window: Duration| inner.last_attempt.map_or(true, |last| now - last > window);
        match inner.state {
            RecoveryState::Idle => true,
            RecoveryState::CoolingDown => since(self.policy.success_cooldown),
            RecoveryState::InProgress => since(self.policy.stale_after),
        }
    }

    pub fn is_busy(&self, now: DateTime<Utc>) -> bool {
        let inner = self.lock();
        inner.state == RecoveryState::InProgress
            && inner
                .last_attempt
                .map_or(false, |last| now - last <= self.policy.stale_after)
    }

    pub fn snapshot(&self) -> GuardSnapshot {
        let inner = self.lock();
        GuardSnapshot {
            state: inner.state,
            last_attempt: inner.last_attempt,
            success_count: inner.success_count,
            failure_count: inner.failure_count,
        }
    }
}

impl Default for EpisodeGuard {
    fn default() -> Self {
        Self::new(GuardPolicy::default())
    }
}
