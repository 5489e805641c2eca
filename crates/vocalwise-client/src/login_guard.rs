//! Client-side login throttle.
//!
//! Failed sign-ins are counted over a trailing window; reaching the threshold
//! locks the login screen for a fixed period. The state lives in the local
//! key-value store so it survives restarts. It is a UX deterrent only, the
//! auth provider enforces its own limits.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use vocalwise_shared::clock::Clock;
use vocalwise_shared::constants::{ATTEMPT_WINDOW_SECS, LOCKOUT_DURATION_SECS, MAX_ATTEMPTS};
use vocalwise_store::{KeyValueStore, LoginAttemptWindow, Result};

/// Thresholds for the login throttle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub max_attempts: usize,
    pub attempt_window: Duration,
    pub lockout_duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            attempt_window: Duration::from_secs(ATTEMPT_WINDOW_SECS as u64),
            lockout_duration: Duration::from_secs(LOCKOUT_DURATION_SECS as u64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Unlocked,
    Locked { remaining: Duration },
}

impl LockStatus {
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }
}

pub struct LoginGuard {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    policy: LockoutPolicy,
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(d.as_millis() as i64)
}

fn remaining_until(end: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (end - now).to_std().unwrap_or(Duration::ZERO)
}

impl LoginGuard {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, policy: LockoutPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    /// Record a failed sign-in. Returns `Locked` when this failure reached
    /// the threshold and the caller should redirect to recovery.
    pub fn record_failure(&self) -> Result<LockStatus> {
        let now = self.clock.now();
        let mut window = LoginAttemptWindow::load(self.store.as_ref())?;
        window.attempt_timestamps.push(now);
        window.prune(now, chrono_duration(self.policy.attempt_window));

        let attempts = window.attempt_timestamps.len();
        let status = if attempts >= self.policy.max_attempts {
            let end = now + chrono_duration(self.policy.lockout_duration);
            window.lockout_end_time = Some(end);
            warn!(attempts, until = %end, "login locked out");
            LockStatus::Locked {
                remaining: self.policy.lockout_duration,
            }
        } else {
            window.lockout_end_time = None;
            debug!(attempts, "failed login recorded");
            LockStatus::Unlocked
        };

        window.save(self.store.as_ref())?;
        Ok(status)
    }

    /// Current lock state. An expired lockout is cleared together with the
    /// attempt history.
    pub fn check_status(&self) -> Result<LockStatus> {
        let window = LoginAttemptWindow::load(self.store.as_ref())?;
        let Some(end) = window.lockout_end_time else {
            return Ok(LockStatus::Unlocked);
        };

        let now = self.clock.now();
        if end > now {
            return Ok(LockStatus::Locked {
                remaining: remaining_until(end, now),
            });
        }

        info!("login lockout expired");
        LoginAttemptWindow::clear(self.store.as_ref())?;
        Ok(LockStatus::Unlocked)
    }

    pub fn record_success(&self) -> Result<()> {
        LoginAttemptWindow::clear(self.store.as_ref())
    }

    /// Forget attempts and any lockout, e.g. after a password reset.
    pub fn reset(&self) -> Result<()> {
        LoginAttemptWindow::clear(self.store.as_ref())
    }

    /// Whether an unexpired lockout is on record.
    pub fn is_locked_out_pending(&self) -> bool {
        match LoginAttemptWindow::load(self.store.as_ref()) {
            Ok(window) => window
                .lockout_end_time
                .is_some_and(|end| end > self.clock.now()),
            Err(e) => {
                warn!(error = %e, "could not read login attempts");
                false
            }
        }
    }

    pub fn attempts(&self) -> usize {
        LoginAttemptWindow::load(self.store.as_ref())
            .map(|w| w.attempt_timestamps.len())
            .unwrap_or(0)
    }
}
