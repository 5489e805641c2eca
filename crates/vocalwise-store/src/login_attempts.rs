//! Persisted failed-login history.
//!
//! Attempts and the lockout end are stored under separate keys as epoch
//! milliseconds so that the recovery flow can clear both in one call.

use chrono::{DateTime, Duration, TimeZone, Utc};

use vocalwise_shared::constants::{KEY_LOGIN_ATTEMPTS, KEY_LOGIN_LOCKOUT};

use crate::error::Result;
use crate::kv::{get_json, set_json, KeyValueStore};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginAttemptWindow {
    pub attempt_timestamps: Vec<DateTime<Utc>>,
    pub lockout_end_time: Option<DateTime<Utc>>,
}

impl LoginAttemptWindow {
    pub fn load(store: &dyn KeyValueStore) -> Result<Self> {
        let attempts: Vec<i64> = get_json(store, KEY_LOGIN_ATTEMPTS)?.unwrap_or_default();
        let lockout: Option<i64> = get_json(store, KEY_LOGIN_LOCKOUT)?;

        Ok(Self {
            attempt_timestamps: attempts.into_iter().filter_map(from_millis).collect(),
            lockout_end_time: lockout.and_then(from_millis),
        })
    }

    pub fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        let attempts: Vec<i64> = self
            .attempt_timestamps
            .iter()
            .map(DateTime::timestamp_millis)
            .collect();
        set_json(store, KEY_LOGIN_ATTEMPTS, &attempts)?;

        match self.lockout_end_time {
            Some(end) => set_json(store, KEY_LOGIN_LOCKOUT, &end.timestamp_millis()),
            None => store.remove(KEY_LOGIN_LOCKOUT),
        }
    }

    /// Remove both keys.
    pub fn clear(store: &dyn KeyValueStore) -> Result<()> {
        store.remove_many(&[KEY_LOGIN_ATTEMPTS, KEY_LOGIN_LOCKOUT])
    }

    /// Drop attempts older than `window` relative to `now`.
    pub fn prune(&mut self, now: DateTime<Utc>, window: Duration) {
        let cutoff = now - window;
        self.attempt_timestamps.retain(|t| *t > cutoff);
    }
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}
