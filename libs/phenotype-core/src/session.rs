//! Session expiry.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryReason {
    /// The session outlived its absolute limit.
    Absolute,
    /// No request arrived within the idle limit.
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    pub session_limit: Duration,
    pub idle_limit: Duration,
}

impl ExpiryPolicy {
    pub fn from_seconds(session_limit: i64, idle_limit: i64) -> Self {
        Self {
            session_limit: Duration::seconds(session_limit),
            idle_limit: Duration::seconds(idle_limit),
        }
    }

    /// `Some(reason)` when the session must end at `now`.
    pub fn check(
        &self,
        created: DateTime<Utc>,
        last_request: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<ExpiryReason> {
        if now - created >= self.session_limit {
            return Some(ExpiryReason::Absolute);
        }
        if now - last_request >= self.idle_limit {
            return Some(ExpiryReason::Idle);
        }
        None
    }
}
