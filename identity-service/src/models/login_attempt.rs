//! Failed login bookkeeping for the lockout policy.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Lockout state of one contact.
#[derive(Debug, Clone, Default, PartialEq, Eq, FromRow)]
pub struct LockoutState {
    pub failed_attempts: i32,
    /// Start of the current counting window.
    pub first_failure_utc: Option<DateTime<Utc>>,
    pub blocked_until_utc: Option<DateTime<Utc>>,
}

impl LockoutState {
    pub fn is_blocked_at(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until_utc.map_or(false, |until| until > now)
    }
}
