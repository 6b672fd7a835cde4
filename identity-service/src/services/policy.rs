//! Password security policy evaluation.
//!
//! Validates candidate passwords against the Local provider's security policy
//! and tracks the lockout and expiration rules. The evaluation functions are
//! pure and take the current time explicitly; [`LockoutTracker`] persists the
//! resulting lockout state.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::{LockoutState, PasswordRecord, SecurityPolicy};
use crate::services::repositories::LoginAttemptRepository;
use crate::services::ServiceError;
use crate::utils::{verify_password, Password, PasswordHashString};

/// Number of previous passwords checked when reuse is disallowed.
pub const PASSWORD_HISTORY_DEPTH: usize = 3;

/// A violated password rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    TooShort { min_length: u32, actual_length: usize },
    MissingUppercase,
    MissingLowercase,
    MissingNumber,
    MissingSpecial,
    ReusedPassword,
    ChangedTooRecently { next_change_utc: DateTime<Utc> },
}

impl std::fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyViolation::TooShort {
                min_length,
                actual_length,
            } => write!(
                f,
                "Password must be at least {} characters (got {})",
                min_length, actual_length
            ),
            PolicyViolation::MissingUppercase => {
                write!(f, "Password must contain at least one uppercase letter")
            }
            PolicyViolation::MissingLowercase => {
                write!(f, "Password must contain at least one lowercase letter")
            }
            PolicyViolation::MissingNumber => write!(f, "Password must contain at least one number"),
            PolicyViolation::MissingSpecial => {
                write!(f, "Password must contain at least one special character")
            }
            PolicyViolation::ReusedPassword => {
                write!(f, "Password has already been used recently")
            }
            PolicyViolation::ChangedTooRecently { next_change_utc } => write!(
                f,
                "Password cannot be changed before {}",
                next_change_utc.to_rfc3339()
            ),
        }
    }
}

/// What the evaluator knows about the account a password is meant for.
#[derive(Debug, Clone, Copy)]
pub struct PasswordContext<'a> {
    /// Previous passwords, most recent first.
    pub history: &'a [PasswordRecord],
    pub last_change_utc: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

impl<'a> PasswordContext<'a> {
    /// Context for a password with no account history behind it.
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            history: &[],
            last_change_utc: None,
            now,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SecurityPolicyEvaluator;

impl SecurityPolicyEvaluator {
    /// Check every rule and return all violations, in rule order.
    pub fn evaluate(
        password: &str,
        policy: &SecurityPolicy,
        context: &PasswordContext<'_>,
    ) -> Vec<PolicyViolation> {
        let mut violations = Vec::new();

        let length = password.chars().count();
        if length < policy.password_min_length as usize {
            violations.push(PolicyViolation::TooShort {
                min_length: policy.password_min_length,
                actual_length: length,
            });
        }

        if policy.has_uppercase && !password.chars().any(|c| c.is_uppercase()) {
            violations.push(PolicyViolation::MissingUppercase);
        }

        if policy.has_lowercase && !password.chars().any(|c| c.is_lowercase()) {
            violations.push(PolicyViolation::MissingLowercase);
        }

        if policy.has_number && !password.chars().any(|c| c.is_ascii_digit()) {
            violations.push(PolicyViolation::MissingNumber);
        }

        if policy.has_special_character && !password.chars().any(is_special_character) {
            violations.push(PolicyViolation::MissingSpecial);
        }

        if !policy.can_reuse_passwords && Self::is_reused(password, context.history) {
            violations.push(PolicyViolation::ReusedPassword);
        }

        if let (Some(delay), Some(last_change)) =
            (policy.delay_before_new_password, context.last_change_utc)
        {
            let next_change_utc = last_change + delay;
            if context.now < next_change_utc {
                violations.push(PolicyViolation::ChangedTooRecently { next_change_utc });
            }
        }

        violations
    }

    fn is_reused(password: &str, history: &[PasswordRecord]) -> bool {
        let candidate = Password::new(password.to_string());
        history.iter().take(PASSWORD_HISTORY_DEPTH).any(|record| {
            verify_password(
                &candidate,
                &PasswordHashString::new(record.password_hash.clone()),
            )
            .is_ok()
        })
    }

    /// State after one more failed attempt at `now`.
    ///
    /// Failures are counted within a window of `blocking_duration` starting at
    /// the first failure; reaching `attempts` inside the window blocks the
    /// account until `now + blocking_duration`.
    pub fn record_failed_attempt(
        state: &LockoutState,
        policy: &SecurityPolicy,
        now: DateTime<Utc>,
    ) -> LockoutState {
        let (Some(attempts), Some(duration)) = (policy.attempts, policy.blocking_duration) else {
            return LockoutState::default();
        };
        if attempts == 0 || duration <= chrono::Duration::zero() {
            return LockoutState::default();
        }

        let window_open = state
            .first_failure_utc
            .map_or(false, |first| now - first < duration);

        let mut next = if window_open {
            LockoutState {
                failed_attempts: state.failed_attempts.saturating_add(1),
                first_failure_utc: state.first_failure_utc,
                blocked_until_utc: None,
            }
        } else {
            LockoutState {
                failed_attempts: 1,
                first_failure_utc: Some(now),
                blocked_until_utc: None,
            }
        };

        if next.failed_attempts >= attempts as i32 {
            next.blocked_until_utc = Some(now + duration);
        }
        next
    }

    pub fn is_locked(state: &LockoutState, now: DateTime<Utc>) -> bool {
        state.is_blocked_at(now)
    }

    /// True once `password_expiration_delay` has elapsed since the last
    /// password change, unless the alias is excluded.
    pub fn is_expired(
        policy: &SecurityPolicy,
        alias: &str,
        last_change_utc: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        if policy.is_excluded_from_expiration(alias) {
            return false;
        }
        match (policy.password_expiration_delay, last_change_utc) {
            (Some(delay), Some(changed)) => now - changed >= delay,
            _ => false,
        }
    }
}

fn is_special_character(c: char) -> bool {
    !c.is_alphanumeric() && !c.is_whitespace() && !c.is_control()
}

/// Applies the lockout rules to persisted per-contact state.
#[derive(Clone)]
pub struct LockoutTracker {
    attempts: Arc<dyn LoginAttemptRepository>,
}

impl LockoutTracker {
    pub fn new(attempts: Arc<dyn LoginAttemptRepository>) -> Self {
        Self { attempts }
    }

    /// Fails with `AccountLocked` while the contact is blocked.
    pub async fn ensure_not_locked(
        &self,
        contact_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let state = self.attempts.find_lockout_state(contact_id).await?;
        if SecurityPolicyEvaluator::is_locked(&state, now) {
            tracing::warn!(contact_id, "Login attempt on a blocked account");
            return Err(ServiceError::AccountLocked);
        }
        Ok(())
    }

    pub async fn record_failure(
        &self,
        contact_id: i64,
        policy: &SecurityPolicy,
        now: DateTime<Utc>,
    ) -> Result<LockoutState, ServiceError> {
        if !policy.is_lockout_enabled() {
            return Ok(LockoutState::default());
        }
        let next = self
            .attempts
            .record_failed_attempt(contact_id, policy, now)
            .await?;
        if next.blocked_until_utc.is_some() {
            tracing::warn!(
                contact_id,
                failed_attempts = next.failed_attempts,
                "Account blocked after too many failed attempts"
            );
        }
        Ok(next)
    }

    pub async fn reset(&self, contact_id: i64) -> Result<(), ServiceError> {
        self.attempts.clear_lockout_state(contact_id).await
    }
}
