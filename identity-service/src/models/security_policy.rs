//! Password security policy - the Local provider's custom configuration.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Immutable password security policy, reloaded on every login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityPolicy {
    pub password_min_length: u32,
    pub has_uppercase: bool,
    pub has_lowercase: bool,
    pub has_number: bool,
    pub has_special_character: bool,
    pub can_reuse_passwords: bool,
    /// Failed attempts before the account is blocked; `None` disables lockout.
    pub attempts: Option<u32>,
    pub blocking_duration: Option<Duration>,
    /// `None` means passwords never expire.
    pub password_expiration_delay: Option<Duration>,
    pub delay_before_new_password: Option<Duration>,
    pub excluded_user_aliases: Vec<String>,
}

impl SecurityPolicy {
    pub fn is_lockout_enabled(&self) -> bool {
        matches!(
            (self.attempts, self.blocking_duration),
            (Some(attempts), Some(duration)) if attempts > 0 && duration > Duration::zero()
        )
    }

    pub fn is_excluded_from_expiration(&self, alias: &str) -> bool {
        self.excluded_user_aliases.iter().any(|a| a == alias)
    }
}

/// Local provider custom configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCustomConfiguration {
    pub security_policy: SecurityPolicy,
}

/// JSON payload stored in `provider_configuration.custom_configuration`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalConfigurationRecord {
    pub password_security_policy: SecurityPolicyRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SecurityPolicyRecord {
    #[validate(range(min = 8, max = 128))]
    pub password_length: u32,
    pub has_uppercase_characters: bool,
    pub has_lowercase_characters: bool,
    pub has_numbers: bool,
    pub has_special_characters: bool,
    pub can_reuse_passwords: bool,
    #[validate(range(min = 1, max = 10))]
    pub attempts: Option<u32>,
    #[validate(range(min = 1, max = 604_800))]
    pub blocking_duration: Option<i64>,
    #[validate(range(min = 604_800, max = 31_536_000))]
    pub password_expiration_delay: Option<i64>,
    #[validate(range(min = 3_600, max = 604_800))]
    pub delay_before_new_password: Option<i64>,
}

impl SecurityPolicyRecord {
    pub fn into_policy(self, excluded_user_aliases: Vec<String>) -> SecurityPolicy {
        SecurityPolicy {
            password_min_length: self.password_length,
            has_uppercase: self.has_uppercase_characters,
            has_lowercase: self.has_lowercase_characters,
            has_number: self.has_numbers,
            has_special_character: self.has_special_characters,
            can_reuse_passwords: self.can_reuse_passwords,
            attempts: self.attempts,
            blocking_duration: self.blocking_duration.map(Duration::seconds),
            password_expiration_delay: self.password_expiration_delay.map(Duration::seconds),
            delay_before_new_password: self.delay_before_new_password.map(Duration::seconds),
            excluded_user_aliases,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SecurityPolicyRecord {
        SecurityPolicyRecord {
            password_length: 12,
            has_uppercase_characters: true,
            has_lowercase_characters: true,
            has_numbers: true,
            has_special_characters: true,
            can_reuse_passwords: false,
            attempts: Some(5),
            blocking_duration: Some(900),
            password_expiration_delay: Some(604_800),
            delay_before_new_password: None,
        }
    }

    #[test]
    fn record_bounds_are_validated() {
        assert!(record().validate().is_ok());

        let mut short = record();
        short.password_length = 4;
        assert!(short.validate().is_err());

        let mut many_attempts = record();
        many_attempts.attempts = Some(11);
        assert!(many_attempts.validate().is_err());
    }

    #[test]
    fn lockout_requires_attempts_and_duration() {
        let policy = record().into_policy(vec![]);
        assert!(policy.is_lockout_enabled());

        let mut no_duration = record();
        no_duration.blocking_duration = None;
        assert!(!no_duration.into_policy(vec![]).is_lockout_enabled());
    }

    #[test]
    fn excluded_aliases_are_exact_matches() {
        let policy = record().into_policy(vec!["admin".to_string()]);
        assert!(policy.is_excluded_from_expiration("admin"));
        assert!(!policy.is_excluded_from_expiration("Admin"));
    }
}
