use serde::{Deserialize, Serialize};

use crate::models::{ConfigurationSummary, SecurityPolicy};

/// Password security policy of the local provider, durations in seconds.
#[derive(Debug, Serialize, Deserialize)]
pub struct SecurityPolicyResponse {
    pub password_length: u32,
    pub has_uppercase_characters: bool,
    pub has_lowercase_characters: bool,
    pub has_numbers: bool,
    pub has_special_characters: bool,
    pub can_reuse_passwords: bool,
    pub attempts: Option<u32>,
    pub blocking_duration: Option<i64>,
    pub password_expiration_delay: Option<i64>,
    pub delay_before_new_password: Option<i64>,
}

impl From<&SecurityPolicy> for SecurityPolicyResponse {
    fn from(policy: &SecurityPolicy) -> Self {
        Self {
            password_length: policy.password_min_length,
            has_uppercase_characters: policy.has_uppercase,
            has_lowercase_characters: policy.has_lowercase,
            has_numbers: policy.has_number,
            has_special_characters: policy.has_special_character,
            can_reuse_passwords: policy.can_reuse_passwords,
            attempts: policy.attempts,
            blocking_duration: policy.blocking_duration.map(|d| d.num_seconds()),
            password_expiration_delay: policy.password_expiration_delay.map(|d| d.num_seconds()),
            delay_before_new_password: policy.delay_before_new_password.map(|d| d.num_seconds()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConfigurationsResponse {
    pub configurations: Vec<ConfigurationSummary>,
}
