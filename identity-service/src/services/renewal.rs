//! Local password renewal.

use std::sync::Arc;

use chrono::Utc;

use crate::services::configuration::ConfigurationFactory;
use crate::services::policy::{
    LockoutTracker, PasswordContext, SecurityPolicyEvaluator, PASSWORD_HISTORY_DEPTH,
};
use crate::services::repositories::ContactRepository;
use crate::services::ServiceError;
use crate::utils::{hash_password, verify_password, Password, PasswordHashString};

#[derive(Clone)]
pub struct PasswordRenewalService {
    configurations: ConfigurationFactory,
    contacts: Arc<dyn ContactRepository>,
    lockout: LockoutTracker,
}

impl PasswordRenewalService {
    pub fn new(
        configurations: ConfigurationFactory,
        contacts: Arc<dyn ContactRepository>,
        lockout: LockoutTracker,
    ) -> Self {
        Self {
            configurations,
            contacts,
            lockout,
        }
    }

    /// Replace the password of `alias` after checking the current one.
    ///
    /// Expired passwords can be renewed. The current password check shares the
    /// login lockout: a blocked account cannot renew, and a wrong current
    /// password counts as a failed attempt. The new password must satisfy the
    /// whole security policy; every violated rule is reported.
    pub async fn renew(
        &self,
        alias: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), ServiceError> {
        let policy = self.configurations.find_local_policy().await?;

        let account = self
            .contacts
            .find_local_account(alias)
            .await?
            .ok_or(ServiceError::InvalidCredentials)?;
        let contact_id = account.contact.contact_id;
        let now = Utc::now();
        self.lockout.ensure_not_locked(contact_id, now).await?;

        let current = account
            .password
            .as_ref()
            .ok_or(ServiceError::InvalidCredentials)?;
        let verified = verify_password(
            &Password::new(old_password.to_string()),
            &PasswordHashString::new(current.password_hash.clone()),
        );
        if verified.is_err() {
            self.lockout.record_failure(contact_id, &policy, now).await?;
            return Err(ServiceError::InvalidCredentials);
        }
        self.lockout.reset(contact_id).await?;

        let history = self
            .contacts
            .find_password_history(contact_id, PASSWORD_HISTORY_DEPTH)
            .await?;
        let context = PasswordContext {
            history: &history,
            last_change_utc: account.password_changed_at(),
            now,
        };

        let violations = SecurityPolicyEvaluator::evaluate(new_password, &policy, &context);
        if !violations.is_empty() {
            tracing::info!(
                contact_id,
                violations = violations.len(),
                "New password rejected by the security policy"
            );
            return Err(ServiceError::PasswordPolicy(violations));
        }

        let hash = hash_password(&Password::new(new_password.to_string()))?;
        self.contacts
            .add_password(contact_id, hash.as_str(), now)
            .await?;
        tracing::info!(contact_id, "Password renewed");
        Ok(())
    }
}
