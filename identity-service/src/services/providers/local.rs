use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::models::{
    AuthenticationTokens, Contact, Credentials, CustomConfiguration, LegacySession,
    LoginRequest, NewProviderToken, ProviderConfiguration, ProviderType, RefreshedTokens,
    SecurityPolicy,
};
use crate::services::policy::{LockoutTracker, SecurityPolicyEvaluator};
use crate::services::providers::Provider;
use crate::services::repositories::ContactRepository;
use crate::services::token::generate_token;
use crate::services::ServiceError;
use crate::utils::{verify_password, Password, PasswordHashString};

/// Provider backed by the local credential store.
pub struct LocalProvider {
    configuration: ProviderConfiguration,
    contacts: Arc<dyn ContactRepository>,
    lockout: LockoutTracker,
    session_lifetime: Duration,
    username: String,
    session: Option<LegacySession>,
}

impl LocalProvider {
    pub fn new(
        configuration: ProviderConfiguration,
        contacts: Arc<dyn ContactRepository>,
        lockout: LockoutTracker,
        session_lifetime: Duration,
    ) -> Result<Self, ServiceError> {
        Self::check_configuration(&configuration)?;
        Ok(Self {
            configuration,
            contacts,
            lockout,
            session_lifetime,
            username: String::new(),
            session: None,
        })
    }

    fn check_configuration(configuration: &ProviderConfiguration) -> Result<(), ServiceError> {
        match (&configuration.provider_type, &configuration.custom_configuration) {
            (ProviderType::Local, CustomConfiguration::Local(_)) => Ok(()),
            _ => Err(ServiceError::Configuration(format!(
                "Configuration '{}' is not a local configuration",
                configuration.name
            ))),
        }
    }

    fn policy(&self) -> Result<&SecurityPolicy, ServiceError> {
        self.configuration
            .local()
            .map(|local| &local.security_policy)
            .ok_or_else(|| {
                ServiceError::Configuration("Local security policy is missing".to_string())
            })
    }
}

#[async_trait]
impl Provider for LocalProvider {
    fn configuration(&self) -> &ProviderConfiguration {
        &self.configuration
    }

    fn set_configuration(
        &mut self,
        configuration: ProviderConfiguration,
    ) -> Result<(), ServiceError> {
        Self::check_configuration(&configuration)?;
        self.configuration = configuration;
        Ok(())
    }

    async fn authenticate_or_fail(
        &mut self,
        request: &LoginRequest,
        _session: LegacySession,
    ) -> Result<LegacySession, ServiceError> {
        let Credentials::Password { login, password } = &request.credentials else {
            return Err(ServiceError::InvalidCredentials);
        };
        let now = Utc::now();
        let policy = self.policy()?.clone();

        let Some(account) = self.contacts.find_local_account(login).await? else {
            tracing::info!(contact_alias = %login, "Login attempt for an unknown alias");
            return Err(ServiceError::InvalidCredentials);
        };
        let contact_id = account.contact.contact_id;

        self.lockout.ensure_not_locked(contact_id, now).await?;

        let verified = account.password.as_ref().map_or(false, |record| {
            verify_password(
                &Password::new(password.clone()),
                &PasswordHashString::new(record.password_hash.clone()),
            )
            .is_ok()
        });
        if !verified {
            self.lockout.record_failure(contact_id, &policy, now).await?;
            tracing::info!(contact_id, "Invalid local credentials");
            return Err(ServiceError::InvalidCredentials);
        }

        self.lockout.reset(contact_id).await?;

        if SecurityPolicyEvaluator::is_expired(
            &policy,
            &account.contact.alias,
            account.password_changed_at(),
            now,
        ) {
            tracing::info!(contact_id, "Password expired");
            return Err(ServiceError::PasswordExpired);
        }

        // A new session id on every login.
        let session = LegacySession {
            session_id: generate_token(),
            contact_id: Some(contact_id),
        };
        self.username = account.contact.alias.clone();
        self.session = Some(session.clone());
        Ok(session)
    }

    async fn find_user_or_fail(&self) -> Result<Contact, ServiceError> {
        self.contacts
            .find_contact_by_alias(&self.username)
            .await?
            .ok_or(ServiceError::UserNotFound)
    }

    fn username(&self) -> &str {
        &self.username
    }

    fn is_auto_import_supported(&self) -> bool {
        false
    }

    async fn auto_import(&mut self) -> Result<(), ServiceError> {
        Err(ServiceError::Provider(
            "Auto import is not supported by the local provider".to_string(),
        ))
    }

    /// The legacy session id, valid for the configured session lifetime.
    fn provider_token(&self) -> Result<NewProviderToken, ServiceError> {
        let session = self.session.as_ref().ok_or_else(|| {
            ServiceError::Provider("No session: the user is not authenticated".to_string())
        })?;
        NewProviderToken::with_lifetime(session.session_id.clone(), self.session_lifetime)
    }

    fn provider_refresh_token(&self) -> Option<NewProviderToken> {
        None
    }

    fn is_update_acl_supported(&self) -> bool {
        false
    }

    fn can_refresh_token(&self) -> bool {
        false
    }

    async fn refresh_token(
        &self,
        _tokens: &AuthenticationTokens,
    ) -> Result<Option<RefreshedTokens>, ServiceError> {
        Ok(None)
    }
}
