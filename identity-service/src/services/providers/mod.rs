//! Authentication providers.
//!
//! A provider authenticates credentials against one backend (the local
//! credential store, an OpenID Connect identity provider) and exposes the
//! authenticated contact and the provider-side tokens through a uniform
//! contract. Providers are stateful: one instance serves one login.

mod local;
mod openid;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;

use crate::models::{
    AccessGroup, AuthenticationTokens, Contact, ContactGroup, LegacySession,
    LoginRequest, NewProviderToken, ProviderConfiguration, ProviderType, RefreshedTokens,
};
use crate::services::configuration::ConfigurationFactory;
use crate::services::policy::LockoutTracker;
use crate::services::repositories::{ContactRepository, TokenRepository};
use crate::services::ServiceError;

pub use local::LocalProvider;
pub use openid::{HttpOpenIdClient, OpenIdClient, OpenIdProvider, OpenIdTokens};

#[async_trait]
pub trait Provider: Send + Sync {
    fn configuration(&self) -> &ProviderConfiguration;

    /// Replace the configuration; it must be of the provider's own type.
    fn set_configuration(&mut self, configuration: ProviderConfiguration)
        -> Result<(), ServiceError>;

    /// Authenticate the credentials of `request`.
    ///
    /// Takes the caller's legacy session and returns the session to use from
    /// now on. Fails with `InvalidCredentials` or `AccountLocked`.
    async fn authenticate_or_fail(
        &mut self,
        request: &LoginRequest,
        session: LegacySession,
    ) -> Result<LegacySession, ServiceError>;

    /// Look the authenticated user up in the contact store.
    async fn find_user_or_fail(&self) -> Result<Contact, ServiceError>;

    /// Login of the authenticated user; empty before authentication.
    fn username(&self) -> &str;

    fn is_auto_import_supported(&self) -> bool;

    /// Create or update the contact from provider data.
    async fn auto_import(&mut self) -> Result<(), ServiceError>;

    fn provider_token(&self) -> Result<NewProviderToken, ServiceError>;

    fn provider_refresh_token(&self) -> Option<NewProviderToken>;

    fn is_update_acl_supported(&self) -> bool;

    fn can_refresh_token(&self) -> bool;

    /// New provider tokens for an existing authentication, or `None` when
    /// the provider-side session cannot be renewed.
    async fn refresh_token(
        &self,
        tokens: &AuthenticationTokens,
    ) -> Result<Option<RefreshedTokens>, ServiceError>;

    /// Claim-based authorization, for providers that carry claims.
    fn as_claims_provider(&self) -> Option<&dyn ClaimsProvider> {
        None
    }
}

/// Providers whose users come with claims mapped to authorization.
pub trait ClaimsProvider: Send + Sync {
    /// Access groups granted by the authorization rules matching the claims.
    fn access_groups_from_claims(&self) -> Vec<AccessGroup>;

    /// Contact group every user of this provider belongs to.
    fn contact_group(&self) -> Option<&ContactGroup>;
}

/// Builds a provider instance from its configuration.
#[derive(Clone)]
pub struct ProviderFactory {
    contacts: Arc<dyn ContactRepository>,
    lockout: LockoutTracker,
    openid_client: Arc<dyn OpenIdClient>,
    session_lifetime: Duration,
}

impl ProviderFactory {
    pub fn new(
        contacts: Arc<dyn ContactRepository>,
        lockout: LockoutTracker,
        openid_client: Arc<dyn OpenIdClient>,
        session_lifetime: Duration,
    ) -> Self {
        Self {
            contacts,
            lockout,
            openid_client,
            session_lifetime,
        }
    }

    pub fn create(
        &self,
        configuration: ProviderConfiguration,
    ) -> Result<Box<dyn Provider>, ServiceError> {
        if !configuration.is_active {
            return Err(ServiceError::Configuration(format!(
                "Provider '{}' is not active",
                configuration.name
            )));
        }

        match configuration.provider_type {
            ProviderType::Local => Ok(Box::new(LocalProvider::new(
                configuration,
                self.contacts.clone(),
                self.lockout.clone(),
                self.session_lifetime,
            )?)),
            ProviderType::OpenId => Ok(Box::new(OpenIdProvider::new(
                configuration,
                self.contacts.clone(),
                self.openid_client.clone(),
            )?)),
            ProviderType::WebSso => Err(ServiceError::Configuration(format!(
                "Provider type '{}' cannot be used to log in",
                configuration.provider_type.as_str()
            ))),
        }
    }
}

/// Resolves providers by configuration name, configuration id or session.
#[derive(Clone)]
pub struct ProviderService {
    configurations: ConfigurationFactory,
    factory: ProviderFactory,
    tokens: Arc<dyn TokenRepository>,
}

impl ProviderService {
    pub fn new(
        configurations: ConfigurationFactory,
        factory: ProviderFactory,
        tokens: Arc<dyn TokenRepository>,
    ) -> Self {
        Self {
            configurations,
            factory,
            tokens,
        }
    }

    pub async fn find_provider_by_configuration_name(
        &self,
        name: &str,
    ) -> Result<Box<dyn Provider>, ServiceError> {
        let configuration = self.configurations.get_configuration_by_name(name).await?;
        self.factory.create(configuration)
    }

    pub async fn find_provider_by_configuration_id(
        &self,
        id: i64,
    ) -> Result<Box<dyn Provider>, ServiceError> {
        let configuration = self.configurations.get_configuration_by_id(id).await?;
        self.factory.create(configuration)
    }

    /// Provider that issued the given authentication token, along with the
    /// stored tokens. Unknown tokens fail with `InvalidToken`.
    pub async fn find_provider_by_session(
        &self,
        session_token: &str,
    ) -> Result<(Box<dyn Provider>, AuthenticationTokens), ServiceError> {
        let tokens = self
            .tokens
            .find_authentication_tokens(session_token)
            .await?
            .ok_or(ServiceError::InvalidToken)?;
        let provider = self
            .find_provider_by_configuration_id(tokens.provider_configuration_id)
            .await?;
        Ok((provider, tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::configuration::{LOCAL, WEB_SSO};
    use crate::models::{CustomConfiguration, LocalCustomConfiguration, SecurityPolicy};
    use crate::services::InMemoryStore;

    fn local_configuration(is_active: bool) -> ProviderConfiguration {
        ProviderConfiguration {
            id: Some(1),
            name: LOCAL.to_string(),
            provider_type: ProviderType::Local,
            is_active,
            is_forced: false,
            custom_configuration: CustomConfiguration::Local(LocalCustomConfiguration {
                security_policy: SecurityPolicy {
                    password_min_length: 8,
                    has_uppercase: false,
                    has_lowercase: false,
                    has_number: false,
                    has_special_character: false,
                    can_reuse_passwords: true,
                    attempts: None,
                    blocking_duration: None,
                    password_expiration_delay: None,
                    delay_before_new_password: None,
                    excluded_user_aliases: vec![],
                },
            }),
        }
    }

    fn factory() -> ProviderFactory {
        let store = Arc::new(InMemoryStore::new());
        ProviderFactory::new(
            store.clone(),
            LockoutTracker::new(store),
            Arc::new(HttpOpenIdClient::default()),
            Duration::minutes(120),
        )
    }

    #[test]
    fn creates_local_provider_without_acl_or_refresh() {
        let provider = factory().create(local_configuration(true)).unwrap();
        assert_eq!(provider.configuration().name, LOCAL);
        assert!(!provider.is_update_acl_supported());
        assert!(!provider.can_refresh_token());
        assert!(provider.as_claims_provider().is_none());
    }

    #[test]
    fn refuses_inactive_and_web_sso_configurations() {
        assert!(matches!(
            factory().create(local_configuration(false)),
            Err(ServiceError::Configuration(_))
        ));

        let mut web_sso = local_configuration(true);
        web_sso.name = WEB_SSO.to_string();
        web_sso.provider_type = ProviderType::WebSso;
        assert!(matches!(
            factory().create(web_sso),
            Err(ServiceError::Configuration(_))
        ));
    }

    #[test]
    fn local_custom_configuration_is_required() {
        let mut mismatched = local_configuration(true);
        mismatched.provider_type = ProviderType::OpenId;
        assert!(matches!(
            factory().create(mismatched),
            Err(ServiceError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn finds_the_provider_behind_a_session_token() {
        let store = Arc::new(InMemoryStore::new());
        let configuration_id = store.add_configuration(
            LOCAL,
            "local",
            serde_json::json!({
                "password_security_policy": {
                    "password_length": 8,
                    "has_uppercase_characters": false,
                    "has_lowercase_characters": false,
                    "has_numbers": false,
                    "has_special_characters": false,
                    "can_reuse_passwords": true,
                    "attempts": null,
                    "blocking_duration": null,
                    "password_expiration_delay": null,
                    "delay_before_new_password": null
                }
            }),
            true,
        );
        let contact = store.add_contact("jdoe", "John Doe", false);
        let session = NewProviderToken::with_lifetime("s".into(), Duration::minutes(5)).unwrap();
        store
            .create_authentication_tokens("token", configuration_id, contact.contact_id, &session, None)
            .await
            .unwrap();

        let service = ProviderService::new(
            ConfigurationFactory::new(store.clone()),
            ProviderFactory::new(
                store.clone(),
                LockoutTracker::new(store.clone()),
                Arc::new(HttpOpenIdClient::default()),
                Duration::minutes(120),
            ),
            store.clone(),
        );

        let (provider, tokens) = service.find_provider_by_session("token").await.unwrap();
        assert_eq!(provider.configuration().id, Some(configuration_id));
        assert_eq!(tokens.contact_id, contact.contact_id);
        assert_eq!(tokens.provider_token.token, "s");

        assert!(matches!(
            service.find_provider_by_session("unknown").await,
            Err(ServiceError::InvalidToken)
        ));
    }
}
