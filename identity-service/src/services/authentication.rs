//! Login use case and provider token refresh.

use std::sync::Arc;

use crate::models::{Contact, LegacySession, LoginRequest, LoginResponse};
use crate::services::providers::{Provider, ProviderService};
use crate::services::repositories::TokenRepository;
use crate::services::token::generate_token;
use crate::services::ServiceError;

/// Result of a successful login.
pub struct LoginOutcome {
    pub token: String,
    pub contact: Contact,
    pub session: LegacySession,
    /// The provider that authenticated the contact, for post-login work.
    pub provider: Box<dyn Provider>,
}

impl LoginOutcome {
    pub fn response(&self) -> LoginResponse {
        LoginResponse {
            token: self.token.clone(),
            contact: self.contact.clone(),
        }
    }
}

#[derive(Clone)]
pub struct LoginService {
    providers: ProviderService,
    tokens: Arc<dyn TokenRepository>,
}

impl LoginService {
    pub fn new(providers: ProviderService, tokens: Arc<dyn TokenRepository>) -> Self {
        Self { providers, tokens }
    }

    /// Authenticate `request` and issue an authentication token.
    pub async fn execute(
        &self,
        request: LoginRequest,
        session: LegacySession,
    ) -> Result<LoginOutcome, ServiceError> {
        self.purge_expired_tokens().await;

        let mut provider = self
            .providers
            .find_provider_by_configuration_name(&request.provider_name)
            .await?;

        let session = provider.authenticate_or_fail(&request, session).await?;

        if provider.is_auto_import_supported() {
            provider.auto_import().await?;
        }

        let contact = match provider.find_user_or_fail().await {
            Ok(contact) => contact,
            Err(ServiceError::UserNotFound) => {
                tracing::error!(
                    critical = true,
                    provider_name = %request.provider_name,
                    contact_alias = %provider.username(),
                    "Authenticated user could not be found"
                );
                return Err(ServiceError::UserNotFound);
            }
            Err(e) => return Err(e),
        };

        let token = generate_token();
        self.create_authentication_tokens(&token, provider.as_ref(), &contact)
            .await?;

        tracing::info!(
            contact_id = contact.contact_id,
            contact_alias = %contact.alias,
            provider_name = %request.provider_name,
            "Authentication succeeded"
        );

        Ok(LoginOutcome {
            token,
            contact,
            session,
            provider,
        })
    }

    /// Renew the provider tokens behind an authentication token.
    ///
    /// Returns `false` when the owning provider cannot refresh, or when its
    /// refresh token is gone.
    pub async fn refresh(&self, session_token: &str) -> Result<bool, ServiceError> {
        let (provider, tokens) = self.providers.find_provider_by_session(session_token).await?;

        if !provider.can_refresh_token() {
            return Ok(false);
        }
        let Some(refreshed) = provider.refresh_token(&tokens).await? else {
            return Ok(false);
        };

        self.tokens
            .update_provider_tokens(session_token, &refreshed)
            .await?;
        tracing::info!(
            contact_id = tokens.contact_id,
            configuration_id = tokens.provider_configuration_id,
            "Provider tokens refreshed"
        );
        Ok(true)
    }

    async fn purge_expired_tokens(&self) {
        match self.tokens.delete_expired_tokens().await {
            Ok(0) => {}
            Ok(deleted) => tracing::debug!(deleted, "Expired tokens purged"),
            Err(e) => tracing::warn!(error = %e, "Unable to purge expired tokens"),
        }
    }

    async fn create_authentication_tokens(
        &self,
        token: &str,
        provider: &dyn Provider,
        contact: &Contact,
    ) -> Result<(), ServiceError> {
        let configuration = provider.configuration();
        let configuration_id = configuration.id.ok_or_else(|| {
            ServiceError::Configuration(format!(
                "Provider configuration '{}' has no id",
                configuration.name
            ))
        })?;

        let provider_token = provider.provider_token()?;
        let refresh_token = provider.provider_refresh_token();

        self.tokens
            .create_authentication_tokens(
                token,
                configuration_id,
                contact.contact_id,
                &provider_token,
                refresh_token.as_ref(),
            )
            .await
            .map_err(|e| {
                tracing::error!(
                    contact_id = contact.contact_id,
                    configuration_id,
                    error = %e,
                    "Unable to persist authentication tokens"
                );
                ServiceError::TokenPersistence(e.to_string())
            })
    }
}
