use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;

use crate::models::{
    AccessGroup, AuthenticationTokens, Claims, ClientAuthentication, Contact, ContactGroup,
    Credentials, CustomConfiguration, LegacySession, LoginRequest, NewContact, NewProviderToken,
    OpenIdCustomConfiguration, ProviderConfiguration, ProviderType, RefreshedTokens,
};
use crate::services::providers::{ClaimsProvider, Provider};
use crate::services::repositories::ContactRepository;
use crate::services::ServiceError;

/// Lifetime assumed when the identity provider omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECONDS: i64 = 3600;

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenIdTokens {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub refresh_expires_in: Option<i64>,
}

impl OpenIdTokens {
    fn provider_token(&self) -> Result<NewProviderToken, ServiceError> {
        NewProviderToken::with_lifetime(self.access_token.clone(), self.access_lifetime()?)
    }

    fn provider_refresh_token(&self) -> Result<Option<NewProviderToken>, ServiceError> {
        match (&self.refresh_token, self.refresh_expires_in) {
            (Some(token), Some(expires_in)) if expires_in > 0 => Ok(Some(
                NewProviderToken::with_lifetime(token.clone(), lifetime_seconds(expires_in)?)?,
            )),
            // Refresh tokens without an announced lifetime live as long as
            // the access token they come with.
            (Some(token), _) => Ok(Some(NewProviderToken::with_lifetime(
                token.clone(),
                self.access_lifetime()?,
            )?)),
            (None, _) => Ok(None),
        }
    }

    fn access_lifetime(&self) -> Result<Duration, ServiceError> {
        lifetime_seconds(self.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECONDS))
    }
}

fn lifetime_seconds(seconds: i64) -> Result<Duration, ServiceError> {
    Duration::try_seconds(seconds).ok_or_else(|| {
        ServiceError::Provider(format!("Token lifetime of {}s is out of range", seconds))
    })
}

/// Calls to the identity provider.
#[async_trait]
pub trait OpenIdClient: Send + Sync {
    /// Trade an authorization code for tokens. Fails with
    /// `InvalidCredentials` when the identity provider rejects the code.
    async fn exchange_code(
        &self,
        configuration: &OpenIdCustomConfiguration,
        code: &str,
        redirect_uri: &str,
    ) -> Result<OpenIdTokens, ServiceError>;

    async fn refresh(
        &self,
        configuration: &OpenIdCustomConfiguration,
        refresh_token: &str,
    ) -> Result<OpenIdTokens, ServiceError>;

    async fn fetch_user_information(
        &self,
        configuration: &OpenIdCustomConfiguration,
        access_token: &str,
    ) -> Result<Claims, ServiceError>;
}

/// `reqwest` based client.
#[derive(Clone, Default)]
pub struct HttpOpenIdClient {
    client: reqwest::Client,
    timeout: Option<StdDuration>,
}

impl HttpOpenIdClient {
    pub fn new(timeout: StdDuration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: Some(timeout),
        }
    }

    fn client_for(
        &self,
        configuration: &OpenIdCustomConfiguration,
    ) -> Result<reqwest::Client, ServiceError> {
        if configuration.verify_peer {
            return Ok(self.client.clone());
        }
        reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| ServiceError::Provider(format!("Unable to build HTTP client: {}", e)))
    }

    async fn token_request(
        &self,
        configuration: &OpenIdCustomConfiguration,
        mut form: Vec<(&'static str, String)>,
    ) -> Result<OpenIdTokens, ServiceError> {
        let client = self.client_for(configuration)?;
        let mut request = client.post(configuration.token_url());
        match configuration.authentication_type {
            ClientAuthentication::ClientSecretBasic => {
                request = request.basic_auth(
                    &configuration.client_id,
                    Some(&configuration.client_secret),
                );
            }
            ClientAuthentication::ClientSecretPost => {
                form.push(("client_id", configuration.client_id.clone()));
                form.push(("client_secret", configuration.client_secret.clone()));
            }
        }
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.form(&form).send().await.map_err(|e| {
            tracing::error!(error = %e, "Identity provider token endpoint unreachable");
            ServiceError::Provider(format!("Token endpoint unreachable: {}", e))
        })?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "Identity provider refused the token request");
            return Err(ServiceError::InvalidCredentials);
        }
        if !status.is_success() {
            tracing::error!(status = %status, "Identity provider token endpoint error");
            return Err(ServiceError::Provider(format!(
                "Token endpoint answered {}",
                status
            )));
        }

        response.json::<OpenIdTokens>().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to parse identity provider token response");
            ServiceError::Provider(format!("Invalid token response: {}", e))
        })
    }
}

#[async_trait]
impl OpenIdClient for HttpOpenIdClient {
    async fn exchange_code(
        &self,
        configuration: &OpenIdCustomConfiguration,
        code: &str,
        redirect_uri: &str,
    ) -> Result<OpenIdTokens, ServiceError> {
        self.token_request(
            configuration,
            vec![
                ("grant_type", "authorization_code".to_string()),
                ("code", code.to_string()),
                ("redirect_uri", redirect_uri.to_string()),
            ],
        )
        .await
    }

    async fn refresh(
        &self,
        configuration: &OpenIdCustomConfiguration,
        refresh_token: &str,
    ) -> Result<OpenIdTokens, ServiceError> {
        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
        ];
        if !configuration.connection_scopes.is_empty() {
            form.push(("scope", configuration.connection_scopes.join(" ")));
        }
        self.token_request(configuration, form).await
    }

    async fn fetch_user_information(
        &self,
        configuration: &OpenIdCustomConfiguration,
        access_token: &str,
    ) -> Result<Claims, ServiceError> {
        let url = configuration.userinfo_url().ok_or_else(|| {
            ServiceError::Configuration("OpenID userinfo endpoint is not configured".to_string())
        })?;
        let client = self.client_for(configuration)?;
        let mut request = client.get(url).bearer_auth(access_token);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to fetch user information");
            ServiceError::Provider(format!("Userinfo endpoint unreachable: {}", e))
        })?;
        if !response.status().is_success() {
            let status = response.status();
            tracing::error!(status = %status, "Identity provider userinfo error");
            return Err(ServiceError::Provider(format!(
                "Userinfo endpoint answered {}",
                status
            )));
        }

        response.json::<Claims>().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to parse user information");
            ServiceError::Provider(format!("Invalid user information: {}", e))
        })
    }
}

/// Provider backed by an OpenID Connect identity provider.
pub struct OpenIdProvider {
    configuration: ProviderConfiguration,
    custom: OpenIdCustomConfiguration,
    contacts: Arc<dyn ContactRepository>,
    client: Arc<dyn OpenIdClient>,
    username: String,
    claims: Claims,
    tokens: Option<OpenIdTokens>,
}

impl OpenIdProvider {
    pub fn new(
        configuration: ProviderConfiguration,
        contacts: Arc<dyn ContactRepository>,
        client: Arc<dyn OpenIdClient>,
    ) -> Result<Self, ServiceError> {
        let custom = Self::custom_configuration(&configuration)?;
        Ok(Self {
            configuration,
            custom,
            contacts,
            client,
            username: String::new(),
            claims: Claims::new(),
            tokens: None,
        })
    }

    fn custom_configuration(
        configuration: &ProviderConfiguration,
    ) -> Result<OpenIdCustomConfiguration, ServiceError> {
        match (&configuration.provider_type, &configuration.custom_configuration) {
            (ProviderType::OpenId, CustomConfiguration::OpenId(custom)) => Ok((**custom).clone()),
            _ => Err(ServiceError::Configuration(format!(
                "Configuration '{}' is not an OpenID configuration",
                configuration.name
            ))),
        }
    }

    fn claim_as_string(&self, name: &str) -> Option<String> {
        match self.claims.get(name)? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Values of the authorization claim; a string claim may list
    /// several values separated by commas.
    fn claim_values(&self) -> Vec<String> {
        match self.claims.get(&self.custom.claim_name) {
            Some(serde_json::Value::Array(values)) => values
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(serde_json::Value::String(value)) => value
                .split(',')
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl Provider for OpenIdProvider {
    fn configuration(&self) -> &ProviderConfiguration {
        &self.configuration
    }

    fn set_configuration(
        &mut self,
        configuration: ProviderConfiguration,
    ) -> Result<(), ServiceError> {
        self.custom = Self::custom_configuration(&configuration)?;
        self.configuration = configuration;
        Ok(())
    }

    async fn authenticate_or_fail(
        &mut self,
        request: &LoginRequest,
        session: LegacySession,
    ) -> Result<LegacySession, ServiceError> {
        let Credentials::AuthorizationCode { code, redirect_uri } = &request.credentials else {
            return Err(ServiceError::InvalidCredentials);
        };

        let tokens = self
            .client
            .exchange_code(&self.custom, code, redirect_uri)
            .await?;
        self.claims = self
            .client
            .fetch_user_information(&self.custom, &tokens.access_token)
            .await?;
        self.tokens = Some(tokens);

        self.username = self
            .claim_as_string(&self.custom.login_claim)
            .ok_or_else(|| {
                tracing::warn!(
                    login_claim = %self.custom.login_claim,
                    "Login claim missing from user information"
                );
                ServiceError::InvalidCredentials
            })?;

        let contact = self.contacts.find_contact_by_alias(&self.username).await?;
        if contact.is_none() && !self.custom.auto_import {
            tracing::info!(
                contact_alias = %self.username,
                "Identity provider user unknown and auto import disabled"
            );
            return Err(ServiceError::InvalidCredentials);
        }

        Ok(LegacySession {
            session_id: session.session_id,
            contact_id: contact.map(|c| c.contact_id),
        })
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
        self.custom.auto_import
    }

    async fn auto_import(&mut self) -> Result<(), ServiceError> {
        if !self.custom.auto_import {
            return Err(ServiceError::Provider("Auto import is disabled".to_string()));
        }
        if self.username.is_empty() {
            return Err(ServiceError::Provider(
                "Auto import requires an authenticated user".to_string(),
            ));
        }

        let email = self
            .custom
            .email_bind_attribute
            .as_deref()
            .and_then(|attribute| self.claim_as_string(attribute));
        let name = self
            .custom
            .fullname_bind_attribute
            .as_deref()
            .and_then(|attribute| self.claim_as_string(attribute))
            .unwrap_or_else(|| self.username.clone());
        let template_id = self
            .custom
            .contact_template
            .as_ref()
            .map(|t| t.contact_template_id);

        match self.contacts.find_contact_by_alias(&self.username).await? {
            Some(mut existing) => {
                if existing.name != name || existing.email != email {
                    existing.name = name;
                    existing.email = email;
                    self.contacts.update_contact(&existing).await?;
                    tracing::info!(contact_id = existing.contact_id, "Imported contact updated");
                }
            }
            None => {
                let created = self
                    .contacts
                    .create_contact(&NewContact {
                        alias: self.username.clone(),
                        name,
                        email,
                        template_id,
                    })
                    .await?;
                tracing::info!(
                    contact_id = created.contact_id,
                    contact_alias = %created.alias,
                    "Contact imported from identity provider"
                );
            }
        }
        Ok(())
    }

    fn provider_token(&self) -> Result<NewProviderToken, ServiceError> {
        self.tokens
            .as_ref()
            .ok_or_else(|| ServiceError::Provider("No provider token available".to_string()))?
            .provider_token()
    }

    fn provider_refresh_token(&self) -> Option<NewProviderToken> {
        let tokens = self.tokens.as_ref()?;
        match tokens.provider_refresh_token() {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unusable refresh token");
                None
            }
        }
    }

    fn is_update_acl_supported(&self) -> bool {
        true
    }

    fn can_refresh_token(&self) -> bool {
        true
    }

    async fn refresh_token(
        &self,
        tokens: &AuthenticationTokens,
    ) -> Result<Option<RefreshedTokens>, ServiceError> {
        let Some(refresh) = tokens
            .provider_refresh_token
            .as_ref()
            .filter(|t| !t.is_expired_at(Utc::now()))
        else {
            return Ok(None);
        };

        let refreshed = self.client.refresh(&self.custom, &refresh.token).await?;
        Ok(Some(RefreshedTokens {
            provider_token: refreshed.provider_token()?,
            provider_refresh_token: refreshed.provider_refresh_token()?,
        }))
    }

    fn as_claims_provider(&self) -> Option<&dyn ClaimsProvider> {
        Some(self)
    }
}

impl ClaimsProvider for OpenIdProvider {
    fn access_groups_from_claims(&self) -> Vec<AccessGroup> {
        let values = self.claim_values();
        let mut groups: Vec<AccessGroup> = Vec::new();
        for rule in &self.custom.authorization_rules {
            if values.iter().any(|v| v == &rule.claim_value) && !groups.contains(&rule.access_group)
            {
                groups.push(rule.access_group.clone());
            }
        }
        groups
    }

    fn contact_group(&self) -> Option<&ContactGroup> {
        self.custom.contact_group.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuthorizationRule, ContactTemplate, OpenIdConfigurationRecord};
    use crate::services::InMemoryStore;
    use std::sync::Mutex;

    /// Canned identity provider.
    struct StubOpenIdClient {
        pub claims: Claims,
        pub refreshed: Mutex<u32>,
    }

    #[async_trait]
    impl OpenIdClient for StubOpenIdClient {
        async fn exchange_code(
            &self,
            _configuration: &OpenIdCustomConfiguration,
            code: &str,
            _redirect_uri: &str,
        ) -> Result<OpenIdTokens, ServiceError> {
            if code != "good-code" {
                return Err(ServiceError::InvalidCredentials);
            }
            Ok(OpenIdTokens {
                access_token: "access".to_string(),
                expires_in: Some(300),
                refresh_token: Some("refresh".to_string()),
                refresh_expires_in: Some(3600),
            })
        }

        async fn refresh(
            &self,
            _configuration: &OpenIdCustomConfiguration,
            _refresh_token: &str,
        ) -> Result<OpenIdTokens, ServiceError> {
            *self.refreshed.lock().unwrap() += 1;
            Ok(OpenIdTokens {
                access_token: "access-2".to_string(),
                expires_in: Some(300),
                refresh_token: None,
                refresh_expires_in: None,
            })
        }

        async fn fetch_user_information(
            &self,
            _configuration: &OpenIdCustomConfiguration,
            _access_token: &str,
        ) -> Result<Claims, ServiceError> {
            Ok(self.claims.clone())
        }
    }

    fn configuration(auto_import: bool, admins: AccessGroup) -> ProviderConfiguration {
        let record: OpenIdConfigurationRecord = serde_json::from_value(serde_json::json!({
            "base_url": "https://idp.example.com",
            "authorization_endpoint": "/auth",
            "token_endpoint": "/token",
            "userinfo_endpoint": "/userinfo",
            "client_id": "monitoring",
            "client_secret": "s3cret",
            "login_claim": "preferred_username",
            "auto_import": auto_import,
            "contact_template_id": 7,
            "email_bind_attribute": "email",
            "fullname_bind_attribute": "name",
        }))
        .unwrap();
        let custom = record.into_configuration(
            Some(ContactTemplate {
                contact_template_id: 7,
                name: "sso-template".to_string(),
            }),
            Some(ContactGroup {
                contact_group_id: 9,
                name: "sso-users".to_string(),
            }),
            vec![AuthorizationRule {
                claim_value: "monitoring-admins".to_string(),
                access_group: admins,
            }],
        );
        ProviderConfiguration {
            id: Some(2),
            name: "openid".to_string(),
            provider_type: ProviderType::OpenId,
            is_active: true,
            is_forced: false,
            custom_configuration: CustomConfiguration::OpenId(Box::new(custom)),
        }
    }

    fn claims() -> Claims {
        serde_json::json!({
            "preferred_username": "jdoe",
            "email": "jdoe@example.com",
            "name": "John Doe",
            "groups": ["monitoring-admins", "staff"],
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn provider(auto_import: bool) -> (Arc<InMemoryStore>, OpenIdProvider, AccessGroup) {
        let store = Arc::new(InMemoryStore::new());
        let admins = store.add_access_group("admins");
        let client = Arc::new(StubOpenIdClient {
            claims: claims(),
            refreshed: Mutex::new(0),
        });
        let provider =
            OpenIdProvider::new(configuration(auto_import, admins.clone()), store.clone(), client)
                .unwrap();
        (store, provider, admins)
    }

    #[tokio::test]
    async fn auto_imports_unknown_users() {
        let (_store, mut provider, _) = provider(true);
        provider
            .authenticate_or_fail(
                &LoginRequest::for_openid("openid", "good-code", "https://app/callback"),
                LegacySession::new("s"),
            )
            .await
            .unwrap();
        assert!(provider.is_auto_import_supported());
        provider.auto_import().await.unwrap();

        let contact = provider.find_user_or_fail().await.unwrap();
        assert_eq!(contact.alias, "jdoe");
        assert_eq!(contact.name, "John Doe");
        assert_eq!(contact.email.as_deref(), Some("jdoe@example.com"));
        assert_eq!(contact.template_id, Some(7));
        assert_eq!(provider.provider_token().unwrap().token(), "access");
        assert_eq!(provider.provider_refresh_token().unwrap().token(), "refresh");
    }

    #[tokio::test]
    async fn unknown_user_without_auto_import_fails() {
        let (_store, mut provider, _) = provider(false);
        let err = provider
            .authenticate_or_fail(
                &LoginRequest::for_openid("openid", "good-code", "https://app/callback"),
                LegacySession::new("s"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidCredentials));
    }

    #[tokio::test]
    async fn rejected_code_is_an_invalid_credential() {
        let (_store, mut provider, _) = provider(true);
        let err = provider
            .authenticate_or_fail(
                &LoginRequest::for_openid("openid", "bad-code", "https://app/callback"),
                LegacySession::new("s"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidCredentials));
    }

    #[tokio::test]
    async fn maps_claims_to_access_groups() {
        let (store, mut provider, admins) = provider(false);
        store.add_contact("jdoe", "John Doe", false);
        provider
            .authenticate_or_fail(
                &LoginRequest::for_openid("openid", "good-code", "https://app/callback"),
                LegacySession::new("s"),
            )
            .await
            .unwrap();

        let claims_provider = provider.as_claims_provider().unwrap();
        assert_eq!(claims_provider.access_groups_from_claims(), vec![admins]);
        assert_eq!(
            claims_provider.contact_group().map(|g| g.name.as_str()),
            Some("sso-users")
        );
    }

    #[tokio::test]
    async fn refreshes_only_with_a_live_refresh_token() {
        let (_store, provider, _) = provider(false);
        let now = Utc::now();
        let mut tokens = AuthenticationTokens {
            session_token: "t".into(),
            provider_configuration_id: 2,
            contact_id: 1,
            provider_token: crate::models::ProviderToken {
                token_id: 1,
                token: "access".into(),
                created_utc: now - Duration::minutes(10),
                expiry_utc: now - Duration::minutes(5),
            },
            provider_refresh_token: None,
        };
        assert!(provider.refresh_token(&tokens).await.unwrap().is_none());

        tokens.provider_refresh_token = Some(crate::models::ProviderToken {
            token_id: 2,
            token: "refresh".into(),
            created_utc: now - Duration::minutes(10),
            expiry_utc: now + Duration::minutes(50),
        });
        let refreshed = provider.refresh_token(&tokens).await.unwrap().unwrap();
        assert_eq!(refreshed.provider_token.token(), "access-2");
        assert!(refreshed.provider_refresh_token.is_none());
    }

    #[test]
    fn out_of_range_lifetimes_are_provider_errors() {
        let tokens = OpenIdTokens {
            access_token: "access".into(),
            expires_in: Some(i64::MAX),
            refresh_token: Some("refresh".into()),
            refresh_expires_in: Some(i64::MAX),
        };
        assert!(matches!(tokens.provider_token(), Err(ServiceError::Provider(_))));
        assert!(matches!(
            tokens.provider_refresh_token(),
            Err(ServiceError::Provider(_))
        ));

        // Representable as a duration but past the last representable date.
        let tokens = OpenIdTokens {
            expires_in: Some(i64::MAX / 1_000),
            ..tokens
        };
        assert!(tokens.provider_token().is_err());
    }

    #[test]
    fn missing_lifetime_defaults_to_one_hour() {
        let tokens = OpenIdTokens {
            access_token: "access".into(),
            expires_in: None,
            refresh_token: Some("refresh".into()),
            refresh_expires_in: None,
        };
        let access = tokens.provider_token().unwrap();
        assert_eq!(access.expiry_utc() - access.created_utc(), Duration::hours(1));
        let refresh = tokens.provider_refresh_token().unwrap().unwrap();
        assert_eq!(refresh.expiry_utc() - refresh.created_utc(), Duration::hours(1));
    }
}
