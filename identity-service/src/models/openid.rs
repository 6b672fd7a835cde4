//! OpenID Connect provider configuration and authorization mapping.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::{Validate, ValidationError};

/// Access group a contact can be granted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, FromRow)]
pub struct AccessGroup {
    pub access_group_id: i64,
    pub name: String,
}

/// Contact group a contact can belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ContactGroup {
    pub contact_group_id: i64,
    pub name: String,
}

/// Contact template applied to auto-imported contacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ContactTemplate {
    pub contact_template_id: i64,
    pub name: String,
}

/// Grants `access_group` to users whose claim contains `claim_value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRule {
    pub claim_value: String,
    pub access_group: AccessGroup,
}

/// How the client authenticates against the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthentication {
    ClientSecretPost,
    ClientSecretBasic,
}

/// Claims returned by the identity provider.
pub type Claims = serde_json::Map<String, serde_json::Value>;

/// Decoded OpenID custom configuration, with referenced entities resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenIdCustomConfiguration {
    pub base_url: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub introspection_token_endpoint: Option<String>,
    pub userinfo_endpoint: Option<String>,
    pub endsession_endpoint: Option<String>,
    pub connection_scopes: Vec<String>,
    pub login_claim: String,
    pub client_id: String,
    pub client_secret: String,
    pub authentication_type: ClientAuthentication,
    pub verify_peer: bool,
    pub auto_import: bool,
    pub contact_template: Option<ContactTemplate>,
    pub email_bind_attribute: Option<String>,
    pub fullname_bind_attribute: Option<String>,
    pub contact_group: Option<ContactGroup>,
    pub claim_name: String,
    pub authorization_rules: Vec<AuthorizationRule>,
}

impl OpenIdCustomConfiguration {
    /// Absolute endpoints are used as-is, relative ones hang off `base_url`.
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    pub fn token_url(&self) -> String {
        self.endpoint_url(&self.token_endpoint)
    }

    pub fn userinfo_url(&self) -> Option<String> {
        self.userinfo_endpoint
            .as_deref()
            .map(|e| self.endpoint_url(e))
    }

    pub fn introspection_url(&self) -> Option<String> {
        self.introspection_token_endpoint
            .as_deref()
            .map(|e| self.endpoint_url(e))
    }
}

fn default_login_claim() -> String {
    "sub".to_string()
}

fn default_claim_name() -> String {
    "groups".to_string()
}

fn default_authentication_type() -> ClientAuthentication {
    ClientAuthentication::ClientSecretPost
}

fn default_true() -> bool {
    true
}

/// JSON payload stored in `provider_configuration.custom_configuration`.
///
/// Unknown fields are rejected so that a mistyped key surfaces as a load
/// error instead of a silently ignored setting.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_auto_import"))]
pub struct OpenIdConfigurationRecord {
    #[validate(url)]
    pub base_url: String,
    #[validate(length(min = 1))]
    pub authorization_endpoint: String,
    #[validate(length(min = 1))]
    pub token_endpoint: String,
    #[serde(default)]
    pub introspection_token_endpoint: Option<String>,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    #[serde(default)]
    pub endsession_endpoint: Option<String>,
    #[serde(default)]
    pub connection_scopes: Vec<String>,
    #[serde(default = "default_login_claim")]
    #[validate(length(min = 1))]
    pub login_claim: String,
    #[validate(length(min = 1))]
    pub client_id: String,
    #[validate(length(min = 1))]
    pub client_secret: String,
    #[serde(default = "default_authentication_type")]
    pub authentication_type: ClientAuthentication,
    #[serde(default = "default_true")]
    pub verify_peer: bool,
    #[serde(default)]
    pub auto_import: bool,
    #[serde(default)]
    pub contact_template_id: Option<i64>,
    #[serde(default)]
    pub email_bind_attribute: Option<String>,
    #[serde(default)]
    pub fullname_bind_attribute: Option<String>,
    #[serde(default)]
    pub contact_group_id: Option<i64>,
    #[serde(default = "default_claim_name")]
    pub claim_name: String,
}

fn validate_auto_import(record: &OpenIdConfigurationRecord) -> Result<(), ValidationError> {
    if !record.auto_import {
        return Ok(());
    }
    let missing = record.contact_template_id.is_none()
        || record.email_bind_attribute.as_deref().map_or(true, str::is_empty)
        || record.fullname_bind_attribute.as_deref().map_or(true, str::is_empty);
    if missing {
        let mut err = ValidationError::new("auto_import");
        err.message = Some(
            "auto_import requires contact_template_id, email_bind_attribute and fullname_bind_attribute"
                .into(),
        );
        return Err(err);
    }
    Ok(())
}

impl OpenIdConfigurationRecord {
    pub fn into_configuration(
        self,
        contact_template: Option<ContactTemplate>,
        contact_group: Option<ContactGroup>,
        authorization_rules: Vec<AuthorizationRule>,
    ) -> OpenIdCustomConfiguration {
        OpenIdCustomConfiguration {
            base_url: self.base_url,
            authorization_endpoint: self.authorization_endpoint,
            token_endpoint: self.token_endpoint,
            introspection_token_endpoint: self.introspection_token_endpoint,
            userinfo_endpoint: self.userinfo_endpoint,
            endsession_endpoint: self.endsession_endpoint,
            connection_scopes: self.connection_scopes,
            login_claim: self.login_claim,
            client_id: self.client_id,
            client_secret: self.client_secret,
            authentication_type: self.authentication_type,
            verify_peer: self.verify_peer,
            auto_import: self.auto_import,
            contact_template,
            email_bind_attribute: self.email_bind_attribute,
            fullname_bind_attribute: self.fullname_bind_attribute,
            contact_group,
            claim_name: self.claim_name,
            authorization_rules,
        }
    }
}
