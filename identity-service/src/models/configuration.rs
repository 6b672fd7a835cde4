//! Provider configuration model.

use serde::Serialize;
use sqlx::FromRow;

use crate::models::{LocalCustomConfiguration, OpenIdCustomConfiguration};

/// Configuration name of the local credential store.
pub const LOCAL: &str = "local";
/// Configuration name of the OpenID Connect provider.
pub const OPENID: &str = "openid";
/// Internal web-sso configuration; never listed nor resolvable as a provider.
pub const WEB_SSO: &str = "web-sso";

/// Provider types known to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Local,
    OpenId,
    #[serde(rename = "web-sso")]
    WebSso,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Local => LOCAL,
            ProviderType::OpenId => OPENID,
            ProviderType::WebSso => WEB_SSO,
        }
    }
}

impl std::str::FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            LOCAL => Ok(ProviderType::Local),
            OPENID => Ok(ProviderType::OpenId),
            WEB_SSO => Ok(ProviderType::WebSso),
            _ => Err(format!("Unknown provider type: {}", s)),
        }
    }
}

/// Provider-specific part of a configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum CustomConfiguration {
    Local(LocalCustomConfiguration),
    OpenId(Box<OpenIdCustomConfiguration>),
}

/// Decoded provider configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfiguration {
    pub id: Option<i64>,
    pub name: String,
    pub provider_type: ProviderType,
    pub is_active: bool,
    pub is_forced: bool,
    pub custom_configuration: CustomConfiguration,
}

impl ProviderConfiguration {
    pub fn local(&self) -> Option<&LocalCustomConfiguration> {
        match &self.custom_configuration {
            CustomConfiguration::Local(local) => Some(local),
            _ => None,
        }
    }

    pub fn openid(&self) -> Option<&OpenIdCustomConfiguration> {
        match &self.custom_configuration {
            CustomConfiguration::OpenId(openid) => Some(openid),
            _ => None,
        }
    }
}

/// Raw `provider_configuration` row.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ConfigurationRecord {
    pub id: i64,
    pub name: String,
    #[sqlx(rename = "type")]
    pub provider_type: String,
    pub custom_configuration: String,
    pub is_active: bool,
    pub is_forced: bool,
}

/// Configuration listing entry.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigurationSummary {
    pub id: Option<i64>,
    pub name: String,
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    pub is_active: bool,
    pub is_forced: bool,
}

impl From<&ProviderConfiguration> for ConfigurationSummary {
    fn from(c: &ProviderConfiguration) -> Self {
        Self {
            id: c.id,
            name: c.name.clone(),
            provider_type: c.provider_type,
            is_active: c.is_active,
            is_forced: c.is_forced,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_type_round_trips_names() {
        for t in [ProviderType::Local, ProviderType::OpenId, ProviderType::WebSso] {
            assert_eq!(t.as_str().parse::<ProviderType>().unwrap(), t);
        }
        assert_eq!("OpenID".parse::<ProviderType>().unwrap(), ProviderType::OpenId);
        assert!("ldap".parse::<ProviderType>().is_err());
    }
}
