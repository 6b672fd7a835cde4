//! Provider configuration loading.
//!
//! Reads the base configuration row, then decodes its provider-specific
//! payload according to the configuration name.

use std::sync::Arc;

use validator::Validate;

use crate::models::configuration::{LOCAL, OPENID, WEB_SSO};
use crate::models::{
    ConfigurationRecord, CustomConfiguration, LocalConfigurationRecord, LocalCustomConfiguration,
    OpenIdConfigurationRecord, ProviderConfiguration, ProviderType, SecurityPolicy,
};
use crate::services::repositories::ConfigurationReader;
use crate::services::ServiceError;

#[derive(Clone)]
pub struct ConfigurationFactory {
    reader: Arc<dyn ConfigurationReader>,
}

impl ConfigurationFactory {
    pub fn new(reader: Arc<dyn ConfigurationReader>) -> Self {
        Self { reader }
    }

    pub async fn get_configuration_by_name(
        &self,
        name: &str,
    ) -> Result<ProviderConfiguration, ServiceError> {
        let record = self
            .reader
            .find_configuration_by_name(name)
            .await?
            .ok_or_else(|| ServiceError::ProviderNotFound(name.to_string()))?;
        self.decode(record).await
    }

    pub async fn get_configuration_by_id(
        &self,
        id: i64,
    ) -> Result<ProviderConfiguration, ServiceError> {
        let record = self
            .reader
            .find_configuration_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::ProviderNotFound(format!("#{}", id)))?;
        self.decode(record).await
    }

    /// Every active configuration, the internal web-sso one excluded.
    pub async fn get_configurations(&self) -> Result<Vec<ProviderConfiguration>, ServiceError> {
        let records = self.reader.find_configurations().await?;
        let mut configurations = Vec::with_capacity(records.len());
        for record in records {
            if record.name == WEB_SSO || !record.is_active {
                continue;
            }
            configurations.push(self.decode(record).await?);
        }
        Ok(configurations)
    }

    /// Security policy of the Local provider.
    pub async fn find_local_policy(&self) -> Result<SecurityPolicy, ServiceError> {
        let configuration = self.get_configuration_by_name(LOCAL).await?;
        configuration
            .local()
            .map(|local| local.security_policy.clone())
            .ok_or_else(|| ServiceError::configuration_load(LOCAL, "not a local configuration"))
    }

    async fn decode(&self, record: ConfigurationRecord) -> Result<ProviderConfiguration, ServiceError> {
        let provider_type: ProviderType = record
            .provider_type
            .parse()
            .map_err(|e: String| ServiceError::configuration_load(&record.name, e))?;

        let custom_configuration = match record.name.as_str() {
            LOCAL => CustomConfiguration::Local(self.decode_local(&record).await?),
            OPENID => CustomConfiguration::OpenId(Box::new(self.decode_openid(&record).await?)),
            other => {
                return Err(ServiceError::configuration_load(
                    other,
                    "unknown provider configuration",
                ))
            }
        };

        tracing::debug!(
            configuration_id = record.id,
            provider_name = %record.name,
            "Provider configuration loaded"
        );

        Ok(ProviderConfiguration {
            id: Some(record.id),
            name: record.name,
            provider_type,
            is_active: record.is_active,
            is_forced: record.is_forced,
            custom_configuration,
        })
    }

    async fn decode_local(
        &self,
        record: &ConfigurationRecord,
    ) -> Result<LocalCustomConfiguration, ServiceError> {
        let payload: LocalConfigurationRecord = serde_json::from_str(&record.custom_configuration)
            .map_err(|e| ServiceError::configuration_load(&record.name, e))?;
        payload
            .password_security_policy
            .validate()
            .map_err(|e| ServiceError::configuration_load(&record.name, e))?;

        let excluded = self.reader.find_excluded_user_aliases(record.id).await?;
        Ok(LocalCustomConfiguration {
            security_policy: payload.password_security_policy.into_policy(excluded),
        })
    }

    async fn decode_openid(
        &self,
        record: &ConfigurationRecord,
    ) -> Result<crate::models::OpenIdCustomConfiguration, ServiceError> {
        let payload: OpenIdConfigurationRecord =
            serde_json::from_str(&record.custom_configuration)
                .map_err(|e| ServiceError::configuration_load(&record.name, e))?;
        payload
            .validate()
            .map_err(|e| ServiceError::configuration_load(&record.name, e))?;

        let contact_template = match payload.contact_template_id {
            Some(id) => Some(self.reader.find_contact_template(id).await?.ok_or_else(|| {
                ServiceError::configuration_load(
                    &record.name,
                    format!("contact template {} does not exist", id),
                )
            })?),
            None => None,
        };

        let contact_group = match payload.contact_group_id {
            Some(id) => Some(self.reader.find_contact_group(id).await?.ok_or_else(|| {
                ServiceError::configuration_load(
                    &record.name,
                    format!("contact group {} does not exist", id),
                )
            })?),
            None => None,
        };

        let rules = self.reader.find_authorization_rules(record.id).await?;
        Ok(payload.into_configuration(contact_template, contact_group, rules))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryStore;

    fn local_json() -> serde_json::Value {
        serde_json::json!({
            "password_security_policy": {
                "password_length": 12,
                "has_uppercase_characters": true,
                "has_lowercase_characters": true,
                "has_numbers": true,
                "has_special_characters": true,
                "can_reuse_passwords": false,
                "attempts": 5,
                "blocking_duration": 900,
                "password_expiration_delay": 7_776_000,
                "delay_before_new_password": 3_600
            }
        })
    }

    fn openid_json(contact_group_id: Option<i64>) -> serde_json::Value {
        serde_json::json!({
            "base_url": "https://idp.example.com/realms/main",
            "authorization_endpoint": "/auth",
            "token_endpoint": "/token",
            "client_id": "monitoring",
            "client_secret": "s3cret",
            "contact_group_id": contact_group_id,
        })
    }

    #[tokio::test]
    async fn decodes_local_policy_with_excluded_aliases() {
        let store = Arc::new(InMemoryStore::new());
        let id = store.add_configuration(LOCAL, "local", local_json(), true);
        store.add_excluded_alias(id, "admin");
        let factory = ConfigurationFactory::new(store);

        let policy = factory.find_local_policy().await.unwrap();
        assert_eq!(policy.password_min_length, 12);
        assert_eq!(policy.attempts, Some(5));
        assert_eq!(policy.blocking_duration, Some(chrono::Duration::minutes(15)));
        assert_eq!(policy.excluded_user_aliases, vec!["admin".to_string()]);
    }

    #[tokio::test]
    async fn resolves_openid_references() {
        let store = Arc::new(InMemoryStore::new());
        let group = store.add_contact_group("sso-users");
        let id = store.add_configuration(
            OPENID,
            "openid",
            openid_json(Some(group.contact_group_id)),
            true,
        );
        let admins = store.add_access_group("admins");
        store.add_authorization_rule(id, "monitoring-admins", admins.clone());
        let factory = ConfigurationFactory::new(store);

        let configuration = factory.get_configuration_by_id(id).await.unwrap();
        let openid = configuration.openid().unwrap();
        assert_eq!(openid.contact_group, Some(group));
        assert_eq!(openid.authorization_rules.len(), 1);
        assert_eq!(openid.authorization_rules[0].access_group, admins);
    }

    #[tokio::test]
    async fn dangling_contact_group_is_a_load_error() {
        let store = Arc::new(InMemoryStore::new());
        store.add_configuration(OPENID, "openid", openid_json(Some(999)), true);
        let factory = ConfigurationFactory::new(store);

        let err = factory.get_configuration_by_name(OPENID).await.unwrap_err();
        assert!(matches!(err, ServiceError::ConfigurationLoad { .. }));
    }

    #[tokio::test]
    async fn malformed_payload_and_unknown_name_fail_to_load() {
        let store = Arc::new(InMemoryStore::new());
        store.add_configuration(LOCAL, "local", serde_json::json!({"oops": true}), true);
        store.add_configuration("ldap", "local", serde_json::json!({}), true);
        let factory = ConfigurationFactory::new(store);

        assert!(matches!(
            factory.get_configuration_by_name(LOCAL).await,
            Err(ServiceError::ConfigurationLoad { .. })
        ));
        assert!(matches!(
            factory.get_configuration_by_name("ldap").await,
            Err(ServiceError::ConfigurationLoad { .. })
        ));
        assert!(matches!(
            factory.get_configuration_by_name("missing").await,
            Err(ServiceError::ProviderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn listing_skips_web_sso_and_inactive() {
        let store = Arc::new(InMemoryStore::new());
        store.add_configuration(LOCAL, "local", local_json(), true);
        store.add_configuration(OPENID, "openid", openid_json(None), true);
        store.add_configuration(WEB_SSO, "web-sso", serde_json::json!({}), true);
        let factory = ConfigurationFactory::new(store.clone());

        let names: Vec<String> = factory
            .get_configurations()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec![LOCAL.to_string(), OPENID.to_string()]);

        store.set_configuration_active(OPENID, false);
        assert_eq!(factory.get_configurations().await.unwrap().len(), 1);
    }
}
