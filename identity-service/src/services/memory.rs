//! In-memory implementation of the persistence contracts.
//!
//! Backs the integration tests and local runs without PostgreSQL. Failure
//! switches let tests make individual operations fail.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::models::{
    AccessGroup, AuthenticationTokens, AuthorizationRule, ConfigurationRecord, Contact,
    ContactGroup, ContactTemplate, LocalAccount, LockoutState, NewContact, NewProviderToken,
    PasswordRecord, ProviderToken, RefreshedTokens, SecurityPolicy,
};
use crate::services::policy::SecurityPolicyEvaluator;
use crate::services::repositories::{
    AclStore, AclTransaction, ConfigurationReader, ContactRepository, HealthCheck,
    LoginAttemptRepository, TokenRepository,
};
use crate::services::ServiceError;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn injected(operation: &str) -> ServiceError {
    ServiceError::Internal(anyhow::anyhow!("Injected failure: {}", operation))
}

#[derive(Default)]
struct ConfigurationData {
    records: Vec<ConfigurationRecord>,
    excluded_aliases: HashMap<i64, Vec<String>>,
    templates: HashMap<i64, ContactTemplate>,
    contact_groups: HashMap<i64, ContactGroup>,
    rules: HashMap<i64, Vec<AuthorizationRule>>,
}

#[derive(Default)]
struct AclData {
    access_groups: HashMap<i64, Vec<AccessGroup>>,
    contact_groups: HashMap<i64, Vec<ContactGroup>>,
}

#[derive(Debug, Clone)]
struct StoredAuthentication {
    provider_configuration_id: i64,
    contact_id: i64,
    provider_token_id: i64,
    refresh_token_id: Option<i64>,
}

#[derive(Default)]
struct FailureSwitches {
    token_persistence: AtomicBool,
    token_purge: AtomicBool,
    access_group_insert: AtomicBool,
    contact_group_insert: AtomicBool,
}

/// Thread-safe in-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    configurations: Mutex<ConfigurationData>,
    contacts: Mutex<Vec<Contact>>,
    passwords: Mutex<Vec<PasswordRecord>>,
    login_attempts: DashMap<i64, LockoutState>,
    provider_tokens: DashMap<i64, ProviderToken>,
    authentication_tokens: DashMap<String, StoredAuthentication>,
    acl: Arc<Mutex<AclData>>,
    next_id: AtomicI64,
    failures: Arc<FailureSwitches>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    // ==================== Seeding ====================

    /// Add a provider configuration; `custom_configuration` is the stored JSON.
    pub fn add_configuration(
        &self,
        name: &str,
        provider_type: &str,
        custom_configuration: serde_json::Value,
        is_active: bool,
    ) -> i64 {
        let id = self.next_id();
        guard(&self.configurations).records.push(ConfigurationRecord {
            id,
            name: name.to_string(),
            provider_type: provider_type.to_string(),
            custom_configuration: custom_configuration.to_string(),
            is_active,
            is_forced: false,
        });
        id
    }

    pub fn set_configuration_active(&self, name: &str, is_active: bool) {
        let mut data = guard(&self.configurations);
        if let Some(record) = data.records.iter_mut().find(|r| r.name == name) {
            record.is_active = is_active;
        }
    }

    pub fn add_excluded_alias(&self, configuration_id: i64, alias: &str) {
        guard(&self.configurations)
            .excluded_aliases
            .entry(configuration_id)
            .or_default()
            .push(alias.to_string());
    }

    pub fn add_contact_template(&self, name: &str) -> ContactTemplate {
        let template = ContactTemplate {
            contact_template_id: self.next_id(),
            name: name.to_string(),
        };
        guard(&self.configurations)
            .templates
            .insert(template.contact_template_id, template.clone());
        template
    }

    pub fn add_contact_group(&self, name: &str) -> ContactGroup {
        let group = ContactGroup {
            contact_group_id: self.next_id(),
            name: name.to_string(),
        };
        guard(&self.configurations)
            .contact_groups
            .insert(group.contact_group_id, group.clone());
        group
    }

    pub fn add_access_group(&self, name: &str) -> AccessGroup {
        AccessGroup {
            access_group_id: self.next_id(),
            name: name.to_string(),
        }
    }

    pub fn add_authorization_rule(
        &self,
        configuration_id: i64,
        claim_value: &str,
        access_group: AccessGroup,
    ) {
        guard(&self.configurations)
            .rules
            .entry(configuration_id)
            .or_default()
            .push(AuthorizationRule {
                claim_value: claim_value.to_string(),
                access_group,
            });
    }

    pub fn add_contact(&self, alias: &str, name: &str, is_admin: bool) -> Contact {
        let contact = Contact {
            contact_id: self.next_id(),
            alias: alias.to_string(),
            name: name.to_string(),
            email: None,
            is_admin,
            template_id: None,
        };
        guard(&self.contacts).push(contact.clone());
        contact
    }

    pub fn add_password_hash(&self, contact_id: i64, password_hash: &str, created_utc: DateTime<Utc>) {
        guard(&self.passwords).push(PasswordRecord {
            contact_id,
            password_hash: password_hash.to_string(),
            created_utc,
        });
    }

    /// Replace the access groups of a contact outside any transaction.
    pub fn set_access_groups(&self, contact_id: i64, access_groups: Vec<AccessGroup>) {
        guard(&self.acl)
            .access_groups
            .insert(contact_id, access_groups);
    }

    /// Drop authentication tokens whose provider token and refresh token are
    /// both expired at `now`, then provider tokens nothing references.
    fn purge_expired_tokens_at(&self, now: DateTime<Utc>) -> u64 {
        let is_expired = |token_id: &i64| {
            self.provider_tokens
                .get(token_id)
                .map_or(true, |t| t.is_expired_at(now))
        };

        let expired: Vec<String> = self
            .authentication_tokens
            .iter()
            .filter(|entry| {
                is_expired(&entry.provider_token_id)
                    && entry.refresh_token_id.as_ref().map_or(true, is_expired)
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut deleted = 0;
        for token in expired {
            if self.authentication_tokens.remove(&token).is_some() {
                deleted += 1;
            }
        }

        let referenced: Vec<i64> = self
            .authentication_tokens
            .iter()
            .flat_map(|entry| {
                std::iter::once(entry.provider_token_id).chain(entry.refresh_token_id)
            })
            .collect();
        self.provider_tokens
            .retain(|id, token| !token.is_expired_at(now) || referenced.contains(id));

        deleted
    }

    pub fn set_lockout_state(&self, contact_id: i64, state: LockoutState) {
        self.login_attempts.insert(contact_id, state);
    }

    // ==================== Inspection ====================

    pub fn access_groups_of(&self, contact_id: i64) -> Vec<AccessGroup> {
        guard(&self.acl)
            .access_groups
            .get(&contact_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn contact_groups_of(&self, contact_id: i64) -> Vec<ContactGroup> {
        guard(&self.acl)
            .contact_groups
            .get(&contact_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn authentication_token_count(&self) -> usize {
        self.authentication_tokens.len()
    }

    pub fn provider_token_count(&self) -> usize {
        self.provider_tokens.len()
    }

    pub fn lockout_state(&self, contact_id: i64) -> LockoutState {
        self.login_attempts
            .get(&contact_id)
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }

    // ==================== Failure injection ====================

    pub fn fail_token_persistence(&self, fail: bool) {
        self.failures.token_persistence.store(fail, Ordering::SeqCst);
    }

    pub fn fail_token_purge(&self, fail: bool) {
        self.failures.token_purge.store(fail, Ordering::SeqCst);
    }

    pub fn fail_access_group_insert(&self, fail: bool) {
        self.failures.access_group_insert.store(fail, Ordering::SeqCst);
    }

    pub fn fail_contact_group_insert(&self, fail: bool) {
        self.failures.contact_group_insert.store(fail, Ordering::SeqCst);
    }

    fn store_provider_token(&self, token: &NewProviderToken) -> i64 {
        let token_id = self.next_id();
        self.provider_tokens.insert(
            token_id,
            ProviderToken {
                token_id,
                token: token.token().to_string(),
                created_utc: token.created_utc(),
                expiry_utc: token.expiry_utc(),
            },
        );
        token_id
    }
}

#[async_trait]
impl HealthCheck for InMemoryStore {
    async fn health_check(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

#[async_trait]
impl ConfigurationReader for InMemoryStore {
    async fn find_configuration_by_name(
        &self,
        name: &str,
    ) -> Result<Option<ConfigurationRecord>, ServiceError> {
        Ok(guard(&self.configurations)
            .records
            .iter()
            .find(|r| r.name == name)
            .cloned())
    }

    async fn find_configuration_by_id(
        &self,
        id: i64,
    ) -> Result<Option<ConfigurationRecord>, ServiceError> {
        Ok(guard(&self.configurations)
            .records
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn find_configurations(&self) -> Result<Vec<ConfigurationRecord>, ServiceError> {
        Ok(guard(&self.configurations).records.clone())
    }

    async fn find_excluded_user_aliases(
        &self,
        configuration_id: i64,
    ) -> Result<Vec<String>, ServiceError> {
        Ok(guard(&self.configurations)
            .excluded_aliases
            .get(&configuration_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_contact_template(
        &self,
        contact_template_id: i64,
    ) -> Result<Option<ContactTemplate>, ServiceError> {
        Ok(guard(&self.configurations)
            .templates
            .get(&contact_template_id)
            .cloned())
    }

    async fn find_contact_group(
        &self,
        contact_group_id: i64,
    ) -> Result<Option<ContactGroup>, ServiceError> {
        Ok(guard(&self.configurations)
            .contact_groups
            .get(&contact_group_id)
            .cloned())
    }

    async fn find_authorization_rules(
        &self,
        configuration_id: i64,
    ) -> Result<Vec<AuthorizationRule>, ServiceError> {
        Ok(guard(&self.configurations)
            .rules
            .get(&configuration_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl TokenRepository for InMemoryStore {
    async fn create_authentication_tokens(
        &self,
        token: &str,
        provider_configuration_id: i64,
        contact_id: i64,
        provider_token: &NewProviderToken,
        provider_refresh_token: Option<&NewProviderToken>,
    ) -> Result<(), ServiceError> {
        if self.failures.token_persistence.load(Ordering::SeqCst) {
            return Err(injected("create_authentication_tokens"));
        }

        let configuration_exists = guard(&self.configurations)
            .records
            .iter()
            .any(|r| r.id == provider_configuration_id);
        let contact_exists = guard(&self.contacts)
            .iter()
            .any(|c| c.contact_id == contact_id);
        if !configuration_exists || !contact_exists {
            return Err(ServiceError::Internal(anyhow::anyhow!(
                "Unknown provider configuration {} or contact {}",
                provider_configuration_id,
                contact_id
            )));
        }
        if self.authentication_tokens.contains_key(token) {
            return Err(ServiceError::Internal(anyhow::anyhow!(
                "Duplicate authentication token"
            )));
        }

        let provider_token_id = self.store_provider_token(provider_token);
        let refresh_token_id = provider_refresh_token.map(|t| self.store_provider_token(t));

        self.authentication_tokens.insert(
            token.to_string(),
            StoredAuthentication {
                provider_configuration_id,
                contact_id,
                provider_token_id,
                refresh_token_id,
            },
        );
        Ok(())
    }

    async fn delete_expired_tokens(&self) -> Result<u64, ServiceError> {
        if self.failures.token_purge.load(Ordering::SeqCst) {
            return Err(injected("delete_expired_tokens"));
        }

        Ok(self.purge_expired_tokens_at(Utc::now()))
    }

    async fn find_authentication_tokens(
        &self,
        token: &str,
    ) -> Result<Option<AuthenticationTokens>, ServiceError> {
        let Some(stored) = self.authentication_tokens.get(token).map(|s| s.value().clone()) else {
            return Ok(None);
        };
        let Some(provider_token) = self
            .provider_tokens
            .get(&stored.provider_token_id)
            .map(|t| t.value().clone())
        else {
            return Ok(None);
        };
        let provider_refresh_token = stored
            .refresh_token_id
            .and_then(|id| self.provider_tokens.get(&id).map(|t| t.value().clone()));

        Ok(Some(AuthenticationTokens {
            session_token: token.to_string(),
            provider_configuration_id: stored.provider_configuration_id,
            contact_id: stored.contact_id,
            provider_token,
            provider_refresh_token,
        }))
    }

    async fn update_provider_tokens(
        &self,
        token: &str,
        refreshed: &RefreshedTokens,
    ) -> Result<(), ServiceError> {
        if !self.authentication_tokens.contains_key(token) {
            return Err(ServiceError::InvalidToken);
        }
        let provider_token_id = self.store_provider_token(&refreshed.provider_token);
        let refresh_token_id = refreshed
            .provider_refresh_token
            .as_ref()
            .map(|t| self.store_provider_token(t));

        let mut stored = self
            .authentication_tokens
            .get_mut(token)
            .ok_or(ServiceError::InvalidToken)?;
        stored.provider_token_id = provider_token_id;
        if refresh_token_id.is_some() {
            stored.refresh_token_id = refresh_token_id;
        }
        Ok(())
    }
}

#[async_trait]
impl ContactRepository for InMemoryStore {
    async fn find_local_account(&self, alias: &str) -> Result<Option<LocalAccount>, ServiceError> {
        let Some(contact) = self.find_contact_by_alias(alias).await? else {
            return Ok(None);
        };
        let password = guard(&self.passwords)
            .iter()
            .filter(|p| p.contact_id == contact.contact_id)
            .max_by_key(|p| p.created_utc)
            .cloned();
        Ok(Some(LocalAccount { contact, password }))
    }

    async fn find_contact_by_alias(&self, alias: &str) -> Result<Option<Contact>, ServiceError> {
        Ok(guard(&self.contacts)
            .iter()
            .find(|c| c.alias == alias)
            .cloned())
    }

    async fn find_contact_by_id(&self, contact_id: i64) -> Result<Option<Contact>, ServiceError> {
        Ok(guard(&self.contacts)
            .iter()
            .find(|c| c.contact_id == contact_id)
            .cloned())
    }

    async fn create_contact(&self, contact: &NewContact) -> Result<Contact, ServiceError> {
        let mut contacts = guard(&self.contacts);
        if contacts.iter().any(|c| c.alias == contact.alias) {
            return Err(ServiceError::Internal(anyhow::anyhow!(
                "Contact alias '{}' already exists",
                contact.alias
            )));
        }
        let created = Contact {
            contact_id: self.next_id(),
            alias: contact.alias.clone(),
            name: contact.name.clone(),
            email: contact.email.clone(),
            is_admin: false,
            template_id: contact.template_id,
        };
        contacts.push(created.clone());
        Ok(created)
    }

    async fn update_contact(&self, contact: &Contact) -> Result<(), ServiceError> {
        let mut contacts = guard(&self.contacts);
        if let Some(existing) = contacts
            .iter_mut()
            .find(|c| c.contact_id == contact.contact_id)
        {
            existing.name = contact.name.clone();
            existing.email = contact.email.clone();
            existing.template_id = contact.template_id;
        }
        Ok(())
    }

    async fn find_password_history(
        &self,
        contact_id: i64,
        limit: usize,
    ) -> Result<Vec<PasswordRecord>, ServiceError> {
        let mut history: Vec<PasswordRecord> = guard(&self.passwords)
            .iter()
            .filter(|p| p.contact_id == contact_id)
            .cloned()
            .collect();
        history.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        history.truncate(limit);
        Ok(history)
    }

    async fn add_password(
        &self,
        contact_id: i64,
        password_hash: &str,
        created_utc: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        self.add_password_hash(contact_id, password_hash, created_utc);
        Ok(())
    }
}

#[async_trait]
impl LoginAttemptRepository for InMemoryStore {
    async fn find_lockout_state(&self, contact_id: i64) -> Result<LockoutState, ServiceError> {
        Ok(self.lockout_state(contact_id))
    }

    async fn record_failed_attempt(
        &self,
        contact_id: i64,
        policy: &SecurityPolicy,
        now: DateTime<Utc>,
    ) -> Result<LockoutState, ServiceError> {
        // The entry guard holds the shard lock across the read and the write.
        let mut entry = self.login_attempts.entry(contact_id).or_default();
        let next = SecurityPolicyEvaluator::record_failed_attempt(entry.value(), policy, now);
        *entry.value_mut() = next.clone();
        Ok(next)
    }

    async fn clear_lockout_state(&self, contact_id: i64) -> Result<(), ServiceError> {
        self.login_attempts.remove(&contact_id);
        Ok(())
    }
}

/// Staged ACL changes, applied to the shared state on commit only.
pub struct MemoryAclTransaction {
    shared: Arc<Mutex<AclData>>,
    failures: Arc<FailureSwitches>,
    access_groups: HashMap<i64, Vec<AccessGroup>>,
    contact_groups: HashMap<i64, Vec<ContactGroup>>,
}

#[async_trait]
impl AclStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn AclTransaction>, ServiceError> {
        Ok(Box::new(MemoryAclTransaction {
            shared: Arc::clone(&self.acl),
            failures: Arc::clone(&self.failures),
            access_groups: HashMap::new(),
            contact_groups: HashMap::new(),
        }))
    }
}

#[async_trait]
impl AclTransaction for MemoryAclTransaction {
    async fn delete_access_groups_for_user(
        &mut self,
        contact_id: i64,
    ) -> Result<(), ServiceError> {
        self.access_groups.insert(contact_id, Vec::new());
        Ok(())
    }

    async fn insert_access_groups_for_user(
        &mut self,
        contact_id: i64,
        access_groups: &[AccessGroup],
    ) -> Result<(), ServiceError> {
        if self.failures.access_group_insert.load(Ordering::SeqCst) {
            return Err(injected("insert_access_groups_for_user"));
        }
        let current = guard(&self.shared)
            .access_groups
            .get(&contact_id)
            .cloned()
            .unwrap_or_default();
        let staged = self.access_groups.entry(contact_id).or_insert(current);
        for group in access_groups {
            if !staged.contains(group) {
                staged.push(group.clone());
            }
        }
        Ok(())
    }

    async fn delete_contact_groups_for_user(
        &mut self,
        contact_id: i64,
    ) -> Result<(), ServiceError> {
        self.contact_groups.insert(contact_id, Vec::new());
        Ok(())
    }

    async fn insert_contact_group_for_user(
        &mut self,
        contact_id: i64,
        contact_group: &ContactGroup,
    ) -> Result<(), ServiceError> {
        if self.failures.contact_group_insert.load(Ordering::SeqCst) {
            return Err(injected("insert_contact_group_for_user"));
        }
        let current = guard(&self.shared)
            .contact_groups
            .get(&contact_id)
            .cloned()
            .unwrap_or_default();
        let staged = self.contact_groups.entry(contact_id).or_insert(current);
        if !staged.contains(contact_group) {
            staged.push(contact_group.clone());
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), ServiceError> {
        let this = *self;
        let mut shared = guard(&this.shared);
        shared.access_groups.extend(this.access_groups);
        shared.contact_groups.extend(this.contact_groups);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), ServiceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn tokens_expiring_exactly_now_are_purged() {
        let store = InMemoryStore::new();
        let configuration_id =
            store.add_configuration("local", "local", serde_json::json!({}), true);
        let contact = store.add_contact("jdoe", "John Doe", false);
        let now = Utc::now();
        let token = |expiry| {
            NewProviderToken::new("p".to_string(), now - Duration::hours(1), expiry).unwrap()
        };
        let live = now + Duration::seconds(1);
        let tokens = [
            ("at-expiry", token(now), None),
            ("refresh-at-expiry", token(now), Some(token(now))),
            ("live", token(live), None),
            ("live-refresh", token(now), Some(token(live))),
        ];
        for (name, provider, refresh) in &tokens {
            store
                .create_authentication_tokens(
                    name,
                    configuration_id,
                    contact.contact_id,
                    provider,
                    refresh.as_ref(),
                )
                .await
                .unwrap();
        }

        assert_eq!(store.purge_expired_tokens_at(now), 2);

        assert!(store.find_authentication_tokens("at-expiry").await.unwrap().is_none());
        assert!(store
            .find_authentication_tokens("refresh-at-expiry")
            .await
            .unwrap()
            .is_none());
        assert!(store.find_authentication_tokens("live").await.unwrap().is_some());
        assert!(store
            .find_authentication_tokens("live-refresh")
            .await
            .unwrap()
            .is_some());
        // live, plus live-refresh with its refresh token.
        assert_eq!(store.provider_token_count(), 3);
    }

    #[tokio::test]
    async fn uncommitted_acl_changes_are_discarded() {
        let store = InMemoryStore::new();
        let contact = store.add_contact("jdoe", "John Doe", false);
        let old = store.add_access_group("old");
        let new = store.add_access_group("new");
        store.set_access_groups(contact.contact_id, vec![old.clone()]);

        let mut tx = store.begin().await.unwrap();
        tx.delete_access_groups_for_user(contact.contact_id)
            .await
            .unwrap();
        tx.insert_access_groups_for_user(contact.contact_id, &[new.clone()])
            .await
            .unwrap();
        assert_eq!(store.access_groups_of(contact.contact_id), vec![old.clone()]);
        drop(tx);
        assert_eq!(store.access_groups_of(contact.contact_id), vec![old]);

        let mut tx = store.begin().await.unwrap();
        tx.delete_access_groups_for_user(contact.contact_id)
            .await
            .unwrap();
        tx.insert_access_groups_for_user(contact.contact_id, &[new.clone()])
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.access_groups_of(contact.contact_id), vec![new]);
    }

    #[tokio::test]
    async fn token_insert_rejects_unknown_references() {
        let store = InMemoryStore::new();
        let token = NewProviderToken::with_lifetime("p".into(), Duration::minutes(5)).unwrap();
        assert!(store
            .create_authentication_tokens("t", 41, 42, &token, None)
            .await
            .is_err());
        assert_eq!(store.authentication_token_count(), 0);
    }

    #[tokio::test]
    async fn refresh_token_keeps_authentication_alive() {
        let store = InMemoryStore::new();
        let configuration_id =
            store.add_configuration("openid", "openid", serde_json::json!({}), true);
        let contact = store.add_contact("jdoe", "John Doe", false);
        let now = Utc::now();
        let expired = NewProviderToken::new(
            "access".into(),
            now - Duration::hours(2),
            now - Duration::hours(1),
        )
        .unwrap();
        let refresh =
            NewProviderToken::new("refresh".into(), now, now + Duration::hours(8)).unwrap();

        store
            .create_authentication_tokens(
                "session",
                configuration_id,
                contact.contact_id,
                &expired,
                Some(&refresh),
            )
            .await
            .unwrap();

        assert_eq!(store.delete_expired_tokens().await.unwrap(), 0);
        assert!(store
            .find_authentication_tokens("session")
            .await
            .unwrap()
            .is_some());
    }
}
