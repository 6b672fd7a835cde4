//! Persistence contracts.
//!
//! Each contract has a PostgreSQL implementation ([`super::Database`]) and an
//! in-memory one ([`super::InMemoryStore`]).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    AccessGroup, AuthenticationTokens, AuthorizationRule, ConfigurationRecord, Contact,
    ContactGroup, ContactTemplate, LocalAccount, LockoutState, NewContact, NewProviderToken,
    PasswordRecord, RefreshedTokens, SecurityPolicy,
};
use crate::services::ServiceError;

/// Read side of the provider configuration store.
#[async_trait]
pub trait ConfigurationReader: Send + Sync {
    async fn find_configuration_by_name(
        &self,
        name: &str,
    ) -> Result<Option<ConfigurationRecord>, ServiceError>;

    async fn find_configuration_by_id(
        &self,
        id: i64,
    ) -> Result<Option<ConfigurationRecord>, ServiceError>;

    async fn find_configurations(&self) -> Result<Vec<ConfigurationRecord>, ServiceError>;

    /// Aliases exempt from password expiration for the given configuration.
    async fn find_excluded_user_aliases(
        &self,
        configuration_id: i64,
    ) -> Result<Vec<String>, ServiceError>;

    async fn find_contact_template(
        &self,
        contact_template_id: i64,
    ) -> Result<Option<ContactTemplate>, ServiceError>;

    async fn find_contact_group(
        &self,
        contact_group_id: i64,
    ) -> Result<Option<ContactGroup>, ServiceError>;

    async fn find_authorization_rules(
        &self,
        configuration_id: i64,
    ) -> Result<Vec<AuthorizationRule>, ServiceError>;
}

#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Persist an authentication token and its provider tokens atomically.
    async fn create_authentication_tokens(
        &self,
        token: &str,
        provider_configuration_id: i64,
        contact_id: i64,
        provider_token: &NewProviderToken,
        provider_refresh_token: Option<&NewProviderToken>,
    ) -> Result<(), ServiceError>;

    /// Delete every authentication token that can no longer be used, and
    /// the expired provider tokens behind them. Returns the number of
    /// authentication tokens removed.
    async fn delete_expired_tokens(&self) -> Result<u64, ServiceError>;

    async fn find_authentication_tokens(
        &self,
        token: &str,
    ) -> Result<Option<AuthenticationTokens>, ServiceError>;

    /// Store refreshed provider tokens as new rows and point the
    /// authentication token at them.
    async fn update_provider_tokens(
        &self,
        token: &str,
        refreshed: &RefreshedTokens,
    ) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait ContactRepository: Send + Sync {
    async fn find_local_account(&self, alias: &str) -> Result<Option<LocalAccount>, ServiceError>;

    async fn find_contact_by_alias(&self, alias: &str) -> Result<Option<Contact>, ServiceError>;

    async fn find_contact_by_id(&self, contact_id: i64) -> Result<Option<Contact>, ServiceError>;

    async fn create_contact(&self, contact: &NewContact) -> Result<Contact, ServiceError>;

    async fn update_contact(&self, contact: &Contact) -> Result<(), ServiceError>;

    /// Previous passwords of a contact, most recent first.
    async fn find_password_history(
        &self,
        contact_id: i64,
        limit: usize,
    ) -> Result<Vec<PasswordRecord>, ServiceError>;

    async fn add_password(
        &self,
        contact_id: i64,
        password_hash: &str,
        created_utc: DateTime<Utc>,
    ) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait LoginAttemptRepository: Send + Sync {
    /// Current state; a contact with no recorded failure gets the default.
    async fn find_lockout_state(&self, contact_id: i64) -> Result<LockoutState, ServiceError>;

    /// Count one failed attempt and return the resulting state.
    ///
    /// The read and the write happen as one atomic step, so concurrent
    /// failures for the same contact are all counted.
    async fn record_failed_attempt(
        &self,
        contact_id: i64,
        policy: &SecurityPolicy,
        now: DateTime<Utc>,
    ) -> Result<LockoutState, ServiceError>;

    async fn clear_lockout_state(&self, contact_id: i64) -> Result<(), ServiceError>;
}

/// Store of access-group and contact-group memberships.
#[async_trait]
pub trait AclStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn AclTransaction>, ServiceError>;
}

/// Unit of work over ACL memberships.
///
/// Nothing is visible to other readers before `commit`. Dropping the
/// transaction without committing discards every change.
#[async_trait]
pub trait AclTransaction: Send {
    async fn delete_access_groups_for_user(&mut self, contact_id: i64)
        -> Result<(), ServiceError>;

    async fn insert_access_groups_for_user(
        &mut self,
        contact_id: i64,
        access_groups: &[AccessGroup],
    ) -> Result<(), ServiceError>;

    async fn delete_contact_groups_for_user(
        &mut self,
        contact_id: i64,
    ) -> Result<(), ServiceError>;

    async fn insert_contact_group_for_user(
        &mut self,
        contact_id: i64,
        contact_group: &ContactGroup,
    ) -> Result<(), ServiceError>;

    async fn commit(self: Box<Self>) -> Result<(), ServiceError>;

    async fn rollback(self: Box<Self>) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn health_check(&self) -> Result<(), ServiceError>;
}
