//! Services layer for identity-service.
//!
//! Login orchestration, providers, security policy, configuration loading,
//! ACL synchronisation and the persistence contracts behind them.

pub mod acl;
pub mod authentication;
pub mod configuration;
mod database;
pub mod error;
mod memory;
pub mod policy;
pub mod providers;
pub mod renewal;
pub mod repositories;
pub mod token;

pub use acl::AclUpdater;
pub use authentication::{LoginOutcome, LoginService};
pub use configuration::ConfigurationFactory;
pub use database::{Database, PgAclTransaction};
pub use error::ServiceError;
pub use memory::{InMemoryStore, MemoryAclTransaction};
pub use policy::{LockoutTracker, PolicyViolation, SecurityPolicyEvaluator};
pub use providers::{
    ClaimsProvider, HttpOpenIdClient, OpenIdClient, Provider, ProviderFactory, ProviderService,
};
pub use renewal::PasswordRenewalService;
