//! HTTP handlers for identity-service.

pub mod auth;
pub mod configuration;
pub mod user;

pub use auth::{login, refresh};
pub use configuration::{get_configurations, get_local_configuration};
pub use user::renew_password;
