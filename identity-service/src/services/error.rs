use service_core::error::AppError;
use thiserror::Error;

use crate::services::policy::PolicyViolation;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    /// Missing, inactive or unusable provider configuration.
    #[error("Provider configuration error: {0}")]
    Configuration(String),

    /// The stored configuration could not be decoded.
    #[error("Unable to load provider configuration '{name}': {reason}")]
    ConfigurationLoad { name: String, reason: String },

    #[error("Provider '{0}' not found")]
    ProviderNotFound(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account locked")]
    AccountLocked,

    #[error("Password expired")]
    PasswordExpired,

    /// The provider authenticated a user it cannot produce afterwards.
    #[error("User not found")]
    UserNotFound,

    #[error("Unable to persist authentication tokens: {0}")]
    TokenPersistence(String),

    #[error("ACL synchronisation failed: {0}")]
    AclSync(String),

    #[error("Password does not match the security policy")]
    PasswordPolicy(Vec<PolicyViolation>),

    #[error("Invalid token")]
    InvalidToken,

    #[error("Provider error: {0}")]
    Provider(String),
}

impl ServiceError {
    pub fn configuration_load(name: impl Into<String>, reason: impl ToString) -> Self {
        ServiceError::ConfigurationLoad {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidCredentials
            | ServiceError::AccountLocked
            | ServiceError::UserNotFound => {
                AppError::AuthError(anyhow::anyhow!("Authentication failed"))
            }
            ServiceError::PasswordExpired => {
                AppError::Unauthorized(anyhow::anyhow!("Password expired"))
            }
            ServiceError::InvalidToken => AppError::Unauthorized(anyhow::anyhow!("Invalid token")),
            ServiceError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            ServiceError::Internal(e) => AppError::InternalError(e),
            e @ (ServiceError::Configuration(_)
            | ServiceError::ConfigurationLoad { .. }
            | ServiceError::ProviderNotFound(_)) => {
                AppError::ConfigError(anyhow::anyhow!(e.to_string()))
            }
            e @ ServiceError::TokenPersistence(_) => {
                AppError::InternalError(anyhow::anyhow!(e.to_string()))
            }
            e @ (ServiceError::AclSync(_) | ServiceError::Provider(_)) => {
                AppError::InternalError(anyhow::anyhow!(e.to_string()))
            }
            ServiceError::PasswordPolicy(violations) => AppError::Unprocessable {
                message: "Password does not match the security policy".to_string(),
                violations: violations.iter().map(|v| v.to_string()).collect(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_failures_are_indistinguishable() {
        let messages: Vec<String> = [
            ServiceError::InvalidCredentials,
            ServiceError::AccountLocked,
            ServiceError::UserNotFound,
        ]
        .into_iter()
        .map(|e| AppError::from(e).to_string())
        .collect();

        assert!(messages.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn configuration_failures_keep_detail() {
        let err = AppError::from(ServiceError::configuration_load("openid", "missing client_id"));
        assert!(err.to_string().contains("missing client_id"));
    }
}
