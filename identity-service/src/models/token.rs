//! Authentication token models.
//!
//! An authentication token is the opaque string handed to the caller. It
//! points at the provider-side token (and optionally a refresh token) issued
//! by the provider that authenticated the contact. Provider tokens are never
//! edited: a refresh stores new ones and re-points the authentication token.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::services::ServiceError;

/// Provider token not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProviderToken {
    token: String,
    created_utc: DateTime<Utc>,
    expiry_utc: DateTime<Utc>,
}

impl NewProviderToken {
    /// Build a token; the expiry must be strictly after the creation date.
    pub fn new(
        token: String,
        created_utc: DateTime<Utc>,
        expiry_utc: DateTime<Utc>,
    ) -> Result<Self, ServiceError> {
        if expiry_utc <= created_utc {
            return Err(ServiceError::Internal(anyhow::anyhow!(
                "Provider token expiry must be after its creation date"
            )));
        }
        Ok(Self {
            token,
            created_utc,
            expiry_utc,
        })
    }

    /// Token created now and valid for `lifetime`.
    pub fn with_lifetime(token: String, lifetime: Duration) -> Result<Self, ServiceError> {
        let now = Utc::now();
        let expiry_utc = now.checked_add_signed(lifetime).ok_or_else(|| {
            ServiceError::Internal(anyhow::anyhow!(
                "Provider token lifetime of {}s is out of range",
                lifetime.num_seconds()
            ))
        })?;
        Self::new(token, now, expiry_utc)
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn created_utc(&self) -> DateTime<Utc> {
        self.created_utc
    }

    pub fn expiry_utc(&self) -> DateTime<Utc> {
        self.expiry_utc
    }
}

/// Persisted provider token.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ProviderToken {
    pub token_id: i64,
    pub token: String,
    pub created_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
}

impl ProviderToken {
    /// A token is expired from its expiry instant onwards.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry_utc <= now
    }
}

/// Authentication token with the provider tokens it owns.
#[derive(Debug, Clone)]
pub struct AuthenticationTokens {
    pub session_token: String,
    pub provider_configuration_id: i64,
    pub contact_id: i64,
    pub provider_token: ProviderToken,
    pub provider_refresh_token: Option<ProviderToken>,
}

/// Provider tokens produced by a refresh.
#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    pub provider_token: NewProviderToken,
    pub provider_refresh_token: Option<NewProviderToken>,
}

/// Successful login, as returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub contact: crate::models::Contact,
}
