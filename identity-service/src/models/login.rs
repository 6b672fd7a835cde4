//! Login request and legacy session context.

use serde::{Deserialize, Serialize};

/// Credential material presented to a provider.
#[derive(Clone, Deserialize)]
#[serde(untagged)]
pub enum Credentials {
    Password { login: String, password: String },
    AuthorizationCode { code: String, redirect_uri: String },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Password { login, .. } => f
                .debug_struct("Password")
                .field("login", login)
                .field("password", &"***")
                .finish(),
            Credentials::AuthorizationCode { redirect_uri, .. } => f
                .debug_struct("AuthorizationCode")
                .field("code", &"***")
                .field("redirect_uri", redirect_uri)
                .finish(),
        }
    }
}

/// Login request handed to the orchestrator.
#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub provider_name: String,
    pub credentials: Credentials,
}

impl LoginRequest {
    pub fn for_local(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            provider_name: super::configuration::LOCAL.to_string(),
            credentials: Credentials::Password {
                login: login.into(),
                password: password.into(),
            },
        }
    }

    pub fn for_openid(
        provider_name: impl Into<String>,
        code: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            provider_name: provider_name.into(),
            credentials: Credentials::AuthorizationCode {
                code: code.into(),
                redirect_uri: redirect_uri.into(),
            },
        }
    }
}

/// Session context of the legacy web UI.
///
/// Passed by value into a provider's authenticate call and returned,
/// possibly replaced, once the contact is authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacySession {
    pub session_id: String,
    pub contact_id: Option<i64>,
}

impl LegacySession {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            contact_id: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.contact_id.is_some()
    }
}
