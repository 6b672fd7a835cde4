use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use validator::Validate;

use crate::models::configuration::LOCAL;
use crate::models::{Contact, Credentials, LegacySession, LoginRequest, LoginResponse};
use crate::services::token::generate_token;

/// Body of `POST /api/login`.
///
/// Either `{login, password}` for the local provider, or
/// `{provider, code, redirect_uri}` for an external identity provider.
/// `session_id` carries the caller's current legacy session, if any.
#[derive(Deserialize, Validate)]
pub struct LoginRequestBody {
    #[validate(length(min = 1, max = 128, message = "Provider name is invalid"))]
    pub provider: Option<String>,

    #[validate(length(min = 1, max = 255, message = "Login is required"))]
    pub login: Option<String>,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: Option<String>,

    #[validate(length(min = 1, message = "Authorization code is required"))]
    pub code: Option<String>,

    #[validate(url(message = "Invalid redirect URI"))]
    pub redirect_uri: Option<String>,

    #[validate(length(min = 1, max = 128))]
    pub session_id: Option<String>,
}

impl LoginRequestBody {
    pub fn into_login_request(self) -> Result<(LoginRequest, LegacySession), AppError> {
        let session = LegacySession::new(self.session_id.unwrap_or_else(generate_token));

        let credentials = match (self.login, self.password, self.code, self.redirect_uri) {
            (Some(login), Some(password), None, None) => Credentials::Password { login, password },
            (None, None, Some(code), Some(redirect_uri)) => {
                Credentials::AuthorizationCode { code, redirect_uri }
            }
            _ => {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Expected either login and password, or code and redirect_uri"
                )))
            }
        };

        let provider_name = match (&credentials, self.provider) {
            (_, Some(provider)) => provider,
            (Credentials::Password { .. }, None) => LOCAL.to_string(),
            (Credentials::AuthorizationCode { .. }, None) => {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "provider is required with an authorization code"
                )))
            }
        };

        Ok((
            LoginRequest {
                provider_name,
                credentials,
            },
            session,
        ))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponseBody {
    pub token: String,
    pub contact: Contact,
    /// Legacy session id after login; the local provider issues a new one.
    pub session_id: String,
}

impl LoginResponseBody {
    pub fn new(response: LoginResponse, session: LegacySession) -> Self {
        Self {
            token: response.token,
            contact: response.contact,
            session_id: session.session_id,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub refreshed: bool,
}
