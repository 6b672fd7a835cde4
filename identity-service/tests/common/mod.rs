#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use identity_service::{
    build_router,
    config::IdentityConfig,
    models::{AccessGroup, Claims, Contact, OpenIdCustomConfiguration},
    services::{providers::OpenIdTokens, InMemoryStore, OpenIdClient, ServiceError},
    utils::{hash_password, Password},
    AppState,
};
use serde_json::{json, Value};
use tower::util::ServiceExt;

pub const ADMIN_ALIAS: &str = "admin";
pub const ADMIN_PASSWORD: &str = "CorrectPass1!";
pub const LOCKOUT_ATTEMPTS: u32 = 5;
pub const GOOD_CODE: &str = "good-code";
pub const REDIRECT_URI: &str = "https://monitoring.example.com/callback";

/// Identity provider returning canned tokens and claims.
pub struct StubOpenIdClient {
    pub claims: std::sync::Mutex<Claims>,
    pub refreshes: AtomicU32,
}

impl StubOpenIdClient {
    fn new() -> Self {
        let mut claims = Claims::new();
        claims.insert("preferred_username".into(), json!("jdoe"));
        claims.insert("email".into(), json!("jdoe@example.com"));
        claims.insert("name".into(), json!("John Doe"));
        claims.insert("groups".into(), json!(["monitoring-admins", "unrelated"]));
        Self {
            claims: std::sync::Mutex::new(claims),
            refreshes: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl OpenIdClient for StubOpenIdClient {
    async fn exchange_code(
        &self,
        _configuration: &OpenIdCustomConfiguration,
        code: &str,
        _redirect_uri: &str,
    ) -> Result<OpenIdTokens, ServiceError> {
        if code != GOOD_CODE {
            return Err(ServiceError::InvalidCredentials);
        }
        Ok(OpenIdTokens {
            access_token: "idp-access".to_string(),
            expires_in: Some(300),
            refresh_token: Some("idp-refresh".to_string()),
            refresh_expires_in: Some(3600),
        })
    }

    async fn refresh(
        &self,
        _configuration: &OpenIdCustomConfiguration,
        _refresh_token: &str,
    ) -> Result<OpenIdTokens, ServiceError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(OpenIdTokens {
            access_token: "idp-access-2".to_string(),
            expires_in: Some(300),
            refresh_token: Some("idp-refresh-2".to_string()),
            refresh_expires_in: Some(3600),
        })
    }

    async fn fetch_user_information(
        &self,
        _configuration: &OpenIdCustomConfiguration,
        _access_token: &str,
    ) -> Result<Claims, ServiceError> {
        Ok(self.claims.lock().unwrap().clone())
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<InMemoryStore>,
    pub openid: Arc<StubOpenIdClient>,
    pub admin: Contact,
    pub local_configuration_id: i64,
    pub openid_configuration_id: i64,
    pub monitoring_admins: AccessGroup,
}

pub fn local_policy() -> Value {
    json!({
        "password_security_policy": {
            "password_length": 12,
            "has_uppercase_characters": true,
            "has_lowercase_characters": true,
            "has_numbers": true,
            "has_special_characters": true,
            "can_reuse_passwords": false,
            "attempts": LOCKOUT_ATTEMPTS,
            "blocking_duration": 900,
            "password_expiration_delay": 7776000,
            "delay_before_new_password": null
        }
    })
}

impl TestApp {
    /// Local provider with an `admin` account, plus an auto-importing
    /// OpenID provider mapping `monitoring-admins` to an access group.
    pub async fn spawn() -> Self {
        let store = Arc::new(InMemoryStore::new());

        let local_configuration_id = store.add_configuration("local", "local", local_policy(), true);

        let admin = store.add_contact(ADMIN_ALIAS, "Administrator", true);
        let hash = hash_password(&Password::new(ADMIN_PASSWORD.to_string())).unwrap();
        store.add_password_hash(admin.contact_id, hash.as_str(), Utc::now() - Duration::days(1));

        let template = store.add_contact_template("sso-template");
        let sso_users = store.add_contact_group("sso-users");
        let openid_configuration_id = store.add_configuration(
            "openid",
            "openid",
            json!({
                "base_url": "https://idp.example.com",
                "authorization_endpoint": "/auth",
                "token_endpoint": "/token",
                "userinfo_endpoint": "/userinfo",
                "client_id": "monitoring",
                "client_secret": "s3cret",
                "login_claim": "preferred_username",
                "auto_import": true,
                "contact_template_id": template.contact_template_id,
                "email_bind_attribute": "email",
                "fullname_bind_attribute": "name",
                "contact_group_id": sso_users.contact_group_id,
                "claim_name": "groups"
            }),
            true,
        );
        let monitoring_admins = store.add_access_group("monitoring-admins");
        store.add_authorization_rule(
            openid_configuration_id,
            "monitoring-admins",
            monitoring_admins.clone(),
        );

        let openid = Arc::new(StubOpenIdClient::new());
        let config = IdentityConfig::local("postgres://localhost/identity_test");
        let state = AppState::new(config, store.clone(), openid.clone());
        let router = build_router(state).await.expect("Failed to build router");

        Self {
            router,
            store,
            openid,
            admin,
            local_configuration_id,
            openid_configuration_id,
            monitoring_admins,
        }
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let request = match body {
            Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body)).await
    }

    pub async fn put(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::PUT, uri, Some(body)).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None).await
    }

    pub async fn login_local(&self, login: &str, password: &str) -> (StatusCode, Value) {
        self.post("/api/login", json!({ "login": login, "password": password }))
            .await
    }

    pub async fn login_openid(&self, code: &str) -> (StatusCode, Value) {
        self.post(
            "/api/login",
            json!({ "provider": "openid", "code": code, "redirect_uri": REDIRECT_URI }),
        )
        .await
    }
}
