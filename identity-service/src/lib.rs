pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

use service_core::axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method, Request},
    middleware::from_fn,
    routing::{get, post, put},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    security_headers::security_headers_middleware, tracing::request_id_middleware,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::IdentityConfig;
use crate::services::repositories::{
    AclStore, ConfigurationReader, ContactRepository, HealthCheck, LoginAttemptRepository,
    TokenRepository,
};
use crate::services::{
    AclUpdater, ConfigurationFactory, LockoutTracker, LoginService, OpenIdClient,
    PasswordRenewalService, ProviderFactory, ProviderService,
};

#[derive(Clone)]
pub struct AppState {
    pub config: IdentityConfig,
    pub login: LoginService,
    pub acl: AclUpdater,
    pub configurations: ConfigurationFactory,
    pub renewal: PasswordRenewalService,
    pub health: Arc<dyn HealthCheck>,
}

impl AppState {
    /// Wire every service over one store implementing all repositories.
    pub fn new<S>(config: IdentityConfig, store: Arc<S>, openid_client: Arc<dyn OpenIdClient>) -> Self
    where
        S: ConfigurationReader
            + TokenRepository
            + ContactRepository
            + LoginAttemptRepository
            + AclStore
            + HealthCheck
            + 'static,
    {
        let configurations = ConfigurationFactory::new(store.clone());
        let lockout = LockoutTracker::new(store.clone());
        let factory = ProviderFactory::new(
            store.clone(),
            lockout.clone(),
            openid_client,
            config.session.lifetime(),
        );
        let providers = ProviderService::new(configurations.clone(), factory, store.clone());

        Self {
            login: LoginService::new(providers, store.clone()),
            acl: AclUpdater::new(store.clone()),
            renewal: PasswordRenewalService::new(configurations.clone(), store.clone(), lockout),
            configurations,
            health: store,
            config,
        }
    }
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    let allowed_origins = state
        .config
        .security
        .allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(origin) => Some(origin),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e);
                None
            }
        })
        .collect::<Vec<HeaderValue>>();

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/login", post(handlers::login))
        .route("/api/token/refresh", post(handlers::refresh))
        .route(
            "/api/configuration/local",
            get(handlers::get_local_configuration),
        )
        .route("/api/configurations", get(handlers::get_configurations))
        .route(
            "/api/users/:alias/password",
            put(handlers::renew_password),
        )
        .with_state(state)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(allowed_origins)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    HeaderName::from_static("x-request-id"),
                ]),
        );

    Ok(app)
}

/// Service health check
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.health.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Database health check failed");
        AppError::ServiceUnavailable
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "database": "up"
        }
    })))
}
