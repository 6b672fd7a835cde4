use service_core::{
    axum::{extract::State, Json},
    error::AppError,
};

use crate::{
    dtos::configuration::{ConfigurationsResponse, SecurityPolicyResponse},
    models::ConfigurationSummary,
    AppState,
};

pub async fn get_local_configuration(
    State(state): State<AppState>,
) -> Result<Json<SecurityPolicyResponse>, AppError> {
    let policy = state.configurations.find_local_policy().await?;
    Ok(Json(SecurityPolicyResponse::from(&policy)))
}

/// Active provider configurations usable for login.
pub async fn get_configurations(
    State(state): State<AppState>,
) -> Result<Json<ConfigurationsResponse>, AppError> {
    let configurations = state
        .configurations
        .get_configurations()
        .await?
        .iter()
        .map(ConfigurationSummary::from)
        .collect();
    Ok(Json(ConfigurationsResponse { configurations }))
}
