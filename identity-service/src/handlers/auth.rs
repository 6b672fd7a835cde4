use service_core::{
    axum::{extract::State, http::StatusCode, response::IntoResponse, Json},
    error::AppError,
};

use crate::{
    dtos::auth::{LoginRequestBody, LoginResponseBody, RefreshRequest, RefreshResponse},
    utils::ValidatedJson,
    AppState,
};

/// Authenticate with a provider and issue an authentication token.
///
/// Access groups and contact groups are synchronised afterwards; a failed
/// synchronisation does not fail the login.
pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<LoginRequestBody>,
) -> Result<impl IntoResponse, AppError> {
    let (request, session) = body.into_login_request()?;
    let outcome = state.login.execute(request, session).await?;

    state
        .acl
        .update_for_provider_and_user(outcome.provider.as_ref(), &outcome.contact)
        .await;

    let response = LoginResponseBody::new(outcome.response(), outcome.session);
    Ok((StatusCode::OK, Json(response)))
}

/// Refresh the provider tokens behind an authentication token.
pub async fn refresh(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let refreshed = state.login.refresh(&req.token).await?;
    Ok((StatusCode::OK, Json(RefreshResponse { refreshed })))
}
