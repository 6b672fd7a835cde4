use service_core::{
    axum::{
        extract::{Path, State},
        Json,
    },
    error::AppError,
};

use crate::{
    dtos::{user::RenewPasswordRequest, MessageResponse},
    utils::ValidatedJson,
    AppState,
};

pub async fn renew_password(
    State(state): State<AppState>,
    Path(alias): Path<String>,
    ValidatedJson(req): ValidatedJson<RenewPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    state
        .renewal
        .renew(&alias, &req.old_password, &req.new_password)
        .await?;
    Ok(Json(MessageResponse {
        message: "Password updated".to_string(),
    }))
}
