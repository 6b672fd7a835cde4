use serde::Deserialize;
use validator::Validate;

/// Body of `PUT /api/users/{alias}/password`.
#[derive(Deserialize, Validate)]
pub struct RenewPasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub old_password: String,

    #[validate(length(min = 1, max = 1024, message = "New password is required"))]
    pub new_password: String,
}
