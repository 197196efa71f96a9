//! Caller profile endpoints.

use axum::{extract::State, response::Json};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::types::{ApiJson, file_url};
use crate::auth::CurrentUser;
use crate::cache::user_key;
use crate::error::{ApiError, validation_error};
use crate::models::profile::Model as ProfileModel;
use crate::repositories::ProfileRepository;
use crate::repositories::profile::ProfileChanges;
use crate::server::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProfileResponse {
    #[schema(value_type = String)]
    pub user_id: Uuid,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub timezone: String,
    pub email_notifications: bool,
    pub browser_notifications: bool,
    #[schema(value_type = String)]
    pub created_at: String,
    #[schema(value_type = String)]
    pub updated_at: String,
}

impl ProfileResponse {
    async fn build(state: &AppState, model: ProfileModel) -> Self {
        Self {
            avatar_url: file_url(state, model.avatar_file_id).await,
            user_id: model.user_id,
            email: model.email,
            display_name: model.display_name,
            timezone: model.timezone,
            email_notifications: model.email_notifications,
            browser_notifications: model.browser_notifications,
            created_at: model.created_at.to_rfc3339(),
            updated_at: model.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateProfileRequest {
    pub display_name: Option<String>,
    /// IANA zone name, e.g. `Europe/Berlin`
    pub timezone: Option<String>,
    pub email_notifications: Option<bool>,
    pub browser_notifications: Option<bool>,
}

fn validate_timezone(timezone: &str) -> Result<(), ApiError> {
    timezone.parse::<Tz>().map(|_| ()).map_err(|_| {
        validation_error(
            "Invalid timezone",
            serde_json::json!({ "timezone": format!("Unknown timezone '{timezone}'") }),
        )
    })
}

/// Returns the caller's profile, creating it on first access
#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Caller profile", body = ProfileResponse),
        (status = 401, description = "Missing or invalid token", body = ApiError)
    ),
    tag = "auth"
)]
pub async fn get_me(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<ProfileResponse>, ApiError> {
    let profile = ProfileRepository::new(&state.db)
        .get_or_create(user.id, user.email.as_deref())
        .await?;
    Ok(Json(ProfileResponse::build(&state, profile).await))
}

/// Updates display name, timezone and notification preferences
#[utoipa::path(
    patch,
    path = "/api/v1/auth/me",
    security(("bearer_auth" = [])),
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Updated profile", body = ProfileResponse),
        (status = 400, description = "Invalid timezone", body = ApiError)
    ),
    tag = "auth"
)]
pub async fn update_me(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiJson(request): ApiJson<UpdateProfileRequest>,
) -> Result<Json<ProfileResponse>, ApiError> {
    if let Some(timezone) = request.timezone.as_deref() {
        validate_timezone(timezone)?;
    }

    let repo = ProfileRepository::new(&state.db);
    repo.get_or_create(user.id, user.email.as_deref()).await?;
    let profile = repo
        .update(
            user.id,
            ProfileChanges {
                display_name: request.display_name,
                timezone: request.timezone,
                email_notifications: request.email_notifications,
                browser_notifications: request.browser_notifications,
            },
        )
        .await?;
    state.cache.delete(&user_key(user.id)).await;

    Ok(Json(ProfileResponse::build(&state, profile).await))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timezones_must_be_iana_names() {
        assert!(validate_timezone("Europe/Berlin").is_ok());
        assert!(validate_timezone("UTC").is_ok());
        assert_eq!(
            validate_timezone("Mars/Olympus").unwrap_err().status.as_u16(),
            400
        );
    }
}
