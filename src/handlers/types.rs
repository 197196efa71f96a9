//! # Common API Types
//!
//! Shared request/response types and the lookups several handler modules
//! need: pagination, user display info, file URLs and multipart uploads.

use std::collections::HashMap;

use axum::extract::{FromRequest, Multipart};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::cache::user_key;
use crate::config::AppConfig;
use crate::error::{ApiError, validation_error};
use crate::repositories::{FileRepository, Page, ProfileRepository};
use crate::server::AppState;

/// JSON request body whose rejections render as problem+json.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Offset/limit query parameters
#[derive(Debug, Default, Deserialize, Serialize, IntoParams, ToSchema)]
pub struct PaginationQuery {
    /// Maximum number of items to return
    pub limit: Option<u64>,
    /// Number of items to skip
    pub offset: Option<u64>,
}

impl PaginationQuery {
    pub fn page(&self, config: &AppConfig) -> Page {
        Page::new(
            self.offset.unwrap_or(config.default_pagination_offset),
            self.limit.unwrap_or(config.default_pagination_limit),
        )
    }
}

/// Outcome of a state-changing action without a resource body
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

impl SuccessResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// Display information for a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserInfo {
    #[schema(value_type = String)]
    pub id: Uuid,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Cached projection of a profile row.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedUser {
    user_id: Uuid,
    display_name: Option<String>,
    avatar_file_id: Option<Uuid>,
}

/// Resolves display info for `user_ids`, reading through the `user:{id}`
/// cache. Unknown users get an entry without a name.
pub async fn load_users(
    state: &AppState,
    user_ids: &[Uuid],
) -> Result<HashMap<Uuid, UserInfo>, ApiError> {
    let mut cached = Vec::new();
    let mut missing = Vec::new();
    for id in user_ids {
        if cached.iter().any(|user: &CachedUser| user.user_id == *id) || missing.contains(id) {
            continue;
        }
        match state.cache.get_json::<CachedUser>(&user_key(*id)).await {
            Some(user) => cached.push(user),
            None => missing.push(*id),
        }
    }

    let ttl = state.config.storage.presigned_url_expiration;
    for profile in ProfileRepository::new(&state.db)
        .find_many(&missing)
        .await?
        .into_values()
    {
        let user = CachedUser {
            user_id: profile.user_id,
            display_name: profile.display_name,
            avatar_file_id: profile.avatar_file_id,
        };
        state.cache.set_json(&user_key(user.user_id), &user, ttl).await;
        cached.push(user);
    }

    let mut users = HashMap::with_capacity(user_ids.len());
    for user in cached {
        let avatar_url = file_url(state, user.avatar_file_id).await;
        users.insert(
            user.user_id,
            UserInfo {
                id: user.user_id,
                display_name: user.display_name,
                avatar_url,
            },
        );
    }
    for id in user_ids {
        users.entry(*id).or_insert_with(|| UserInfo {
            id: *id,
            display_name: None,
            avatar_url: None,
        });
    }
    Ok(users)
}

pub async fn load_user(state: &AppState, user_id: Uuid) -> Result<UserInfo, ApiError> {
    let mut users = load_users(state, &[user_id]).await?;
    Ok(users.remove(&user_id).unwrap_or(UserInfo {
        id: user_id,
        display_name: None,
        avatar_url: None,
    }))
}

/// Name the caller is shown under in notifications. Creates the profile on
/// first sight.
pub async fn actor_name(state: &AppState, user: &CurrentUser) -> Result<String, ApiError> {
    let profile = ProfileRepository::new(&state.db)
        .get_or_create(user.id, user.email.as_deref())
        .await?;
    Ok(profile.visible_name())
}

/// Presigned URL of a stored file. Lookup failures yield `None`.
pub async fn file_url(state: &AppState, file_id: Option<Uuid>) -> Option<String> {
    let file = FileRepository::new(&state.db).find(file_id?).await.ok()?;
    match state.storage.presigned_get_url(&file.storage_key, None) {
        Ok(url) => Some(url),
        Err(err) => {
            tracing::warn!(file_id = %file.id, error = %err, "Failed to presign file URL");
            None
        }
    }
}

/// A file part read from a multipart body.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// Multipart body split into the `file` part and the remaining text fields.
#[derive(Debug, Default)]
pub struct MultipartForm {
    pub file: Option<Upload>,
    pub fields: HashMap<String, String>,
}

impl MultipartForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = MultipartForm::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                let filename = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await?.to_vec();
                form.file = Some(Upload {
                    filename,
                    content_type,
                    data,
                });
            } else {
                let value = field.text().await?;
                form.fields.insert(name, value);
            }
        }
        Ok(form)
    }

    pub fn require_file(&mut self) -> Result<Upload, ApiError> {
        self.file
            .take()
            .filter(|upload| !upload.filename.is_empty())
            .ok_or_else(|| {
                validation_error(
                    "A file is required",
                    serde_json::json!({ "file": "Missing file part" }),
                )
            })
    }

    /// Optional UUID text field; blank values count as absent.
    pub fn uuid_field(&self, name: &str) -> Result<Option<Uuid>, ApiError> {
        match self.fields.get(name).map(|v| v.trim()).filter(|v| !v.is_empty()) {
            None => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|_| {
                validation_error(
                    "Invalid identifier",
                    serde_json::json!({ name: "Must be a valid UUID" }),
                )
            }),
        }
    }
}
