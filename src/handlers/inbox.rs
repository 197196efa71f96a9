//! # Inbox API Handlers
//!
//! Notifications delivered to the caller within their active organization.

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::types::{SuccessResponse, UserInfo, load_users};
use crate::auth::ActiveOrganization;
use crate::error::{ApiError, validation_error};
use crate::models::inbox::{InboxEventType, Model as InboxModel};
use crate::repositories::{InboxRepository, Page};
use crate::server::AppState;

const DEFAULT_INBOX_LIMIT: u64 = 50;
const MAX_INBOX_LIMIT: u64 = 100;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InboxItem {
    #[schema(value_type = String)]
    pub id: Uuid,
    pub event_type: InboxEventType,
    pub title: String,
    pub message: String,
    #[schema(value_type = Option<String>)]
    pub reference_id: Option<Uuid>,
    /// Who caused the notification
    pub user_by: UserInfo,
    pub is_read: bool,
    pub is_archived: bool,
    #[schema(value_type = String)]
    pub created_at: String,
    #[schema(value_type = String)]
    pub updated_at: String,
}

impl InboxItem {
    fn new(model: InboxModel, user_by: UserInfo) -> Self {
        Self {
            id: model.id,
            event_type: model.event_type,
            title: model.title,
            message: model.message,
            reference_id: model.reference_id,
            user_by,
            is_read: model.is_read,
            is_archived: model.is_archived,
            created_at: model.created_at.to_rfc3339(),
            updated_at: model.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct InboxListQuery {
    #[serde(default)]
    pub include_archived: bool,
    /// 1..=100, default 50
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl InboxListQuery {
    fn page(&self) -> Result<Page, ApiError> {
        let limit = self.limit.unwrap_or(DEFAULT_INBOX_LIMIT);
        if !(1..=MAX_INBOX_LIMIT).contains(&limit) {
            return Err(validation_error(
                "limit must be between 1 and 100",
                serde_json::json!({ "limit": limit }),
            ));
        }
        Ok(Page::new(self.offset.unwrap_or(0), limit))
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InboxListResponse {
    pub items: Vec<InboxItem>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UnreadCountResponse {
    pub unread_count: u64,
}

async fn items(state: &AppState, rows: Vec<InboxModel>) -> Result<Vec<InboxItem>, ApiError> {
    let actor_ids: Vec<Uuid> = rows.iter().map(|row| row.user_by).collect();
    let actors = load_users(state, &actor_ids).await?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let actor = actors[&row.user_by].clone();
            InboxItem::new(row, actor)
        })
        .collect())
}

#[utoipa::path(
    get,
    path = "/api/v1/inbox/unread-count",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Unread, non-archived notifications", body = UnreadCountResponse),
        (status = 403, description = "No active organization", body = ApiError)
    ),
    tag = "inbox"
)]
pub async fn unread_count(
    State(state): State<AppState>,
    org: ActiveOrganization,
) -> Result<Json<UnreadCountResponse>, ApiError> {
    let unread_count = InboxRepository::new(&state.db)
        .unread_count(org.user.id, org.org_id)
        .await?;
    Ok(Json(UnreadCountResponse { unread_count }))
}

/// Lists notifications newest first
#[utoipa::path(
    get,
    path = "/api/v1/inbox",
    security(("bearer_auth" = [])),
    params(InboxListQuery),
    responses(
        (status = 200, description = "Inbox page", body = InboxListResponse),
        (status = 400, description = "Invalid limit", body = ApiError)
    ),
    tag = "inbox"
)]
pub async fn list_inbox(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Query(query): Query<InboxListQuery>,
) -> Result<Json<InboxListResponse>, ApiError> {
    let page = query.page()?;
    let (rows, total) = InboxRepository::new(&state.db)
        .list(org.user.id, org.org_id, query.include_archived, page)
        .await?;
    Ok(Json(InboxListResponse {
        items: items(&state, rows).await?,
        total,
        offset: page.offset,
        limit: page.limit,
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/inbox/{inbox_id}",
    security(("bearer_auth" = [])),
    params(("inbox_id" = String, Path, description = "Inbox entry id")),
    responses(
        (status = 200, description = "Inbox entry", body = InboxItem),
        (status = 404, description = "Inbox not found", body = ApiError)
    ),
    tag = "inbox"
)]
pub async fn get_inbox_item(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(inbox_id): Path<Uuid>,
) -> Result<Json<InboxItem>, ApiError> {
    let row = InboxRepository::new(&state.db)
        .find(inbox_id, org.user.id, org.org_id)
        .await?;
    let mut rendered = items(&state, vec![row]).await?;
    rendered
        .pop()
        .map(Json)
        .ok_or_else(|| crate::error::not_found("Inbox not found"))
}

#[utoipa::path(
    patch,
    path = "/api/v1/inbox/{inbox_id}/read",
    security(("bearer_auth" = [])),
    params(("inbox_id" = String, Path, description = "Inbox entry id")),
    responses(
        (status = 200, description = "Marked as read", body = SuccessResponse),
        (status = 404, description = "Inbox not found", body = ApiError)
    ),
    tag = "inbox"
)]
pub async fn mark_read(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(inbox_id): Path<Uuid>,
) -> Result<Json<SuccessResponse>, ApiError> {
    InboxRepository::new(&state.db)
        .mark_read(inbox_id, org.user.id, org.org_id)
        .await?;
    Ok(Json(SuccessResponse::ok("Inbox marked as read")))
}

#[utoipa::path(
    patch,
    path = "/api/v1/inbox/{inbox_id}/archive",
    security(("bearer_auth" = [])),
    params(("inbox_id" = String, Path, description = "Inbox entry id")),
    responses(
        (status = 200, description = "Archived", body = SuccessResponse),
        (status = 404, description = "Inbox not found", body = ApiError)
    ),
    tag = "inbox"
)]
pub async fn archive(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(inbox_id): Path<Uuid>,
) -> Result<Json<SuccessResponse>, ApiError> {
    InboxRepository::new(&state.db)
        .set_archived(inbox_id, org.user.id, org.org_id, true)
        .await?;
    Ok(Json(SuccessResponse::ok("Inbox archived")))
}

#[utoipa::path(
    patch,
    path = "/api/v1/inbox/{inbox_id}/unarchive",
    security(("bearer_auth" = [])),
    params(("inbox_id" = String, Path, description = "Inbox entry id")),
    responses(
        (status = 200, description = "Unarchived", body = SuccessResponse),
        (status = 404, description = "Inbox not found", body = ApiError)
    ),
    tag = "inbox"
)]
pub async fn unarchive(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(inbox_id): Path<Uuid>,
) -> Result<Json<SuccessResponse>, ApiError> {
    InboxRepository::new(&state.db)
        .set_archived(inbox_id, org.user.id, org.org_id, false)
        .await?;
    Ok(Json(SuccessResponse::ok("Inbox unarchived")))
}

#[utoipa::path(
    delete,
    path = "/api/v1/inbox/{inbox_id}",
    security(("bearer_auth" = [])),
    params(("inbox_id" = String, Path, description = "Inbox entry id")),
    responses(
        (status = 200, description = "Deleted", body = SuccessResponse),
        (status = 404, description = "Inbox not found", body = ApiError)
    ),
    tag = "inbox"
)]
pub async fn delete_inbox_item(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(inbox_id): Path<Uuid>,
) -> Result<Json<SuccessResponse>, ApiError> {
    InboxRepository::new(&state.db)
        .delete(inbox_id, org.user.id, org.org_id)
        .await?;
    Ok(Json(SuccessResponse::ok("Inbox deleted")))
}
