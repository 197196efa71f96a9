//! # Task Attachment API Handlers
//!
//! Attaches files already uploaded to the organization to a task and hands
//! out short-lived download URLs for them.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::tasks::accessible_task;
use super::types::{ApiJson, PaginationQuery};
use crate::auth::ActiveOrganization;
use crate::error::{ApiError, ErrorCode, bad_request};
use crate::models::file::Model as FileModel;
use crate::models::task_attachment::Model as AttachmentModel;
use crate::repositories::{AttachmentRepository, FileRepository, RepositoryError};
use crate::server::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AttachmentInfo {
    #[schema(value_type = String)]
    pub id: Uuid,
    #[schema(value_type = String)]
    pub file_id: Uuid,
    pub file_name: String,
    pub file_size: i64,
    pub content_type: String,
}

impl AttachmentInfo {
    fn new(attachment: AttachmentModel, file: FileModel) -> Self {
        Self {
            id: attachment.id,
            file_id: file.id,
            file_name: file.name,
            file_size: file.size_bytes,
            content_type: file.content_type,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateAttachmentRequest {
    #[schema(value_type = String)]
    pub file_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AttachmentListResponse {
    pub attachments: Vec<AttachmentInfo>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AttachmentDownloadResponse {
    pub download_url: String,
    #[schema(value_type = String)]
    pub expires_at: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/tasks/{task_id}/attachments",
    security(("bearer_auth" = [])),
    params(("task_id" = String, Path, description = "Task id")),
    request_body = CreateAttachmentRequest,
    responses(
        (status = 201, description = "File attached", body = AttachmentInfo),
        (status = 400, description = "Unknown file or already attached", body = ApiError),
        (status = 404, description = "Task not found", body = ApiError)
    ),
    tag = "tasks"
)]
pub async fn create_attachment(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(task_id): Path<Uuid>,
    ApiJson(request): ApiJson<CreateAttachmentRequest>,
) -> Result<(StatusCode, Json<AttachmentInfo>), ApiError> {
    accessible_task(&state, &org, task_id).await?;
    let file_id = request.file_id;
    let file = match FileRepository::new(&state.db).find(file_id).await {
        Ok(file) if file.org_id == org.org_id && !file.is_deleted => file,
        Ok(_) | Err(RepositoryError::NotFound(_)) => {
            return Err(bad_request(&format!(
                "Failed to add attachment for file {file_id}, invalid file id"
            )));
        }
        Err(err) => return Err(err.into()),
    };

    let attachment = match AttachmentRepository::new(&state.db)
        .create(task_id, file_id, org.user.id)
        .await
    {
        Ok(attachment) => attachment,
        Err(RepositoryError::Conflict(_)) => {
            return Err(bad_request(&format!(
                "Failed to add attachment for file {file_id}, file already attached"
            )));
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!(task_id = %task_id, file_id = %file_id, "File attached to task");
    Ok((StatusCode::CREATED, Json(AttachmentInfo::new(attachment, file))))
}

#[utoipa::path(
    get,
    path = "/api/v1/tasks/{task_id}/attachments",
    security(("bearer_auth" = [])),
    params(("task_id" = String, Path, description = "Task id"), PaginationQuery),
    responses((status = 200, description = "Attachments page", body = AttachmentListResponse)),
    tag = "tasks"
)]
pub async fn list_attachments(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(task_id): Path<Uuid>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<AttachmentListResponse>, ApiError> {
    accessible_task(&state, &org, task_id).await?;
    let page = query.page(&state.config);
    let (rows, total) = AttachmentRepository::new(&state.db)
        .list(task_id, page)
        .await?;
    Ok(Json(AttachmentListResponse {
        attachments: rows
            .into_iter()
            .map(|(attachment, file)| AttachmentInfo::new(attachment, file))
            .collect(),
        total,
        offset: page.offset,
        limit: page.limit,
    }))
}

/// Loads an attachment whose task the caller may work on.
async fn accessible_attachment(
    state: &AppState,
    org: &ActiveOrganization,
    attachment_id: Uuid,
) -> Result<(AttachmentModel, FileModel), ApiError> {
    let (attachment, file) = AttachmentRepository::new(&state.db)
        .find(attachment_id)
        .await?;
    accessible_task(state, org, attachment.task_id).await?;
    Ok((attachment, file))
}

/// Detaches the file; the file itself stays in the organization
#[utoipa::path(
    delete,
    path = "/api/v1/tasks/attachments/{attachment_id}",
    security(("bearer_auth" = [])),
    params(("attachment_id" = String, Path, description = "Attachment id")),
    responses(
        (status = 204, description = "Attachment removed"),
        (status = 404, description = "Attachment not found", body = ApiError)
    ),
    tag = "tasks"
)]
pub async fn delete_attachment(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(attachment_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let (attachment, _) = accessible_attachment(&state, &org, attachment_id).await?;
    AttachmentRepository::new(&state.db)
        .delete(attachment.id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/v1/tasks/attachments/{attachment_id}/download",
    security(("bearer_auth" = [])),
    params(("attachment_id" = String, Path, description = "Attachment id")),
    responses(
        (status = 200, description = "Presigned download URL", body = AttachmentDownloadResponse),
        (status = 404, description = "Attachment not found", body = ApiError)
    ),
    tag = "tasks"
)]
pub async fn download_attachment(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(attachment_id): Path<Uuid>,
) -> Result<Json<AttachmentDownloadResponse>, ApiError> {
    let (_, file) = accessible_attachment(&state, &org, attachment_id).await?;
    let ttl = state.config.storage.presigned_url_expiration;
    let download_url = state.storage.presigned_get_url(&file.storage_key, Some(ttl))?;
    let expires_at = i64::try_from(ttl)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .ok_or_else(|| ApiError::new(ErrorCode::Internal, "Presigned URL lifetime is out of range"))?;
    Ok(Json(AttachmentDownloadResponse {
        download_url,
        expires_at: expires_at.to_rfc3339(),
    }))
}
