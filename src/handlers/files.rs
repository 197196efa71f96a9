//! # File API Handlers
//!
//! Uploads go through a metadata row first; the object key is derived from
//! the row id so a failed upload can be rolled back by deleting the row.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::types::{MultipartForm, Upload};
use crate::auth::ActiveOrganization;
use crate::error::{ApiError, ErrorCode, forbidden, not_found};
use crate::models::file::Model as FileModel;
use crate::repositories::file::NewFile;
use crate::repositories::{FileRepository, Page};
use crate::server::AppState;
use crate::utils::calculate_file_size;

const UPLOAD_FAILED: &str = "Failed to upload file to storage. Please try again later.";

/// Stored file as returned by the API
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FileInfo {
    #[schema(value_type = String)]
    pub id: Uuid,
    pub name: String,
    /// Human readable size, e.g. "1.50 MB"
    pub size: String,
    pub content_type: String,
    #[schema(value_type = String)]
    pub uploaded_by: Uuid,
    pub is_deleted: bool,
    /// Presigned download URL, only on single-file lookups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl From<FileModel> for FileInfo {
    fn from(model: FileModel) -> Self {
        Self {
            id: model.id,
            name: model.name,
            size: calculate_file_size(model.size_bytes),
            content_type: model.content_type,
            uploaded_by: model.uploaded_by,
            is_deleted: model.is_deleted,
            url: None,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct ListFilesQuery {
    /// List the trash instead of live files
    #[serde(default)]
    pub is_deleted: bool,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FileListResponse {
    pub files: Vec<FileInfo>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FileUrlResponse {
    pub url: String,
}

/// Object key for file `id`, keeping the extension exactly as uploaded.
fn storage_key(id: Uuid, filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((stem, extension)) if !stem.trim_start_matches('.').is_empty() && !extension.is_empty() => {
            format!("{id}.{extension}")
        }
        _ => id.to_string(),
    }
}

/// Validates and stores an upload for `org_id`. The row is removed again
/// when the object cannot be written.
pub async fn store_file(
    state: &AppState,
    org_id: Uuid,
    uploaded_by: Uuid,
    upload: Upload,
    project_id: Option<Uuid>,
    task_id: Option<Uuid>,
) -> Result<FileModel, ApiError> {
    state.storage.validate_extension(&upload.filename)?;
    state.storage.validate_size(upload.data.len() as u64)?;

    let files = FileRepository::new(&state.db);
    let id = Uuid::new_v4();
    let storage_key = storage_key(id, &upload.filename);
    let content_type = upload
        .content_type
        .clone()
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| crate::storage::guess_content_type(&upload.filename).to_string());

    let row = files
        .create(NewFile {
            id,
            org_id,
            project_id,
            task_id,
            name: upload.filename,
            size_bytes: upload.data.len() as i64,
            content_type: content_type.clone(),
            storage_key: storage_key.clone(),
            uploaded_by,
        })
        .await?;

    if let Err(err) = state
        .storage
        .upload(&storage_key, upload.data, Some(&content_type))
        .await
    {
        tracing::error!(file_id = %id, error = %err, "Upload failed, removing file row");
        if let Err(cleanup) = files.delete(id).await {
            tracing::warn!(file_id = %id, error = %cleanup, "Failed to remove orphaned file row");
        }
        return Err(ApiError::new(ErrorCode::Internal, UPLOAD_FAILED));
    }

    tracing::info!(file_id = %id, key = %storage_key, "File uploaded");
    Ok(row)
}

/// Loads a file of the active organization the caller may manage.
async fn accessible_file(
    state: &AppState,
    org: &ActiveOrganization,
    file_id: Uuid,
) -> Result<FileModel, ApiError> {
    let file = FileRepository::new(&state.db).find(file_id).await?;
    if file.org_id != org.org_id {
        return Err(not_found("File not found"));
    }
    if file.uploaded_by != org.user.id && !org.is_admin() {
        return Err(forbidden(Some("You do not have access to this file")));
    }
    Ok(file)
}

/// Uploads a file into the active organization
#[utoipa::path(
    post,
    path = "/api/v1/files/upload",
    security(("bearer_auth" = [])),
    request_body(content_type = "multipart/form-data", description = "`file` part plus optional `project_id` and `task_id`"),
    responses(
        (status = 201, description = "File stored", body = FileInfo),
        (status = 400, description = "Invalid extension or size", body = ApiError),
        (status = 500, description = "Storage failure", body = ApiError)
    ),
    tag = "files"
)]
pub async fn upload_file(
    State(state): State<AppState>,
    org: ActiveOrganization,
    multipart: Multipart,
) -> Result<(StatusCode, Json<FileInfo>), ApiError> {
    let mut form = MultipartForm::read(multipart).await?;
    let upload = form.require_file()?;
    let project_id = form.uuid_field("project_id")?;
    let task_id = form.uuid_field("task_id")?;

    let file = store_file(&state, org.org_id, org.user.id, upload, project_id, task_id).await?;
    Ok((StatusCode::CREATED, Json(file.into())))
}

/// Lists files of the active organization; members only see their own uploads
#[utoipa::path(
    get,
    path = "/api/v1/files",
    security(("bearer_auth" = [])),
    params(ListFilesQuery),
    responses(
        (status = 200, description = "Files page", body = FileListResponse),
        (status = 403, description = "No active organization", body = ApiError)
    ),
    tag = "files"
)]
pub async fn list_files(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Query(query): Query<ListFilesQuery>,
) -> Result<Json<FileListResponse>, ApiError> {
    let page = Page::new(
        query.offset.unwrap_or(state.config.default_pagination_offset),
        query.limit.unwrap_or(state.config.default_pagination_limit),
    );
    let uploader = (!org.is_admin()).then_some(org.user.id);
    let (files, total) = FileRepository::new(&state.db)
        .list(org.org_id, uploader, query.is_deleted, page)
        .await?;

    Ok(Json(FileListResponse {
        files: files.into_iter().map(FileInfo::from).collect(),
        total,
        offset: page.offset,
        limit: page.limit,
    }))
}

/// Returns file metadata with a presigned download URL
#[utoipa::path(
    get,
    path = "/api/v1/files/{file_id}",
    security(("bearer_auth" = [])),
    params(("file_id" = String, Path, description = "File id")),
    responses(
        (status = 200, description = "File", body = FileInfo),
        (status = 403, description = "Not the uploader or an admin", body = ApiError),
        (status = 404, description = "File not found", body = ApiError)
    ),
    tag = "files"
)]
pub async fn get_file(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(file_id): Path<Uuid>,
) -> Result<Json<FileInfo>, ApiError> {
    let file = accessible_file(&state, &org, file_id).await?;
    let url = state.storage.presigned_get_url(&file.storage_key, None)?;
    let mut info = FileInfo::from(file);
    info.url = Some(url);
    Ok(Json(info))
}

/// Returns a presigned download URL
#[utoipa::path(
    get,
    path = "/api/v1/files/{file_id}/url",
    security(("bearer_auth" = [])),
    params(("file_id" = String, Path, description = "File id")),
    responses(
        (status = 200, description = "Presigned URL", body = FileUrlResponse),
        (status = 404, description = "File not found", body = ApiError)
    ),
    tag = "files"
)]
pub async fn get_file_url(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(file_id): Path<Uuid>,
) -> Result<Json<FileUrlResponse>, ApiError> {
    let file = accessible_file(&state, &org, file_id).await?;
    let url = state.storage.presigned_get_url(&file.storage_key, None)?;
    Ok(Json(FileUrlResponse { url }))
}

/// Moves a file to the trash
#[utoipa::path(
    delete,
    path = "/api/v1/files/{file_id}",
    security(("bearer_auth" = [])),
    params(("file_id" = String, Path, description = "File id")),
    responses(
        (status = 204, description = "File moved to trash"),
        (status = 404, description = "File not found", body = ApiError)
    ),
    tag = "files"
)]
pub async fn delete_file(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(file_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let file = accessible_file(&state, &org, file_id).await?;
    FileRepository::new(&state.db)
        .set_deleted(file.id, true)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Deletes the object and its row
#[utoipa::path(
    delete,
    path = "/api/v1/files/{file_id}/permanently",
    security(("bearer_auth" = [])),
    params(("file_id" = String, Path, description = "File id")),
    responses(
        (status = 204, description = "File removed"),
        (status = 404, description = "File not found", body = ApiError)
    ),
    tag = "files"
)]
pub async fn delete_file_permanently(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(file_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let file = accessible_file(&state, &org, file_id).await?;
    state.storage.delete(&file.storage_key).await?;
    FileRepository::new(&state.db).delete(file.id).await?;
    tracing::info!(file_id = %file.id, "File permanently deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CurrentUser;
    use crate::config::AppConfig;
    use crate::models::organization_member::OrganizationRole;
    use crate::test_support::{seed_org, setup_db};

    fn member_of(org_id: Uuid, user_id: Uuid, role: OrganizationRole) -> ActiveOrganization {
        ActiveOrganization {
            user: CurrentUser {
                id: user_id,
                email: None,
            },
            org_id,
            role,
        }
    }

    #[test]
    fn storage_key_keeps_extension_as_uploaded() {
        let id = Uuid::new_v4();
        assert_eq!(storage_key(id, "Report.PDF"), format!("{id}.PDF"));
        assert_eq!(storage_key(id, "archive.tar.gz"), format!("{id}.gz"));
        assert_eq!(storage_key(id, "README"), id.to_string());
        assert_eq!(storage_key(id, ".env"), id.to_string());
        assert_eq!(storage_key(id, "trailing."), id.to_string());
    }

    #[tokio::test]
    async fn members_only_reach_their_own_uploads() {
        let db = setup_db().await;
        let owner = Uuid::new_v4();
        let org = seed_org(&db, "Acme", owner).await;
        let state = AppState::standalone(AppConfig::default(), db).unwrap();

        let file = FileRepository::new(&state.db)
            .create(NewFile {
                id: Uuid::new_v4(),
                org_id: org.id,
                project_id: None,
                task_id: None,
                name: "plan.pdf".to_string(),
                size_bytes: 10,
                content_type: "application/pdf".to_string(),
                storage_key: "plan.pdf".to_string(),
                uploaded_by: owner,
            })
            .await
            .unwrap();

        let uploader = member_of(org.id, owner, OrganizationRole::Member);
        assert_eq!(accessible_file(&state, &uploader, file.id).await.unwrap().id, file.id);

        let admin = member_of(org.id, Uuid::new_v4(), OrganizationRole::Admin);
        assert!(accessible_file(&state, &admin, file.id).await.is_ok());

        let stranger = member_of(org.id, Uuid::new_v4(), OrganizationRole::Member);
        let err = accessible_file(&state, &stranger, file.id).await.unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);

        let other_org = member_of(Uuid::new_v4(), owner, OrganizationRole::Owner);
        let err = accessible_file(&state, &other_org, file.id).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
