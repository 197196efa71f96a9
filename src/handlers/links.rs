//! # Task Link API Handlers
//!
//! External URLs pinned to a task. Access follows the task's project.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::tasks::accessible_task;
use super::types::{ApiJson, PaginationQuery};
use crate::auth::ActiveOrganization;
use crate::error::{ApiError, bad_request, validation_error};
use crate::models::task_link::Model as LinkModel;
use crate::repositories::LinkRepository;
use crate::repositories::link::LinkChanges;
use crate::server::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LinkInfo {
    #[schema(value_type = String)]
    pub id: Uuid,
    pub title: Option<String>,
    pub link_url: String,
    #[schema(value_type = String)]
    pub created_time: String,
}

impl From<LinkModel> for LinkInfo {
    fn from(model: LinkModel) -> Self {
        Self {
            id: model.id,
            title: model.title,
            link_url: model.link_url,
            created_time: model.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateLinkRequest {
    pub title: Option<String>,
    pub link_url: String,
}

/// Only provided fields are changed
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateLinkRequest {
    pub title: Option<String>,
    pub link_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LinkListResponse {
    pub links: Vec<LinkInfo>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

fn require_url(link_url: &str) -> Result<String, ApiError> {
    let link_url = link_url.trim();
    match url::Url::parse(link_url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(link_url.to_string()),
        _ => Err(validation_error(
            "Invalid link URL",
            serde_json::json!({ "link_url": "Must be an http(s) URL" }),
        )),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/tasks/{task_id}/links",
    security(("bearer_auth" = [])),
    params(("task_id" = String, Path, description = "Task id")),
    request_body = CreateLinkRequest,
    responses(
        (status = 201, description = "Link added", body = LinkInfo),
        (status = 400, description = "Invalid URL", body = ApiError),
        (status = 404, description = "Task not found", body = ApiError)
    ),
    tag = "tasks"
)]
pub async fn create_link(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(task_id): Path<Uuid>,
    ApiJson(request): ApiJson<CreateLinkRequest>,
) -> Result<(StatusCode, Json<LinkInfo>), ApiError> {
    accessible_task(&state, &org, task_id).await?;
    let link_url = require_url(&request.link_url)?;
    let link = LinkRepository::new(&state.db)
        .create(task_id, request.title, link_url, org.user.id)
        .await?;
    Ok((StatusCode::CREATED, Json(link.into())))
}

/// Links of a task, newest first
#[utoipa::path(
    get,
    path = "/api/v1/tasks/{task_id}/links",
    security(("bearer_auth" = [])),
    params(("task_id" = String, Path, description = "Task id"), PaginationQuery),
    responses((status = 200, description = "Links page", body = LinkListResponse)),
    tag = "tasks"
)]
pub async fn list_links(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(task_id): Path<Uuid>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<LinkListResponse>, ApiError> {
    accessible_task(&state, &org, task_id).await?;
    let page = query.page(&state.config);
    let (links, total) = LinkRepository::new(&state.db).list(task_id, page).await?;
    Ok(Json(LinkListResponse {
        links: links.into_iter().map(LinkInfo::from).collect(),
        total,
        offset: page.offset,
        limit: page.limit,
    }))
}

#[utoipa::path(
    put,
    path = "/api/v1/tasks/{task_id}/links/{link_id}",
    security(("bearer_auth" = [])),
    params(
        ("task_id" = String, Path, description = "Task id"),
        ("link_id" = String, Path, description = "Link id")
    ),
    request_body = UpdateLinkRequest,
    responses(
        (status = 200, description = "Link updated", body = LinkInfo),
        (status = 400, description = "No updates provided", body = ApiError),
        (status = 404, description = "Link not found", body = ApiError)
    ),
    tag = "tasks"
)]
pub async fn update_link(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path((task_id, link_id)): Path<(Uuid, Uuid)>,
    ApiJson(request): ApiJson<UpdateLinkRequest>,
) -> Result<Json<LinkInfo>, ApiError> {
    accessible_task(&state, &org, task_id).await?;
    let changes = LinkChanges {
        title: request.title,
        link_url: request.link_url.as_deref().map(require_url).transpose()?,
    };
    if changes.is_empty() {
        return Err(bad_request("No updates provided"));
    }

    let repo = LinkRepository::new(&state.db);
    let link = repo.find_for_task(task_id, link_id).await?;
    Ok(Json(repo.update(link, changes).await?.into()))
}

#[utoipa::path(
    delete,
    path = "/api/v1/tasks/{task_id}/links/{link_id}",
    security(("bearer_auth" = [])),
    params(
        ("task_id" = String, Path, description = "Task id"),
        ("link_id" = String, Path, description = "Link id")
    ),
    responses(
        (status = 204, description = "Link removed"),
        (status = 404, description = "Link not found", body = ApiError)
    ),
    tag = "tasks"
)]
pub async fn delete_link(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path((task_id, link_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    accessible_task(&state, &org, task_id).await?;
    LinkRepository::new(&state.db).delete(task_id, link_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_web_urls_are_accepted() {
        assert_eq!(
            require_url("  https://example.com/docs ").unwrap(),
            "https://example.com/docs"
        );
        assert!(require_url("http://localhost:3000").is_ok());
        for bad in ["", "example.com", "javascript:alert(1)", "ftp://example.com/a"] {
            assert_eq!(require_url(bad).unwrap_err().status, StatusCode::BAD_REQUEST);
        }
    }
}
