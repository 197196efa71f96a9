//! # Task API Handlers
//!
//! Tasks, subtasks and comment threads. Every task is reached through its
//! project, so access follows the project rules: project members plus the
//! owners and admins of the organization.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::projects::{ActivityInfo, activity_infos};
use super::types::{ApiJson, PaginationQuery, UserInfo, actor_name, load_user, load_users};
use crate::auth::{ActiveOrganization, require_project_access};
use crate::cache::project_summary_key;
use crate::error::{ApiError, bad_request, forbidden, validation_error};
use crate::jobs::{JobTask, TaskAssignedArgs, TaskCompletedArgs, TaskUnassignedArgs};
use crate::models::activity::ActivityEntity;
use crate::models::project::Model as ProjectModel;
use crate::models::task::{Model as TaskModel, TaskStatus};
use crate::models::task_comment::Model as CommentModel;
use crate::repositories::task::{NewTask, TaskChanges, TaskFilter};
use crate::repositories::{ActivityRepository, ProfileRepository, ProjectRepository, TaskRepository};
use crate::server::AppState;
use crate::utils::{ancestor_depth, calculate_time_ago};

const SUBTASK_DEPTH_EXCEEDED: &str = "Subtask depth exceed the maximum allowed depth";
const COMMENT_DEPTH_EXCEEDED: &str = "Comment depth exceed the maximum allowed depth";

/// Task as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TaskInfo {
    #[schema(value_type = String)]
    pub id: Uuid,
    #[schema(value_type = String)]
    pub project_id: Uuid,
    #[schema(value_type = Option<String>)]
    pub parent_id: Option<Uuid>,
    pub title: String,
    pub content: Option<String>,
    pub status: TaskStatus,
    #[schema(value_type = Option<String>)]
    pub due_date: Option<String>,
    #[schema(value_type = Option<String>)]
    pub assignee_id: Option<Uuid>,
    #[schema(value_type = String)]
    pub created_by: Uuid,
    #[schema(value_type = String)]
    pub created_at: String,
    #[schema(value_type = String)]
    pub updated_at: String,
}

impl From<TaskModel> for TaskInfo {
    fn from(model: TaskModel) -> Self {
        Self {
            id: model.id,
            project_id: model.project_id,
            parent_id: model.parent_id,
            title: model.title,
            content: model.content,
            status: model.status,
            due_date: model.due_date.map(|due| due.to_rfc3339()),
            assignee_id: model.assignee_id,
            created_by: model.created_by,
            created_at: model.created_at.to_rfc3339(),
            updated_at: model.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ProjectQuery {
    #[param(value_type = String)]
    pub project_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTaskRequest {
    pub title: String,
    pub content: Option<String>,
    pub status: Option<TaskStatus>,
    #[schema(value_type = Option<String>)]
    pub due_date: Option<DateTime<Utc>>,
    #[schema(value_type = Option<String>)]
    pub assignee_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct TaskListQuery {
    /// Required for the top-level listing
    #[param(value_type = Option<String>)]
    pub project_id: Option<Uuid>,
    #[param(value_type = Option<String>)]
    pub created_by: Option<Uuid>,
    #[param(value_type = Option<String>)]
    pub assignee_id: Option<Uuid>,
    pub status: Option<TaskStatus>,
    pub search: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl TaskListQuery {
    fn filter(&self) -> TaskFilter {
        TaskFilter {
            created_by: self.created_by,
            assignee_id: self.assignee_id,
            status: self.status,
            search: self.search.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskInfo>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

/// Only provided fields are changed
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    #[schema(value_type = Option<String>)]
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateAssigneeRequest {
    /// `null` unassigns the task
    #[schema(value_type = Option<String>)]
    pub assignee_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AssigneeResponse {
    pub assignee: Option<UserInfo>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    pub status: TaskStatus,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CommentRequest {
    pub content: String,
}

/// Comment with its nested replies
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CommentInfo {
    #[schema(value_type = String)]
    pub id: Uuid,
    #[schema(value_type = String)]
    pub task_id: Uuid,
    #[schema(value_type = Option<String>)]
    pub parent_id: Option<Uuid>,
    pub content: String,
    pub author: UserInfo,
    /// Relative time in the viewer's timezone, e.g. "5 minutes ago"
    pub message_time: String,
    #[schema(value_type = String)]
    pub created_at: String,
    #[schema(value_type = String)]
    pub updated_at: String,
    #[schema(no_recursion)]
    pub replies: Vec<CommentInfo>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CommentListResponse {
    pub comments: Vec<CommentInfo>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

/// Task with everything the detail view needs
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskDetailResponse {
    pub task: TaskInfo,
    pub creator: UserInfo,
    pub assignee: Option<UserInfo>,
    pub subtasks: Vec<TaskInfo>,
    pub comments: Vec<CommentInfo>,
    pub activities: Vec<ActivityInfo>,
}

fn status_label(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Todo => "todo",
        TaskStatus::InProgress => "in progress",
        TaskStatus::InReview => "in review",
        TaskStatus::Completed => "completed",
    }
}

fn require_content(content: &str, field: &str) -> Result<String, ApiError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(validation_error(
            &format!("{field} must not be empty"),
            serde_json::json!({ field: "Must not be empty" }),
        ));
    }
    Ok(content.to_string())
}

/// Arranges replies under their parents. `roots` keep their order; replies
/// are attached oldest first.
pub fn build_comment_tree<F>(
    roots: Vec<CommentModel>,
    replies: Vec<CommentModel>,
    render: F,
) -> Vec<CommentInfo>
where
    F: Fn(&CommentModel) -> CommentInfo,
{
    let mut children: HashMap<Uuid, Vec<CommentModel>> = HashMap::new();
    for reply in replies {
        if let Some(parent) = reply.parent_id {
            children.entry(parent).or_default().push(reply);
        }
    }

    fn attach<F: Fn(&CommentModel) -> CommentInfo>(
        comment: &CommentModel,
        children: &HashMap<Uuid, Vec<CommentModel>>,
        render: &F,
    ) -> CommentInfo {
        let mut info = render(comment);
        info.replies = children
            .get(&comment.id)
            .map(|replies| {
                replies
                    .iter()
                    .map(|reply| attach(reply, children, render))
                    .collect()
            })
            .unwrap_or_default();
        info
    }

    roots
        .iter()
        .map(|root| attach(root, &children, &render))
        .collect()
}

/// Loads the task and its project, checking the caller may work on them.
pub(super) async fn accessible_task(
    state: &AppState,
    org: &ActiveOrganization,
    task_id: Uuid,
) -> Result<(TaskModel, ProjectModel), ApiError> {
    let task = TaskRepository::new(&state.db).find(task_id).await?;
    let project = accessible_project(state, org, task.project_id).await?;
    Ok((task, project))
}

async fn accessible_project(
    state: &AppState,
    org: &ActiveOrganization,
    project_id: Uuid,
) -> Result<ProjectModel, ApiError> {
    let project = ProjectRepository::new(&state.db)
        .find_in_org(org.org_id, project_id)
        .await?;
    require_project_access(&state.db, project_id, org).await?;
    Ok(project)
}

async fn require_assignable(state: &AppState, project_id: Uuid, user_id: Uuid) -> Result<(), ApiError> {
    if ProjectRepository::new(&state.db)
        .membership(project_id, user_id)
        .await?
        .is_none()
    {
        return Err(bad_request("Assignee is not a member of this project"));
    }
    Ok(())
}

async fn record_task_activity(state: &AppState, task_id: Uuid, user_id: Uuid, description: String) {
    if let Err(err) = ActivityRepository::new(&state.db)
        .record(ActivityEntity::Task, task_id, user_id, description)
        .await
    {
        tracing::warn!(task_id = %task_id, error = %err, "Failed to record task activity");
    }
}

async fn invalidate_summary(state: &AppState, project_id: Uuid) {
    state.cache.delete(&project_summary_key(project_id)).await;
}

/// Queues the assignment notifications for a change from `previous` to
/// `next`. The actor is never notified about their own change.
async fn notify_assignment_change(
    state: &AppState,
    org: &ActiveOrganization,
    task: &TaskModel,
    project: &ProjectModel,
    previous: Option<Uuid>,
    next: Option<Uuid>,
) -> Result<(), ApiError> {
    if previous == next {
        return Ok(());
    }
    let actor = org.user.id;
    let notify_previous = previous.filter(|user| *user != actor);
    let notify_next = next.filter(|user| *user != actor);
    if notify_previous.is_none() && notify_next.is_none() {
        return Ok(());
    }

    let actor_name = actor_name(state, &org.user).await?;
    if let Some(user_id) = notify_previous {
        state
            .dispatcher
            .dispatch(JobTask::TaskUnassigned(TaskUnassignedArgs {
                user_id,
                org_id: org.org_id,
                task_id: task.id,
                task_title: task.title.clone(),
                unassigned_by_id: actor,
                unassigned_by_name: actor_name.clone(),
                project_name: project.name.clone(),
            }))
            .await;
    }
    if let Some(user_id) = notify_next {
        state
            .dispatcher
            .dispatch(JobTask::TaskAssigned(TaskAssignedArgs {
                user_id,
                org_id: org.org_id,
                task_id: task.id,
                task_title: task.title.clone(),
                assigned_by_id: actor,
                assigned_by_name: actor_name,
                project_name: project.name.clone(),
            }))
            .await;
    }
    Ok(())
}

async fn insert_task(
    state: &AppState,
    org: &ActiveOrganization,
    project: &ProjectModel,
    parent_id: Option<Uuid>,
    request: CreateTaskRequest,
) -> Result<TaskModel, ApiError> {
    let title = require_content(&request.title, "title")?;
    if let Some(assignee) = request.assignee_id {
        require_assignable(state, project.id, assignee).await?;
    }

    let task = TaskRepository::new(&state.db)
        .create(NewTask {
            project_id: project.id,
            parent_id,
            title,
            content: request.content,
            status: request.status.unwrap_or_default(),
            due_date: request.due_date,
            assignee_id: request.assignee_id,
            created_by: org.user.id,
        })
        .await?;

    let description = if parent_id.is_some() {
        "created the subtask"
    } else {
        "created the task"
    };
    record_task_activity(state, task.id, org.user.id, description.into()).await;
    notify_assignment_change(state, org, &task, project, None, task.assignee_id).await?;
    invalidate_summary(state, project.id).await;

    tracing::info!(task_id = %task.id, project_id = %project.id, "Task created");
    Ok(task)
}

/// Creates a top-level task
#[utoipa::path(
    post,
    path = "/api/v1/tasks",
    security(("bearer_auth" = [])),
    params(ProjectQuery),
    request_body = CreateTaskRequest,
    responses(
        (status = 201, description = "Task created", body = TaskInfo),
        (status = 400, description = "Invalid task", body = ApiError),
        (status = 403, description = "No access to the project", body = ApiError)
    ),
    tag = "tasks"
)]
pub async fn create_task(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Query(query): Query<ProjectQuery>,
    ApiJson(request): ApiJson<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskInfo>), ApiError> {
    let project = accessible_project(&state, &org, query.project_id).await?;
    let task = insert_task(&state, &org, &project, None, request).await?;
    Ok((StatusCode::CREATED, Json(task.into())))
}

/// Creates a subtask below `task_id`
#[utoipa::path(
    post,
    path = "/api/v1/tasks/{task_id}/subtasks",
    security(("bearer_auth" = [])),
    params(("task_id" = String, Path, description = "Parent task id")),
    request_body = CreateTaskRequest,
    responses(
        (status = 201, description = "Subtask created", body = TaskInfo),
        (status = 400, description = "Subtask depth exceeded", body = ApiError),
        (status = 403, description = "No access to the project", body = ApiError)
    ),
    tag = "tasks"
)]
pub async fn create_subtask(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(task_id): Path<Uuid>,
    ApiJson(request): ApiJson<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskInfo>), ApiError> {
    let (parent, project) = accessible_task(&state, &org, task_id).await?;

    let repo = TaskRepository::new(&state.db);
    let depth = ancestor_depth(parent.id, state.config.max_subtask_depth, |id| {
        repo.parent_of(id)
    })
    .await?;
    if depth.is_none() {
        return Err(bad_request(SUBTASK_DEPTH_EXCEEDED));
    }

    let task = insert_task(&state, &org, &project, Some(parent.id), request).await?;
    Ok((StatusCode::CREATED, Json(task.into())))
}

/// Lists top-level tasks of a project
#[utoipa::path(
    get,
    path = "/api/v1/tasks",
    security(("bearer_auth" = [])),
    params(TaskListQuery),
    responses(
        (status = 200, description = "Tasks page", body = TaskListResponse),
        (status = 400, description = "Missing project_id", body = ApiError)
    ),
    tag = "tasks"
)]
pub async fn list_tasks(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<TaskListResponse>, ApiError> {
    let project_id = query
        .project_id
        .ok_or_else(|| bad_request("project_id is required"))?;
    accessible_project(&state, &org, project_id).await?;

    let page = PaginationQuery {
        limit: query.limit,
        offset: query.offset,
    }
    .page(&state.config);
    let (tasks, total) = TaskRepository::new(&state.db)
        .list_for_project(project_id, &query.filter(), page)
        .await?;
    Ok(Json(TaskListResponse {
        tasks: tasks.into_iter().map(TaskInfo::from).collect(),
        total,
        offset: page.offset,
        limit: page.limit,
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/tasks/{task_id}/subtasks",
    security(("bearer_auth" = [])),
    params(("task_id" = String, Path, description = "Parent task id"), TaskListQuery),
    responses((status = 200, description = "Subtasks page", body = TaskListResponse)),
    tag = "tasks"
)]
pub async fn list_subtasks(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(task_id): Path<Uuid>,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<TaskListResponse>, ApiError> {
    accessible_task(&state, &org, task_id).await?;
    let page = PaginationQuery {
        limit: query.limit,
        offset: query.offset,
    }
    .page(&state.config);
    let (tasks, total) = TaskRepository::new(&state.db)
        .list_subtasks(task_id, &query.filter(), page)
        .await?;
    Ok(Json(TaskListResponse {
        tasks: tasks.into_iter().map(TaskInfo::from).collect(),
        total,
        offset: page.offset,
        limit: page.limit,
    }))
}

/// Viewer timezone for relative timestamps.
async fn viewer_timezone(state: &AppState, org: &ActiveOrganization) -> Result<String, ApiError> {
    Ok(ProfileRepository::new(&state.db)
        .find(org.user.id)
        .await?
        .map(|profile| profile.timezone)
        .unwrap_or_else(|| "UTC".to_string()))
}

async fn comment_tree(
    state: &AppState,
    timezone: &str,
    roots: Vec<CommentModel>,
    replies: Vec<CommentModel>,
) -> Result<Vec<CommentInfo>, ApiError> {
    let author_ids: Vec<Uuid> = roots
        .iter()
        .chain(replies.iter())
        .map(|comment| comment.created_by)
        .collect();
    let authors = load_users(state, &author_ids).await?;

    Ok(build_comment_tree(roots, replies, |comment| CommentInfo {
        id: comment.id,
        task_id: comment.task_id,
        parent_id: comment.parent_id,
        content: comment.content.clone(),
        author: authors[&comment.created_by].clone(),
        message_time: calculate_time_ago(comment.created_at.with_timezone(&Utc), timezone),
        created_at: comment.created_at.to_rfc3339(),
        updated_at: comment.updated_at.to_rfc3339(),
        replies: Vec::new(),
    }))
}

/// Full task view
#[utoipa::path(
    get,
    path = "/api/v1/tasks/{task_id}/get",
    security(("bearer_auth" = [])),
    params(("task_id" = String, Path, description = "Task id")),
    responses(
        (status = 200, description = "Task with people, subtasks, comments and activity", body = TaskDetailResponse),
        (status = 404, description = "Task not found", body = ApiError)
    ),
    tag = "tasks"
)]
pub async fn get_task(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(task_id): Path<Uuid>,
) -> Result<Json<TaskDetailResponse>, ApiError> {
    let (task, _) = accessible_task(&state, &org, task_id).await?;
    let repo = TaskRepository::new(&state.db);

    let subtasks = repo.subtasks(task_id).await?;
    let (roots, _) = repo
        .top_level_comments(task_id, crate::repositories::Page::new(0, u64::MAX >> 1))
        .await?;
    let replies = repo.replies_for_task(task_id).await?;
    let timezone = viewer_timezone(&state, &org).await?;
    let comments = comment_tree(&state, &timezone, roots, replies).await?;
    let activities = ActivityRepository::new(&state.db).for_task(task_id).await?;

    let creator = load_user(&state, task.created_by).await?;
    let assignee = match task.assignee_id {
        Some(id) => Some(load_user(&state, id).await?),
        None => None,
    };

    Ok(Json(TaskDetailResponse {
        task: task.into(),
        creator,
        assignee,
        subtasks: subtasks.into_iter().map(TaskInfo::from).collect(),
        comments,
        activities: activity_infos(&state, activities).await?,
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/tasks/{task_id}/assignee",
    security(("bearer_auth" = [])),
    params(("task_id" = String, Path, description = "Task id")),
    responses((status = 200, description = "Current assignee", body = AssigneeResponse)),
    tag = "tasks"
)]
pub async fn get_assignee(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(task_id): Path<Uuid>,
) -> Result<Json<AssigneeResponse>, ApiError> {
    let (task, _) = accessible_task(&state, &org, task_id).await?;
    let assignee = match task.assignee_id {
        Some(id) => Some(load_user(&state, id).await?),
        None => None,
    };
    Ok(Json(AssigneeResponse { assignee }))
}

/// Assigns, reassigns or unassigns the task
#[utoipa::path(
    patch,
    path = "/api/v1/tasks/{task_id}/assignee",
    security(("bearer_auth" = [])),
    params(("task_id" = String, Path, description = "Task id")),
    request_body = UpdateAssigneeRequest,
    responses(
        (status = 200, description = "Task updated", body = TaskInfo),
        (status = 400, description = "Assignee is not a project member", body = ApiError)
    ),
    tag = "tasks"
)]
pub async fn update_assignee(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(task_id): Path<Uuid>,
    ApiJson(request): ApiJson<UpdateAssigneeRequest>,
) -> Result<Json<TaskInfo>, ApiError> {
    let (task, project) = accessible_task(&state, &org, task_id).await?;
    if task.assignee_id == request.assignee_id {
        return Ok(Json(task.into()));
    }
    if let Some(assignee) = request.assignee_id {
        require_assignable(&state, project.id, assignee).await?;
    }

    let previous = task.assignee_id;
    let updated = TaskRepository::new(&state.db)
        .set_assignee(task_id, request.assignee_id)
        .await?;

    let description = match request.assignee_id {
        Some(id) => format!(
            "assigned the task to {}",
            load_user(&state, id)
                .await?
                .display_name
                .unwrap_or_else(|| "a member".into())
        ),
        None => "removed the assignee".to_string(),
    };
    record_task_activity(&state, task_id, org.user.id, description).await;
    notify_assignment_change(&state, &org, &updated, &project, previous, updated.assignee_id).await?;
    invalidate_summary(&state, project.id).await;

    Ok(Json(updated.into()))
}

/// Changes the status; completing a task notifies the project members
#[utoipa::path(
    patch,
    path = "/api/v1/tasks/{task_id}/status",
    security(("bearer_auth" = [])),
    params(("task_id" = String, Path, description = "Task id")),
    request_body = UpdateStatusRequest,
    responses((status = 200, description = "Task updated", body = TaskInfo)),
    tag = "tasks"
)]
pub async fn update_status(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(task_id): Path<Uuid>,
    ApiJson(request): ApiJson<UpdateStatusRequest>,
) -> Result<Json<TaskInfo>, ApiError> {
    let (task, project) = accessible_task(&state, &org, task_id).await?;
    if task.status == request.status {
        return Ok(Json(task.into()));
    }

    let updated = TaskRepository::new(&state.db)
        .set_status(task_id, request.status)
        .await?;
    record_task_activity(
        &state,
        task_id,
        org.user.id,
        format!(
            "changed the status from {} to {}",
            status_label(task.status),
            status_label(updated.status)
        ),
    )
    .await;

    if updated.status == TaskStatus::Completed {
        let completed_by_name = actor_name(&state, &org.user).await?;
        state
            .dispatcher
            .dispatch(JobTask::TaskCompleted(TaskCompletedArgs {
                project_id: project.id,
                org_id: org.org_id,
                task_id,
                task_title: updated.title.clone(),
                completed_by_id: org.user.id,
                completed_by_name,
                project_name: project.name.clone(),
            }))
            .await;
    }
    invalidate_summary(&state, project.id).await;

    Ok(Json(updated.into()))
}

#[utoipa::path(
    patch,
    path = "/api/v1/tasks/{task_id}",
    security(("bearer_auth" = [])),
    params(("task_id" = String, Path, description = "Task id")),
    request_body = UpdateTaskRequest,
    responses((status = 200, description = "Task updated", body = TaskInfo)),
    tag = "tasks"
)]
pub async fn update_task(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(task_id): Path<Uuid>,
    ApiJson(request): ApiJson<UpdateTaskRequest>,
) -> Result<Json<TaskInfo>, ApiError> {
    let (_, project) = accessible_task(&state, &org, task_id).await?;
    let title = request
        .title
        .as_deref()
        .map(|title| require_content(title, "title"))
        .transpose()?;

    let mut changed = Vec::new();
    if title.is_some() {
        changed.push("title");
    }
    if request.content.is_some() {
        changed.push("description");
    }
    if request.due_date.is_some() {
        changed.push("due date");
    }

    let updated = TaskRepository::new(&state.db)
        .update_details(
            task_id,
            TaskChanges {
                title,
                content: request.content,
                due_date: request.due_date,
            },
        )
        .await?;
    if !changed.is_empty() {
        record_task_activity(
            &state,
            task_id,
            org.user.id,
            format!("updated the {}", changed.join(", ")),
        )
        .await;
    }
    invalidate_summary(&state, project.id).await;

    Ok(Json(updated.into()))
}

/// Deletes a task with its subtasks and comments
#[utoipa::path(
    delete,
    path = "/api/v1/tasks/{task_id}",
    security(("bearer_auth" = [])),
    params(("task_id" = String, Path, description = "Task id")),
    responses(
        (status = 204, description = "Task deleted"),
        (status = 403, description = "Not the creator or an organization admin", body = ApiError)
    ),
    tag = "tasks"
)]
pub async fn delete_task(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(task_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let (task, project) = accessible_task(&state, &org, task_id).await?;
    if task.created_by != org.user.id && !org.is_admin() {
        return Err(forbidden(Some(
            "Only the task creator or organization admins can delete this task",
        )));
    }

    TaskRepository::new(&state.db).delete(task_id).await?;
    invalidate_summary(&state, project.id).await;
    tracing::info!(task_id = %task_id, user_id = %org.user.id, "Task deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn render_single_comment(
    state: &AppState,
    org: &ActiveOrganization,
    comment: CommentModel,
) -> Result<CommentInfo, ApiError> {
    let timezone = viewer_timezone(state, org).await?;
    let mut tree = comment_tree(state, &timezone, vec![comment], Vec::new()).await?;
    tree.pop()
        .ok_or_else(|| ApiError::from(anyhow::anyhow!("comment tree is empty")))
}

#[utoipa::path(
    post,
    path = "/api/v1/tasks/{task_id}/comments",
    security(("bearer_auth" = [])),
    params(("task_id" = String, Path, description = "Task id")),
    request_body = CommentRequest,
    responses((status = 201, description = "Comment created", body = CommentInfo)),
    tag = "tasks"
)]
pub async fn create_comment(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(task_id): Path<Uuid>,
    ApiJson(request): ApiJson<CommentRequest>,
) -> Result<(StatusCode, Json<CommentInfo>), ApiError> {
    accessible_task(&state, &org, task_id).await?;
    let content = require_content(&request.content, "content")?;
    let comment = TaskRepository::new(&state.db)
        .create_comment(task_id, None, content, org.user.id)
        .await?;
    record_task_activity(&state, task_id, org.user.id, "commented on the task".into()).await;
    Ok((
        StatusCode::CREATED,
        Json(render_single_comment(&state, &org, comment).await?),
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/tasks/{task_id}/comments/{comment_id}/reply",
    security(("bearer_auth" = [])),
    params(
        ("task_id" = String, Path, description = "Task id"),
        ("comment_id" = String, Path, description = "Comment being answered")
    ),
    request_body = CommentRequest,
    responses(
        (status = 201, description = "Reply created", body = CommentInfo),
        (status = 400, description = "Comment depth exceeded", body = ApiError)
    ),
    tag = "tasks"
)]
pub async fn reply_to_comment(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path((task_id, comment_id)): Path<(Uuid, Uuid)>,
    ApiJson(request): ApiJson<CommentRequest>,
) -> Result<(StatusCode, Json<CommentInfo>), ApiError> {
    accessible_task(&state, &org, task_id).await?;
    let repo = TaskRepository::new(&state.db);
    let parent = repo.find_comment(comment_id).await?;
    if parent.task_id != task_id {
        return Err(crate::error::not_found("Comment not found"));
    }
    let content = require_content(&request.content, "content")?;

    let depth = ancestor_depth(parent.id, state.config.max_comment_reply_depth, |id| {
        repo.comment_parent_of(id)
    })
    .await?;
    if depth.is_none() {
        return Err(bad_request(COMMENT_DEPTH_EXCEEDED));
    }

    let reply = repo
        .create_comment(task_id, Some(parent.id), content, org.user.id)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(render_single_comment(&state, &org, reply).await?),
    ))
}

async fn authored_comment(
    state: &AppState,
    org: &ActiveOrganization,
    comment_id: Uuid,
) -> Result<CommentModel, ApiError> {
    let comment = TaskRepository::new(&state.db)
        .find_comment(comment_id)
        .await?;
    accessible_task(state, org, comment.task_id).await?;
    if comment.created_by != org.user.id {
        return Err(forbidden(Some("Only the author can change this comment")));
    }
    Ok(comment)
}

#[utoipa::path(
    put,
    path = "/api/v1/tasks/comments/{comment_id}",
    security(("bearer_auth" = [])),
    params(("comment_id" = String, Path, description = "Comment id")),
    request_body = CommentRequest,
    responses(
        (status = 200, description = "Comment updated", body = CommentInfo),
        (status = 403, description = "Not the author", body = ApiError)
    ),
    tag = "tasks"
)]
pub async fn update_comment(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(comment_id): Path<Uuid>,
    ApiJson(request): ApiJson<CommentRequest>,
) -> Result<Json<CommentInfo>, ApiError> {
    authored_comment(&state, &org, comment_id).await?;
    let content = require_content(&request.content, "content")?;
    let comment = TaskRepository::new(&state.db)
        .update_comment(comment_id, content)
        .await?;
    Ok(Json(render_single_comment(&state, &org, comment).await?))
}

#[utoipa::path(
    delete,
    path = "/api/v1/tasks/comments/{comment_id}",
    security(("bearer_auth" = [])),
    params(("comment_id" = String, Path, description = "Comment id")),
    responses(
        (status = 204, description = "Comment and its replies deleted"),
        (status = 403, description = "Not the author", body = ApiError)
    ),
    tag = "tasks"
)]
pub async fn delete_comment(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(comment_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    authored_comment(&state, &org, comment_id).await?;
    TaskRepository::new(&state.db)
        .delete_comment(comment_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Top-level comments with their nested replies
#[utoipa::path(
    get,
    path = "/api/v1/tasks/{task_id}/comments",
    security(("bearer_auth" = [])),
    params(("task_id" = String, Path, description = "Task id"), PaginationQuery),
    responses((status = 200, description = "Comment threads", body = CommentListResponse)),
    tag = "tasks"
)]
pub async fn list_comments(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(task_id): Path<Uuid>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<CommentListResponse>, ApiError> {
    accessible_task(&state, &org, task_id).await?;
    let page = query.page(&state.config);
    let repo = TaskRepository::new(&state.db);
    let (roots, total) = repo.top_level_comments(task_id, page).await?;
    let replies = repo.replies_for_task(task_id).await?;
    let timezone = viewer_timezone(&state, &org).await?;

    Ok(Json(CommentListResponse {
        comments: comment_tree(&state, &timezone, roots, replies).await?,
        total,
        offset: page.offset,
        limit: page.limit,
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/tasks/{task_id}/activities",
    security(("bearer_auth" = [])),
    params(("task_id" = String, Path, description = "Task id")),
    responses((status = 200, description = "Task activity, newest first", body = [ActivityInfo])),
    tag = "tasks"
)]
pub async fn list_task_activities(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(task_id): Path<Uuid>,
) -> Result<Json<Vec<ActivityInfo>>, ApiError> {
    accessible_task(&state, &org, task_id).await?;
    let activities = ActivityRepository::new(&state.db).for_task(task_id).await?;
    Ok(Json(activity_infos(&state, activities).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(id: Uuid, parent_id: Option<Uuid>, content: &str) -> CommentModel {
        let now = Utc::now();
        CommentModel {
            id,
            task_id: Uuid::nil(),
            parent_id,
            content: content.to_string(),
            created_by: Uuid::nil(),
            created_at: now.into(),
            updated_at: now.into(),
        }
    }

    fn render(model: &CommentModel) -> CommentInfo {
        CommentInfo {
            id: model.id,
            task_id: model.task_id,
            parent_id: model.parent_id,
            content: model.content.clone(),
            author: UserInfo {
                id: model.created_by,
                display_name: None,
                avatar_url: None,
            },
            message_time: String::new(),
            created_at: String::new(),
            updated_at: String::new(),
            replies: Vec::new(),
        }
    }

    #[test]
    fn replies_nest_under_their_parents() {
        let root = Uuid::new_v4();
        let other_root = Uuid::new_v4();
        let reply = Uuid::new_v4();
        let nested = Uuid::new_v4();

        let tree = build_comment_tree(
            vec![comment(root, None, "root"), comment(other_root, None, "other")],
            vec![
                comment(reply, Some(root), "reply"),
                comment(nested, Some(reply), "nested"),
                comment(Uuid::new_v4(), Some(Uuid::new_v4()), "orphan"),
            ],
            render,
        );

        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].replies.len(), 1);
        assert_eq!(tree[0].replies[0].content, "reply");
        assert_eq!(tree[0].replies[0].replies[0].content, "nested");
        assert!(tree[1].replies.is_empty());
    }

    #[test]
    fn status_labels_are_readable() {
        assert_eq!(status_label(TaskStatus::InProgress), "in progress");
        assert_eq!(status_label(TaskStatus::Completed), "completed");
    }
}
