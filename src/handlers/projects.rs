//! # Project API Handlers
//!
//! Projects live inside the caller's active organization. Organization
//! owners and admins see every project; everyone else works with the
//! projects they are a member of.

use std::collections::{BTreeMap, HashSet};

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::files::store_file;
use super::types::{ApiJson, MultipartForm, PaginationQuery, UserInfo, actor_name, file_url, load_users};
use crate::auth::{ActiveOrganization, require_project_access, require_project_manager};
use crate::cache::{PROJECT_SUMMARY_TTL_SECS, project_summary_key};
use crate::error::{ApiError, bad_request, validation_error};
use crate::jobs::{JobTask, ProjectMemberAddedArgs};
use crate::models::activity::{ActivityEntity, Model as ActivityModel};
use crate::models::project::{Model as ProjectModel, ProjectView};
use crate::models::project_member::ProjectRole;
use crate::models::task::{Model as TaskModel, TaskStatus};
use crate::repositories::project::{NewProject, ProjectOrder};
use crate::repositories::{ActivityRepository, OrganizationRepository, Page, ProjectRepository, TaskRepository};
use crate::server::AppState;
use crate::utils::{random_color, random_icon};

const RECENT_ACTIVITY_LIMIT: u64 = 10;

/// Project as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProjectInfo {
    #[schema(value_type = String)]
    pub id: Uuid,
    #[schema(value_type = String)]
    pub org_id: Uuid,
    pub name: String,
    pub avatar_color: Option<String>,
    pub avatar_icon: Option<String>,
    pub avatar_url: Option<String>,
    #[schema(value_type = String, format = Date)]
    pub start_date: NaiveDate,
    #[schema(value_type = Option<String>, format = Date)]
    pub end_date: Option<NaiveDate>,
    pub view: ProjectView,
    pub progress_percentage: i32,
    pub archived: bool,
    pub is_favourite: bool,
    #[schema(value_type = String)]
    pub created_by: Uuid,
    #[schema(value_type = String)]
    pub created_at: String,
    #[schema(value_type = String)]
    pub updated_at: String,
}

impl ProjectInfo {
    async fn build(state: &AppState, model: ProjectModel, is_favourite: bool) -> Self {
        let avatar_url = file_url(state, model.avatar_file_id).await;
        Self {
            id: model.id,
            org_id: model.org_id,
            name: model.name,
            avatar_color: model.avatar_color,
            avatar_icon: model.avatar_icon,
            avatar_url,
            start_date: model.start_date,
            end_date: model.end_date,
            view: model.view,
            progress_percentage: model.progress_percentage,
            archived: model.archived,
            is_favourite,
            created_by: model.created_by,
            created_at: model.created_at.to_rfc3339(),
            updated_at: model.updated_at.to_rfc3339(),
        }
    }

    async fn build_all(
        state: &AppState,
        models: Vec<ProjectModel>,
        favourites: &HashSet<Uuid>,
    ) -> Vec<Self> {
        let mut projects = Vec::with_capacity(models.len());
        for model in models {
            let is_favourite = favourites.contains(&model.id);
            projects.push(Self::build(state, model, is_favourite).await);
        }
        projects
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProjectRequest {
    pub name: String,
    pub avatar_color: Option<String>,
    pub avatar_icon: Option<String>,
    /// Defaults to today
    #[schema(value_type = Option<String>, format = Date)]
    pub start_date: Option<NaiveDate>,
    #[schema(value_type = Option<String>, format = Date)]
    pub end_date: Option<NaiveDate>,
    pub view: Option<ProjectView>,
}

#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct ListProjectsQuery {
    /// Case-insensitive name filter
    pub search: Option<String>,
    /// `alphabetical_asc`, `alphabetical_desc`, `created_asc` or `created_desc`
    pub order_by: Option<ProjectOrder>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProjectListResponse {
    pub member_projects: Vec<ProjectInfo>,
    pub favourite_projects: Vec<ProjectInfo>,
    pub non_member_projects_count: u64,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProjectPageResponse {
    pub projects: Vec<ProjectInfo>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FavouriteResponse {
    pub is_favourite: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddProjectMemberRequest {
    #[schema(value_type = String)]
    pub user_id: Uuid,
    /// Defaults to `member`
    pub role: Option<ProjectRole>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProjectMemberInfo {
    #[schema(value_type = String)]
    pub user_id: Uuid,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub role: ProjectRole,
}

/// Activity log entry with its author
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ActivityInfo {
    #[schema(value_type = String)]
    pub id: Uuid,
    pub entity_type: ActivityEntity,
    #[schema(value_type = String)]
    pub entity_id: Uuid,
    pub user: UserInfo,
    pub description: String,
    #[schema(value_type = String)]
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ActivityListResponse {
    pub activities: Vec<ActivityInfo>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TaskSummary {
    pub completed: u64,
    pub incomplete: u64,
    pub overdue: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserWorkload {
    #[schema(value_type = String)]
    pub user_id: Uuid,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub task_count: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TeamWorkload {
    pub assigned_percentage: f64,
    pub unassigned_percentage: f64,
    pub user_workloads: Vec<UserWorkload>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProjectSummaryResponse {
    pub project: ProjectInfo,
    pub members: Vec<UserInfo>,
    pub task_summary: TaskSummary,
    pub team_workload: TeamWorkload,
    pub recent_activities: Vec<ActivityInfo>,
}

/// Counts computed over the top-level tasks of a project.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskStatistics {
    pub summary: TaskSummary,
    pub assigned_percentage: f64,
    pub unassigned_percentage: f64,
    /// Tasks per assignee with their share of all tasks
    pub per_user: BTreeMap<Uuid, (u64, f64)>,
}

fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 / total as f64 * 10_000.0).round() / 100.0
}

/// Completed / incomplete / overdue counts and the workload split.
/// Overdue tasks are incomplete tasks due before `now`.
pub fn compute_task_statistics(tasks: &[TaskModel], now: DateTime<Utc>) -> TaskStatistics {
    let mut summary = TaskSummary::default();
    let mut per_user: BTreeMap<Uuid, u64> = BTreeMap::new();
    let mut assigned = 0;

    for task in tasks {
        if task.status == TaskStatus::Completed {
            summary.completed += 1;
        } else {
            summary.incomplete += 1;
            if task.due_date.is_some_and(|due| due < now) {
                summary.overdue += 1;
            }
        }
        if let Some(assignee) = task.assignee_id {
            assigned += 1;
            *per_user.entry(assignee).or_default() += 1;
        }
    }

    let total = tasks.len() as u64;
    TaskStatistics {
        summary,
        assigned_percentage: percentage(assigned, total),
        unassigned_percentage: percentage(total - assigned, total),
        per_user: per_user
            .into_iter()
            .map(|(user, count)| (user, (count, percentage(count, total))))
            .collect(),
    }
}

/// Org admins, and project managers.
async fn require_project_admin(
    db: &DatabaseConnection,
    project_id: Uuid,
    org: &ActiveOrganization,
) -> Result<(), ApiError> {
    if org.is_admin() {
        return Ok(());
    }
    require_project_manager(db, project_id, org.user.id).await
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

pub(crate) async fn activity_infos(
    state: &AppState,
    activities: Vec<ActivityModel>,
) -> Result<Vec<ActivityInfo>, ApiError> {
    let ids: Vec<Uuid> = activities.iter().map(|entry| entry.user_id).collect();
    let users = load_users(state, &ids).await?;
    Ok(activities
        .into_iter()
        .map(|entry| ActivityInfo {
            id: entry.id,
            entity_type: entry.entity_type,
            entity_id: entry.entity_id,
            user: users[&entry.user_id].clone(),
            description: entry.description,
            created_at: entry.created_at.to_rfc3339(),
        })
        .collect())
}

async fn record_project_activity(state: &AppState, project_id: Uuid, user_id: Uuid, description: String) {
    if let Err(err) = ActivityRepository::new(&state.db)
        .record(ActivityEntity::Project, project_id, user_id, description)
        .await
    {
        tracing::warn!(project_id = %project_id, error = %err, "Failed to record project activity");
    }
}

/// Creates a project in the active organization
#[utoipa::path(
    post,
    path = "/api/v1/projects/create",
    security(("bearer_auth" = [])),
    request_body = CreateProjectRequest,
    responses(
        (status = 201, description = "Project created", body = ProjectInfo),
        (status = 400, description = "Project name already exists", body = ApiError),
        (status = 403, description = "Not an organization owner or admin", body = ApiError)
    ),
    tag = "projects"
)]
pub async fn create_project(
    State(state): State<AppState>,
    org: ActiveOrganization,
    ApiJson(request): ApiJson<CreateProjectRequest>,
) -> Result<(StatusCode, Json<ProjectInfo>), ApiError> {
    org.require_admin()?;

    let name = request.name.trim().to_string();
    if name.is_empty() {
        return Err(validation_error(
            "Project name is required",
            serde_json::json!({ "name": "Must not be empty" }),
        ));
    }
    let start_date = request.start_date.unwrap_or_else(|| Utc::now().date_naive());
    if request.end_date.is_some_and(|end| end < start_date) {
        return Err(validation_error(
            "End date must not be before the start date",
            serde_json::json!({ "end_date": "Must be on or after start_date" }),
        ));
    }

    let repo = ProjectRepository::new(&state.db);
    if repo.name_exists(org.org_id, &name).await? {
        return Err(bad_request("Project name already exists"));
    }

    let project = repo
        .create_with_owner(
            org.org_id,
            NewProject {
                name,
                avatar_color: request.avatar_color.unwrap_or_else(random_color),
                avatar_icon: request.avatar_icon.unwrap_or_else(random_icon),
                start_date,
                end_date: request.end_date,
                view: request.view.unwrap_or_default(),
            },
            org.user.id,
        )
        .await?;
    record_project_activity(&state, project.id, org.user.id, "created the project".into()).await;

    tracing::info!(project_id = %project.id, org_id = %org.org_id, "Project created");
    Ok((
        StatusCode::CREATED,
        Json(ProjectInfo::build(&state, project, false).await),
    ))
}

/// Lists the caller's projects, favourites and the number of projects
/// they have not joined
#[utoipa::path(
    get,
    path = "/api/v1/projects",
    security(("bearer_auth" = [])),
    params(ListProjectsQuery),
    responses((status = 200, description = "Project overview", body = ProjectListResponse)),
    tag = "projects"
)]
pub async fn list_projects(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Query(query): Query<ListProjectsQuery>,
) -> Result<Json<ProjectListResponse>, ApiError> {
    let page = Page::new(
        query.offset.unwrap_or(state.config.default_pagination_offset),
        query.limit.unwrap_or(state.config.default_pagination_limit),
    );
    let repo = ProjectRepository::new(&state.db);
    let (members, total) = repo
        .list_member_projects(
            org.org_id,
            org.user.id,
            query.search.as_deref(),
            query.order_by.unwrap_or_default(),
            page,
        )
        .await?;
    let favourites = repo.list_favourites(org.org_id, org.user.id).await?;
    let non_member_projects_count = repo
        .count_non_member_projects(org.org_id, org.user.id)
        .await?;

    let favourite_ids: HashSet<Uuid> = favourites.iter().map(|project| project.id).collect();
    Ok(Json(ProjectListResponse {
        member_projects: ProjectInfo::build_all(&state, members, &favourite_ids).await,
        favourite_projects: ProjectInfo::build_all(&state, favourites, &favourite_ids).await,
        non_member_projects_count,
        total,
        offset: page.offset,
        limit: page.limit,
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/projects/non-member",
    security(("bearer_auth" = [])),
    params(PaginationQuery),
    responses(
        (status = 200, description = "Projects the caller has not joined", body = ProjectPageResponse),
        (status = 403, description = "Not an organization owner or admin", body = ApiError)
    ),
    tag = "projects"
)]
pub async fn list_non_member_projects(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<ProjectPageResponse>, ApiError> {
    org.require_admin()?;
    let page = query.page(&state.config);
    let (rows, total) = ProjectRepository::new(&state.db)
        .list_non_member_projects(org.org_id, org.user.id, page)
        .await?;
    Ok(Json(ProjectPageResponse {
        projects: ProjectInfo::build_all(&state, rows, &HashSet::new()).await,
        total,
        offset: page.offset,
        limit: page.limit,
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/projects/archived",
    security(("bearer_auth" = [])),
    params(PaginationQuery),
    responses(
        (status = 200, description = "Archived projects", body = ProjectPageResponse),
        (status = 403, description = "Not an organization owner or admin", body = ApiError)
    ),
    tag = "projects"
)]
pub async fn list_archived_projects(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<ProjectPageResponse>, ApiError> {
    org.require_admin()?;
    let page = query.page(&state.config);
    let (rows, total) = ProjectRepository::new(&state.db)
        .list_archived(org.org_id, page)
        .await?;
    Ok(Json(ProjectPageResponse {
        projects: ProjectInfo::build_all(&state, rows, &HashSet::new()).await,
        total,
        offset: page.offset,
        limit: page.limit,
    }))
}

async fn set_archived(
    state: &AppState,
    org: &ActiveOrganization,
    project_id: Uuid,
    archived: bool,
) -> Result<StatusCode, ApiError> {
    ProjectRepository::new(&state.db)
        .find_in_org(org.org_id, project_id)
        .await?;
    require_project_admin(&state.db, project_id, org).await?;
    ProjectRepository::new(&state.db)
        .set_archived(project_id, archived)
        .await?;
    let description = if archived {
        "archived the project"
    } else {
        "restored the project"
    };
    record_project_activity(state, project_id, org.user.id, description.into()).await;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    patch,
    path = "/api/v1/projects/{project_id}/archive",
    security(("bearer_auth" = [])),
    params(("project_id" = String, Path, description = "Project id")),
    responses(
        (status = 204, description = "Project archived"),
        (status = 403, description = "Not allowed", body = ApiError),
        (status = 404, description = "Project not found", body = ApiError)
    ),
    tag = "projects"
)]
pub async fn archive_project(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(project_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    set_archived(&state, &org, project_id, true).await
}

#[utoipa::path(
    patch,
    path = "/api/v1/projects/{project_id}/restore",
    security(("bearer_auth" = [])),
    params(("project_id" = String, Path, description = "Project id")),
    responses(
        (status = 204, description = "Project restored"),
        (status = 403, description = "Not allowed", body = ApiError),
        (status = 404, description = "Project not found", body = ApiError)
    ),
    tag = "projects"
)]
pub async fn restore_project(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(project_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    set_archived(&state, &org, project_id, false).await
}

/// Toggles the favourite marker
#[utoipa::path(
    patch,
    path = "/api/v1/projects/{project_id}/favourite",
    security(("bearer_auth" = [])),
    params(("project_id" = String, Path, description = "Project id")),
    responses(
        (status = 200, description = "New favourite state", body = FavouriteResponse),
        (status = 403, description = "No access to the project", body = ApiError)
    ),
    tag = "projects"
)]
pub async fn toggle_favourite(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(project_id): Path<Uuid>,
) -> Result<Json<FavouriteResponse>, ApiError> {
    accessible_project(&state, &org, project_id).await?;
    let is_favourite = ProjectRepository::new(&state.db)
        .toggle_favourite(project_id, org.user.id)
        .await?;
    Ok(Json(FavouriteResponse { is_favourite }))
}

/// Lets an organization owner or admin join a project
#[utoipa::path(
    post,
    path = "/api/v1/projects/{project_id}/join",
    security(("bearer_auth" = [])),
    params(("project_id" = String, Path, description = "Project id")),
    responses(
        (status = 201, description = "Joined the project", body = ProjectInfo),
        (status = 403, description = "Not an organization owner or admin", body = ApiError),
        (status = 409, description = "Already a member", body = ApiError)
    ),
    tag = "projects"
)]
pub async fn join_project(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(project_id): Path<Uuid>,
) -> Result<(StatusCode, Json<ProjectInfo>), ApiError> {
    org.require_admin()?;
    let repo = ProjectRepository::new(&state.db);
    let project = repo.find_in_org(org.org_id, project_id).await?;
    repo.add_member(project_id, org.user.id, ProjectRole::Member)
        .await?;
    record_project_activity(&state, project_id, org.user.id, "joined the project".into()).await;

    let is_favourite = repo.is_favourite(project_id, org.user.id).await?;
    Ok((
        StatusCode::CREATED,
        Json(ProjectInfo::build(&state, project, is_favourite).await),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/projects/{project_id}",
    security(("bearer_auth" = [])),
    params(("project_id" = String, Path, description = "Project id")),
    responses(
        (status = 200, description = "Project", body = ProjectInfo),
        (status = 403, description = "No access to the project", body = ApiError),
        (status = 404, description = "Project not found", body = ApiError)
    ),
    tag = "projects"
)]
pub async fn get_project(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(project_id): Path<Uuid>,
) -> Result<Json<ProjectInfo>, ApiError> {
    let project = accessible_project(&state, &org, project_id).await?;
    let is_favourite = ProjectRepository::new(&state.db)
        .is_favourite(project_id, org.user.id)
        .await?;
    Ok(Json(ProjectInfo::build(&state, project, is_favourite).await))
}

#[utoipa::path(
    get,
    path = "/api/v1/projects/{project_id}/members",
    security(("bearer_auth" = [])),
    params(("project_id" = String, Path, description = "Project id")),
    responses(
        (status = 200, description = "Project members", body = [ProjectMemberInfo]),
        (status = 403, description = "No access to the project", body = ApiError)
    ),
    tag = "projects"
)]
pub async fn list_project_members(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(project_id): Path<Uuid>,
) -> Result<Json<Vec<ProjectMemberInfo>>, ApiError> {
    accessible_project(&state, &org, project_id).await?;
    let members = ProjectRepository::new(&state.db).members(project_id).await?;
    let ids: Vec<Uuid> = members.iter().map(|member| member.user_id).collect();
    let users = load_users(&state, &ids).await?;

    Ok(Json(
        members
            .into_iter()
            .map(|member| {
                let user = &users[&member.user_id];
                ProjectMemberInfo {
                    user_id: member.user_id,
                    display_name: user.display_name.clone(),
                    avatar_url: user.avatar_url.clone(),
                    role: member.role,
                }
            })
            .collect(),
    ))
}

/// Adds an organization member to the project
#[utoipa::path(
    post,
    path = "/api/v1/projects/{project_id}/members",
    security(("bearer_auth" = [])),
    params(("project_id" = String, Path, description = "Project id")),
    request_body = AddProjectMemberRequest,
    responses(
        (status = 201, description = "Member added", body = ProjectMemberInfo),
        (status = 400, description = "User is not in the organization", body = ApiError),
        (status = 403, description = "Not a project owner or admin", body = ApiError),
        (status = 409, description = "Already a member", body = ApiError)
    ),
    tag = "projects"
)]
pub async fn add_project_member(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(project_id): Path<Uuid>,
    ApiJson(request): ApiJson<AddProjectMemberRequest>,
) -> Result<(StatusCode, Json<ProjectMemberInfo>), ApiError> {
    let repo = ProjectRepository::new(&state.db);
    let project = repo.find_in_org(org.org_id, project_id).await?;
    require_project_manager(&state.db, project_id, org.user.id).await?;

    if OrganizationRepository::new(&state.db)
        .membership(org.org_id, request.user_id)
        .await?
        .is_none()
    {
        return Err(bad_request("User is not a member of this organization"));
    }

    let member = repo
        .add_member(
            project_id,
            request.user_id,
            request.role.unwrap_or(ProjectRole::Member),
        )
        .await?;

    let added_by_name = actor_name(&state, &org.user).await?;
    state
        .dispatcher
        .dispatch(JobTask::ProjectMemberAdded(ProjectMemberAddedArgs {
            user_id: member.user_id,
            org_id: org.org_id,
            project_id,
            project_name: project.name.clone(),
            added_by_id: org.user.id,
            added_by_name,
        }))
        .await;

    let user = super::types::load_user(&state, member.user_id).await?;
    record_project_activity(
        &state,
        project_id,
        org.user.id,
        format!(
            "added {} to the project",
            user.display_name.as_deref().unwrap_or("a member")
        ),
    )
    .await;
    state.cache.delete(&project_summary_key(project_id)).await;

    Ok((
        StatusCode::CREATED,
        Json(ProjectMemberInfo {
            user_id: member.user_id,
            display_name: user.display_name,
            avatar_url: user.avatar_url,
            role: member.role,
        }),
    ))
}

/// Deletes an archived project
#[utoipa::path(
    delete,
    path = "/api/v1/projects/{project_id}",
    security(("bearer_auth" = [])),
    params(("project_id" = String, Path, description = "Project id")),
    responses(
        (status = 204, description = "Project deleted"),
        (status = 400, description = "Project is not archived", body = ApiError),
        (status = 403, description = "Not allowed", body = ApiError)
    ),
    tag = "projects"
)]
pub async fn delete_project(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(project_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let repo = ProjectRepository::new(&state.db);
    let project = repo.find_in_org(org.org_id, project_id).await?;
    require_project_admin(&state.db, project_id, &org).await?;
    if !project.archived {
        return Err(bad_request(
            "Project is not archived, cannot delete unarchived projects",
        ));
    }

    repo.delete(project_id).await?;
    state.cache.delete(&project_summary_key(project_id)).await;
    tracing::info!(project_id = %project_id, user_id = %org.user.id, "Project deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/api/v1/projects/{project_id}/avatar",
    security(("bearer_auth" = [])),
    params(("project_id" = String, Path, description = "Project id")),
    request_body(content_type = "multipart/form-data", description = "Image in the `file` part"),
    responses(
        (status = 200, description = "Avatar replaced", body = ProjectInfo),
        (status = 400, description = "Invalid file", body = ApiError),
        (status = 403, description = "Not allowed", body = ApiError)
    ),
    tag = "projects"
)]
pub async fn update_project_avatar(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(project_id): Path<Uuid>,
    multipart: Multipart,
) -> Result<Json<ProjectInfo>, ApiError> {
    let repo = ProjectRepository::new(&state.db);
    repo.find_in_org(org.org_id, project_id).await?;
    require_project_admin(&state.db, project_id, &org).await?;

    let upload = MultipartForm::read(multipart).await?.require_file()?;
    let file = store_file(&state, org.org_id, org.user.id, upload, Some(project_id), None).await?;
    let project = repo.set_avatar(project_id, file.id).await?;
    state.cache.delete(&project_summary_key(project_id)).await;

    let is_favourite = repo.is_favourite(project_id, org.user.id).await?;
    Ok(Json(ProjectInfo::build(&state, project, is_favourite).await))
}

/// Task counts, workload and recent activity; cached for five minutes
#[utoipa::path(
    get,
    path = "/api/v1/projects/{project_id}/summary",
    security(("bearer_auth" = [])),
    params(("project_id" = String, Path, description = "Project id")),
    responses(
        (status = 200, description = "Project summary", body = ProjectSummaryResponse),
        (status = 403, description = "No access to the project", body = ApiError)
    ),
    tag = "projects"
)]
pub async fn get_project_summary(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(project_id): Path<Uuid>,
) -> Result<Json<ProjectSummaryResponse>, ApiError> {
    let project = accessible_project(&state, &org, project_id).await?;
    let key = project_summary_key(project_id);
    if let Some(cached) = state.cache.get_json::<ProjectSummaryResponse>(&key).await {
        return Ok(Json(cached));
    }

    let tasks = TaskRepository::new(&state.db)
        .top_level_tasks(project_id)
        .await?;
    let stats = compute_task_statistics(&tasks, Utc::now());

    let member_ids: Vec<Uuid> = ProjectRepository::new(&state.db)
        .members(project_id)
        .await?
        .into_iter()
        .map(|member| member.user_id)
        .collect();
    let assignee_ids: Vec<Uuid> = stats.per_user.keys().copied().collect();
    let users = load_users(&state, &[member_ids.as_slice(), assignee_ids.as_slice()].concat()).await?;

    let task_ids = tasks.iter().map(|task| task.id).collect();
    let (activities, _) = ActivityRepository::new(&state.db)
        .for_project(project_id, task_ids, Page::new(0, RECENT_ACTIVITY_LIMIT))
        .await?;

    let summary = ProjectSummaryResponse {
        project: ProjectInfo::build(&state, project, false).await,
        members: member_ids.iter().map(|id| users[id].clone()).collect(),
        task_summary: stats.summary,
        team_workload: TeamWorkload {
            assigned_percentage: stats.assigned_percentage,
            unassigned_percentage: stats.unassigned_percentage,
            user_workloads: stats
                .per_user
                .iter()
                .map(|(user_id, (task_count, percentage))| UserWorkload {
                    user_id: *user_id,
                    display_name: users[user_id].display_name.clone(),
                    avatar_url: users[user_id].avatar_url.clone(),
                    task_count: *task_count,
                    percentage: *percentage,
                })
                .collect(),
        },
        recent_activities: activity_infos(&state, activities).await?,
    };

    state
        .cache
        .set_json(&key, &summary, PROJECT_SUMMARY_TTL_SECS)
        .await;
    Ok(Json(summary))
}

#[utoipa::path(
    get,
    path = "/api/v1/projects/{project_id}/activities",
    security(("bearer_auth" = [])),
    params(("project_id" = String, Path, description = "Project id"), PaginationQuery),
    responses(
        (status = 200, description = "Project and task activity, newest first", body = ActivityListResponse),
        (status = 403, description = "No access to the project", body = ApiError)
    ),
    tag = "projects"
)]
pub async fn list_project_activities(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(project_id): Path<Uuid>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<ActivityListResponse>, ApiError> {
    accessible_project(&state, &org, project_id).await?;
    let page = query.page(&state.config);
    let task_ids = TaskRepository::new(&state.db)
        .top_level_tasks(project_id)
        .await?
        .into_iter()
        .map(|task| task.id)
        .collect();
    let (activities, total) = ActivityRepository::new(&state.db)
        .for_project(project_id, task_ids, page)
        .await?;

    Ok(Json(ActivityListResponse {
        activities: activity_infos(&state, activities).await?,
        total,
        offset: page.offset,
        limit: page.limit,
    }))
}
