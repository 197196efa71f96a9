//! # Team API Handlers
//!
//! Team management inside the caller's active organization: inviting people
//! (optionally straight into projects), listing members and invitations,
//! promoting admins and removing members. Invitation acceptance also works
//! for anonymous callers, who are told to sign in first.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::organizations::{join_from_invitation, send_invitation};
use super::types::{ApiJson, UserInfo, actor_name, load_users};
use crate::auth::{ActiveOrganization, MaybeUser};
use crate::error::{ApiError, bad_request, forbidden, not_found, validation_error};
use crate::jobs::{JobTask, ProjectMemberAddedArgs};
use crate::models::organization_invitation::Model as InvitationModel;
use crate::models::organization_member::OrganizationRole;
use crate::models::project::Model as ProjectModel;
use crate::models::project_member::ProjectRole;
use crate::repositories::{
    OrganizationRepository, Page, ProfileRepository, ProjectRepository, RepositoryError,
};
use crate::server::AppState;
use crate::utils::calculate_time_ago;

const ADMIN_INVITE_REQUIRES_OWNER: &str =
    "Admins can only invite users as members. Only owners can invite users as admins.";
const SIGN_IN_TO_ACCEPT: &str = "Please sign in or register to accept the invitation";

#[derive(Debug, Deserialize, ToSchema)]
pub struct TeamInviteRequest {
    pub user_emails: Vec<String>,
    /// Only owners may invite admins
    #[serde(default)]
    pub add_as_admin: bool,
    /// Projects joined on acceptance
    #[schema(value_type = Option<Vec<String>>)]
    pub project_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AcceptInvitationRequest {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AcceptInvitationResponse {
    pub success: bool,
    pub message: String,
    #[schema(value_type = Option<String>)]
    pub organization_id: Option<Uuid>,
    #[schema(value_type = Vec<String>)]
    pub project_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Invalidated,
    Expired,
}

impl InvitationStatus {
    fn of(invitation: &InvitationModel) -> Self {
        if invitation.accepted_at.is_some() {
            Self::Accepted
        } else if invitation.invalidated_at.is_some() {
            Self::Invalidated
        } else if invitation.expires_at < Utc::now() {
            Self::Expired
        } else {
            Self::Pending
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InvitedProject {
    #[schema(value_type = String)]
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TeamInvitationInfo {
    #[schema(value_type = String)]
    pub id: Uuid,
    pub status: InvitationStatus,
    pub email: String,
    pub invited_projects: Vec<InvitedProject>,
    /// Relative time since the invitation was sent
    pub invitation_time: String,
    pub invited_by: UserInfo,
    #[schema(value_type = String)]
    pub expires_at: String,
    pub as_admin: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TeamInvitationListResponse {
    pub invitations: Vec<TeamInvitationInfo>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TeamInvitationsQuery {
    /// Matches part of the invited email
    pub search: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TeamMembersQuery {
    /// Matches part of the display name or email
    pub search: Option<String>,
    pub role: Option<OrganizationRole>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TeamMemberInfo {
    #[schema(value_type = String)]
    pub id: Uuid,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub role: OrganizationRole,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TeamMemberListResponse {
    pub members: Vec<TeamMemberInfo>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TeamRoleResponse {
    pub role: OrganizationRole,
}

fn page_of(state: &AppState, limit: Option<u64>, offset: Option<u64>) -> Page {
    Page::new(
        offset.unwrap_or(state.config.default_pagination_offset),
        limit.unwrap_or(state.config.default_pagination_limit),
    )
}

fn normalize_emails(emails: &[String]) -> Result<Vec<String>, ApiError> {
    let mut normalized: Vec<String> = Vec::with_capacity(emails.len());
    for email in emails.iter().map(|email| email.trim().to_lowercase()) {
        if !email.is_empty() && !normalized.contains(&email) {
            normalized.push(email);
        }
    }
    if normalized.is_empty() {
        return Err(bad_request("At least one email is required"));
    }
    if let Some(invalid) = normalized.iter().find(|email| !email.contains('@')) {
        return Err(validation_error(
            "Invalid email address",
            serde_json::json!({ "user_emails": invalid }),
        ));
    }
    Ok(normalized)
}

/// Loads the invited projects, all of which must belong to `org_id`.
async fn invited_projects(
    state: &AppState,
    org_id: Uuid,
    project_ids: &[Uuid],
) -> Result<Vec<ProjectModel>, ApiError> {
    let repo = ProjectRepository::new(&state.db);
    let mut projects = Vec::with_capacity(project_ids.len());
    for project_id in project_ids {
        let project = match repo.find(*project_id).await {
            Ok(project) => project,
            Err(RepositoryError::NotFound(_)) => {
                return Err(bad_request("One or more projects not found"));
            }
            Err(err) => return Err(err.into()),
        };
        if project.org_id != org_id {
            return Err(bad_request(&format!(
                "Project {project_id} does not belong to this organization"
            )));
        }
        projects.push(project);
    }
    Ok(projects)
}

/// Invites people into the active organization
///
/// Existing members are added to the listed projects right away; everyone
/// else receives an invitation email.
#[utoipa::path(
    post,
    path = "/api/v1/teams/invite",
    security(("bearer_auth" = [])),
    request_body = TeamInviteRequest,
    responses(
        (status = 204, description = "Invitations sent"),
        (status = 400, description = "No emails or unknown projects", body = ApiError),
        (status = 403, description = "Not allowed to invite with this role", body = ApiError)
    ),
    tag = "teams"
)]
pub async fn invite_team_members(
    State(state): State<AppState>,
    org: ActiveOrganization,
    ApiJson(request): ApiJson<TeamInviteRequest>,
) -> Result<StatusCode, ApiError> {
    org.require_admin()?;
    let emails = normalize_emails(&request.user_emails)?;
    if request.add_as_admin && org.role != OrganizationRole::Owner {
        return Err(forbidden(Some(ADMIN_INVITE_REQUIRES_OWNER)));
    }
    let project_ids = request.project_ids.unwrap_or_default();
    let projects = invited_projects(&state, org.org_id, &project_ids).await?;

    let organization = OrganizationRepository::new(&state.db)
        .find(org.org_id)
        .await?;
    let inviter_name = actor_name(&state, &org.user).await?;
    let (role, project_role) = if request.add_as_admin {
        (OrganizationRole::Admin, ProjectRole::Admin)
    } else {
        (OrganizationRole::Member, ProjectRole::Member)
    };

    let members = OrganizationRepository::new(&state.db);
    let profiles = ProfileRepository::new(&state.db);
    let project_repo = ProjectRepository::new(&state.db);
    for email in emails {
        let existing = match profiles.find_by_email(&email).await? {
            Some(profile) => members
                .membership(org.org_id, profile.user_id)
                .await?
                .map(|member| member.user_id),
            None => None,
        };

        let Some(user_id) = existing else {
            send_invitation(
                &state,
                &organization,
                org.user.id,
                &inviter_name,
                &email,
                role,
                &project_ids,
            )
            .await?;
            continue;
        };

        for project in &projects {
            if project_repo
                .ensure_member(project.id, user_id, project_role)
                .await?
            {
                state
                    .dispatcher
                    .dispatch(JobTask::ProjectMemberAdded(ProjectMemberAddedArgs {
                        user_id,
                        org_id: org.org_id,
                        project_id: project.id,
                        project_name: project.name.clone(),
                        added_by_id: org.user.id,
                        added_by_name: inviter_name.clone(),
                    }))
                    .await;
            }
        }
    }

    tracing::info!(org_id = %org.org_id, user_id = %org.user.id, "Team invitations processed");
    Ok(StatusCode::NO_CONTENT)
}

/// Accepts an invitation token; anonymous callers are asked to sign in
#[utoipa::path(
    post,
    path = "/api/v1/teams/accept-invitation",
    request_body = AcceptInvitationRequest,
    responses(
        (status = 200, description = "Outcome of the acceptance", body = AcceptInvitationResponse),
        (status = 400, description = "Invitation invalidated, expired, used or addressed to someone else", body = ApiError),
        (status = 404, description = "Invalid invitation token", body = ApiError)
    ),
    tag = "teams"
)]
pub async fn accept_team_invitation(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    ApiJson(request): ApiJson<AcceptInvitationRequest>,
) -> Result<Json<AcceptInvitationResponse>, ApiError> {
    let invitation = OrganizationRepository::new(&state.db)
        .find_invitation_by_token(request.token.trim())
        .await?
        .ok_or_else(|| not_found("Invalid invitation token"))?;

    match InvitationStatus::of(&invitation) {
        InvitationStatus::Invalidated => {
            return Err(bad_request("Invitation token has been invalidated"));
        }
        InvitationStatus::Expired => return Err(bad_request("Invitation token has expired")),
        InvitationStatus::Accepted => return Err(bad_request("Invitation already accepted")),
        InvitationStatus::Pending => {}
    }

    let Some(user) = user else {
        return Ok(Json(AcceptInvitationResponse {
            success: false,
            message: SIGN_IN_TO_ACCEPT.to_string(),
            organization_id: Some(invitation.org_id),
            project_ids: Vec::new(),
        }));
    };
    if let Some(email) = user.email.as_deref()
        && !email.eq_ignore_ascii_case(&invitation.email)
    {
        return Err(bad_request("Email does not match invitation"));
    }

    let org_id = invitation.org_id;
    let project_ids = join_from_invitation(&state, &user, invitation).await?;
    Ok(Json(AcceptInvitationResponse {
        success: true,
        message: "Invitation accepted successfully".to_string(),
        organization_id: Some(org_id),
        project_ids,
    }))
}

/// Removes a member from the organization and all of its projects
#[utoipa::path(
    delete,
    path = "/api/v1/teams/{user_id}/remove",
    security(("bearer_auth" = [])),
    params(("user_id" = String, Path, description = "Member user id")),
    responses(
        (status = 204, description = "Member removed"),
        (status = 400, description = "Cannot remove yourself", body = ApiError),
        (status = 403, description = "Not the owner", body = ApiError),
        (status = 404, description = "Member not found", body = ApiError)
    ),
    tag = "teams"
)]
pub async fn remove_team_member(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(user_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    require_owner(&org)?;
    if user_id == org.user.id {
        return Err(bad_request("Cannot remove yourself"));
    }

    let members = OrganizationRepository::new(&state.db);
    members
        .membership(org.org_id, user_id)
        .await?
        .ok_or_else(|| not_found("Member not found"))?;
    let projects = ProjectRepository::new(&state.db)
        .remove_member_from_org(org.org_id, user_id)
        .await?;
    members.remove_member(org.org_id, user_id).await?;

    tracing::info!(org_id = %org.org_id, user_id = %user_id, projects, "Member removed");
    Ok(StatusCode::NO_CONTENT)
}

fn require_owner(org: &ActiveOrganization) -> Result<(), ApiError> {
    if org.role == OrganizationRole::Owner {
        Ok(())
    } else {
        Err(forbidden(Some(
            "Only the organization owner can perform this action",
        )))
    }
}

/// Invitations of the active organization, newest first
#[utoipa::path(
    get,
    path = "/api/v1/teams/invitations",
    security(("bearer_auth" = [])),
    params(TeamInvitationsQuery),
    responses(
        (status = 200, description = "Invitations page", body = TeamInvitationListResponse),
        (status = 403, description = "Not an owner or admin", body = ApiError)
    ),
    tag = "teams"
)]
pub async fn list_team_invitations(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Query(query): Query<TeamInvitationsQuery>,
) -> Result<Json<TeamInvitationListResponse>, ApiError> {
    org.require_admin()?;
    let page = page_of(&state, query.limit, query.offset);
    let (rows, total) = OrganizationRepository::new(&state.db)
        .list_invitations(org.org_id, query.search.as_deref(), page)
        .await?;

    let inviter_ids: Vec<Uuid> = rows.iter().map(|row| row.invited_by).collect();
    let inviters = load_users(&state, &inviter_ids).await?;
    let timezone = ProfileRepository::new(&state.db)
        .find(org.user.id)
        .await?
        .map(|profile| profile.timezone)
        .unwrap_or_else(|| "UTC".to_string());

    let projects = ProjectRepository::new(&state.db);
    let mut project_names: HashMap<Uuid, Option<String>> = HashMap::new();
    let mut invitations = Vec::with_capacity(rows.len());
    for row in rows {
        let mut invited = Vec::new();
        for project_id in row.invited_projects() {
            if !project_names.contains_key(&project_id) {
                let name = match projects.find(project_id).await {
                    Ok(project) => Some(project.name),
                    Err(RepositoryError::NotFound(_)) => None,
                    Err(err) => return Err(err.into()),
                };
                project_names.insert(project_id, name);
            }
            if let Some(Some(name)) = project_names.get(&project_id) {
                invited.push(InvitedProject {
                    id: project_id,
                    name: name.clone(),
                });
            }
        }

        let invited_by = inviters.get(&row.invited_by).cloned().unwrap_or(UserInfo {
            id: row.invited_by,
            display_name: None,
            avatar_url: None,
        });
        invitations.push(TeamInvitationInfo {
            id: row.id,
            status: InvitationStatus::of(&row),
            invitation_time: calculate_time_ago(row.created_at.with_timezone(&Utc), &timezone),
            invited_projects: invited,
            invited_by,
            expires_at: row.expires_at.to_rfc3339(),
            as_admin: row.role != OrganizationRole::Member,
            email: row.email,
        });
    }

    Ok(Json(TeamInvitationListResponse {
        invitations,
        total,
        limit: page.limit,
        offset: page.offset,
    }))
}

/// Members of the active organization
#[utoipa::path(
    get,
    path = "/api/v1/teams/members",
    security(("bearer_auth" = [])),
    params(TeamMembersQuery),
    responses(
        (status = 200, description = "Members page", body = TeamMemberListResponse),
        (status = 403, description = "Not an owner or admin", body = ApiError)
    ),
    tag = "teams"
)]
pub async fn list_team_members(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Query(query): Query<TeamMembersQuery>,
) -> Result<Json<TeamMemberListResponse>, ApiError> {
    org.require_admin()?;
    let page = page_of(&state, query.limit, query.offset);
    let members = OrganizationRepository::new(&state.db)
        .members_with_role(org.org_id, query.role)
        .await?;
    let ids: Vec<Uuid> = members.iter().map(|member| member.user_id).collect();
    let profiles = ProfileRepository::new(&state.db).find_many(&ids).await?;
    let mut users = load_users(&state, &ids).await?;

    let term = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(str::to_lowercase);
    let matching: Vec<TeamMemberInfo> = members
        .into_iter()
        .map(|member| {
            let user = users.remove(&member.user_id);
            TeamMemberInfo {
                id: member.user_id,
                display_name: user.as_ref().and_then(|user| user.display_name.clone()),
                email: profiles
                    .get(&member.user_id)
                    .and_then(|profile| profile.email.clone()),
                avatar_url: user.and_then(|user| user.avatar_url),
                role: member.role,
            }
        })
        .filter(|member| match &term {
            Some(term) => [&member.display_name, &member.email]
                .into_iter()
                .flatten()
                .any(|field| field.to_lowercase().contains(term)),
            None => true,
        })
        .collect();

    let total = matching.len() as u64;
    Ok(Json(TeamMemberListResponse {
        members: matching
            .into_iter()
            .skip(usize::try_from(page.offset).unwrap_or(usize::MAX))
            .take(usize::try_from(page.limit).unwrap_or(usize::MAX))
            .collect(),
        total,
        limit: page.limit,
        offset: page.offset,
    }))
}

/// Switches a member between admin and member
#[utoipa::path(
    patch,
    path = "/api/v1/teams/{user_id}/admin",
    security(("bearer_auth" = [])),
    params(("user_id" = String, Path, description = "Member user id")),
    responses(
        (status = 200, description = "New role", body = TeamRoleResponse),
        (status = 400, description = "Cannot change owner's role", body = ApiError),
        (status = 403, description = "Not the owner", body = ApiError),
        (status = 404, description = "Member not found", body = ApiError)
    ),
    tag = "teams"
)]
pub async fn toggle_team_admin(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(user_id): Path<Uuid>,
) -> Result<Json<TeamRoleResponse>, ApiError> {
    require_owner(&org)?;
    let repo = OrganizationRepository::new(&state.db);
    let member = repo
        .membership(org.org_id, user_id)
        .await?
        .ok_or_else(|| not_found("Member not found"))?;
    let role = match member.role {
        OrganizationRole::Owner => return Err(bad_request("Cannot change owner's role")),
        OrganizationRole::Admin => OrganizationRole::Member,
        OrganizationRole::Member => OrganizationRole::Admin,
    };
    let updated = repo.set_role(org.org_id, user_id, role).await?;
    tracing::info!(org_id = %org.org_id, user_id = %user_id, role = ?updated.role, "Member role changed");
    Ok(Json(TeamRoleResponse { role: updated.role }))
}
