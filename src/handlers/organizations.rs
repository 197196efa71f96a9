//! # Organization API Handlers
//!
//! Organization lifecycle, the caller's active organization, membership
//! listing and email invitations.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;
use uuid::Uuid;

use super::files::store_file;
use super::types::{ApiJson, MultipartForm, PaginationQuery, actor_name, file_url, load_users};
use crate::auth::{CurrentUser, require_org_admin, require_org_member, require_org_owner};
use crate::error::{ApiError, bad_request, conflict, forbidden, not_found, validation_error};
use crate::jobs::{JobTask, OrganizationInvitationArgs, SendEmailArgs};
use crate::models::organization::Model as OrganizationModel;
use crate::models::organization_invitation::Model as InvitationModel;
use crate::models::organization_member::OrganizationRole;
use crate::models::project_member::ProjectRole;
use crate::repositories::organization::{NewInvitation, NewOrganization, OrganizationChanges};
use crate::repositories::{
    FileRepository, OrganizationRepository, ProfileRepository, ProjectRepository, RepositoryError,
};
use crate::server::AppState;
use crate::utils::{random_color, random_icon};

const INVITATION_TEMPLATE: &str = "organization_invitation.html";
const INVITATION_TOKEN_LEN: usize = 48;

/// Organization as returned by the API
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrganizationInfo {
    #[schema(value_type = String)]
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub avatar_color: Option<String>,
    pub avatar_icon: Option<String>,
    pub avatar_url: Option<String>,
    #[schema(value_type = String)]
    pub created_by: Uuid,
    #[schema(value_type = String)]
    pub created_at: String,
    #[schema(value_type = String)]
    pub updated_at: String,
}

impl OrganizationInfo {
    async fn build(state: &AppState, model: OrganizationModel) -> Self {
        let avatar_url = file_url(state, model.avatar_file_id).await;
        Self {
            id: model.id,
            name: model.name,
            description: model.description,
            avatar_color: model.avatar_color,
            avatar_icon: model.avatar_icon,
            avatar_url,
            created_by: model.created_by,
            created_at: model.created_at.to_rfc3339(),
            updated_at: model.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrganizationRequest {
    pub name: String,
    pub description: Option<String>,
    /// Random palette color when omitted
    pub avatar_color: Option<String>,
    /// Random palette icon when omitted
    pub avatar_icon: Option<String>,
}

/// Only provided fields are changed
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateOrganizationRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar_color: Option<String>,
    pub avatar_icon: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrganizationListResponse {
    pub organizations: Vec<OrganizationInfo>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrganizationMemberInfo {
    #[schema(value_type = String)]
    pub user_id: Uuid,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub role: OrganizationRole,
    #[schema(value_type = String)]
    pub joined_at: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct InviteMembersRequest {
    pub emails: Vec<String>,
    /// Role granted on acceptance, `member` when omitted
    pub role: Option<OrganizationRole>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InvitationInfo {
    #[schema(value_type = String)]
    pub id: Uuid,
    pub email: String,
    pub role: OrganizationRole,
    #[schema(value_type = String)]
    pub expires_at: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InviteMembersResponse {
    pub invitations: Vec<InvitationInfo>,
}

fn require_name(name: &str) -> Result<String, ApiError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(validation_error(
            "Organization name is required",
            serde_json::json!({ "name": "Must not be empty" }),
        ));
    }
    Ok(name.to_string())
}

/// Replaces any open invitation for `email` with a fresh one, then queues
/// the invitation email and, for known users, an inbox notification.
pub(super) async fn send_invitation(
    state: &AppState,
    org: &OrganizationModel,
    inviter_id: Uuid,
    inviter_name: &str,
    email: &str,
    role: OrganizationRole,
    project_ids: &[Uuid],
) -> Result<InvitationModel, ApiError> {
    let repo = OrganizationRepository::new(&state.db);
    let superseded = repo.invalidate_pending_invitations(org.id, email).await?;
    if superseded > 0 {
        tracing::debug!(org_id = %org.id, superseded, "Superseded open invitations");
    }

    let token = invitation_token();
    let invitation = repo
        .create_invitation(NewInvitation {
            org_id: org.id,
            email: email.to_string(),
            role,
            invited_by: inviter_id,
            token: token.clone(),
            ttl_hours: state.config.invitation_token_expiration_hours,
            project_ids: project_ids.to_vec(),
        })
        .await?;

    let mut template_vars = Map::new();
    template_vars.insert("org_name".into(), Value::String(org.name.clone()));
    template_vars.insert("inviter_name".into(), Value::String(inviter_name.to_string()));
    template_vars.insert(
        "frontend_url".into(),
        Value::String(state.config.frontend_url.clone()),
    );
    state
        .dispatcher
        .dispatch(JobTask::SendEmail(SendEmailArgs {
            to_email: invitation.email.clone(),
            subject: format!("Invitation to join {}", org.name),
            template: INVITATION_TEMPLATE.to_string(),
            text_content: format!(
                "{inviter_name} has invited you to join {}. Your invitation token: {token}",
                org.name
            ),
            token: Some(token),
            template_vars,
        }))
        .await;

    if let Some(profile) = ProfileRepository::new(&state.db)
        .find_by_email(&invitation.email)
        .await?
    {
        state
            .dispatcher
            .dispatch(JobTask::OrganizationInvitation(OrganizationInvitationArgs {
                user_id: profile.user_id,
                org_id: org.id,
                org_name: org.name.clone(),
                inviter_id,
                inviter_name: inviter_name.to_string(),
            }))
            .await;
    }
    Ok(invitation)
}

/// Applies an accepted invitation: organization membership, the invited
/// projects and the caller's active organization.
pub(super) async fn join_from_invitation(
    state: &AppState,
    user: &CurrentUser,
    invitation: InvitationModel,
) -> Result<Vec<Uuid>, ApiError> {
    ProfileRepository::new(&state.db)
        .get_or_create(user.id, user.email.as_deref())
        .await?;
    let repo = OrganizationRepository::new(&state.db);
    let org_id = invitation.org_id;
    if repo.membership(org_id, user.id).await?.is_none() {
        repo.add_member(org_id, user.id, invitation.role).await?;
    }

    let project_role = if invitation.role == OrganizationRole::Member {
        ProjectRole::Member
    } else {
        ProjectRole::Admin
    };
    let projects = ProjectRepository::new(&state.db);
    let mut joined = Vec::new();
    for project_id in invitation.invited_projects() {
        // Projects deleted since the invitation went out are skipped.
        match projects.find_in_org(org_id, project_id).await {
            Ok(_) => {
                projects.ensure_member(project_id, user.id, project_role).await?;
                joined.push(project_id);
            }
            Err(RepositoryError::NotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }
    }

    repo.mark_invitation_accepted(invitation).await?;
    repo.set_active(org_id, user.id).await?;
    tracing::info!(org_id = %org_id, user_id = %user.id, projects = joined.len(), "Invitation accepted");
    Ok(joined)
}

fn invitation_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(INVITATION_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Creates an organization owned by the caller and makes it active
#[utoipa::path(
    post,
    path = "/api/v1/organizations/create",
    security(("bearer_auth" = [])),
    request_body = CreateOrganizationRequest,
    responses(
        (status = 201, description = "Organization created", body = OrganizationInfo),
        (status = 409, description = "Organization name already taken", body = ApiError)
    ),
    tag = "organizations"
)]
pub async fn create_organization(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiJson(request): ApiJson<CreateOrganizationRequest>,
) -> Result<(StatusCode, Json<OrganizationInfo>), ApiError> {
    let name = require_name(&request.name)?;
    ProfileRepository::new(&state.db)
        .get_or_create(user.id, user.email.as_deref())
        .await?;

    let org = OrganizationRepository::new(&state.db)
        .create_with_owner(
            NewOrganization {
                name,
                description: request.description,
                avatar_color: request.avatar_color.unwrap_or_else(random_color),
                avatar_icon: request.avatar_icon.unwrap_or_else(random_icon),
            },
            user.id,
        )
        .await?;

    tracing::info!(org_id = %org.id, user_id = %user.id, "Organization created");
    Ok((
        StatusCode::CREATED,
        Json(OrganizationInfo::build(&state, org).await),
    ))
}

/// Lists the organizations the caller belongs to
#[utoipa::path(
    get,
    path = "/api/v1/organizations",
    security(("bearer_auth" = [])),
    params(PaginationQuery),
    responses((status = 200, description = "Organizations page", body = OrganizationListResponse)),
    tag = "organizations"
)]
pub async fn list_organizations(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<OrganizationListResponse>, ApiError> {
    let page = query.page(&state.config);
    let (rows, total) = OrganizationRepository::new(&state.db)
        .list_for_user(user.id, page)
        .await?;

    let mut organizations = Vec::with_capacity(rows.len());
    for org in rows {
        organizations.push(OrganizationInfo::build(&state, org).await);
    }
    Ok(Json(OrganizationListResponse {
        organizations,
        total,
        offset: page.offset,
        limit: page.limit,
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/organizations/{org_id}",
    security(("bearer_auth" = [])),
    params(("org_id" = String, Path, description = "Organization id")),
    responses(
        (status = 200, description = "Organization", body = OrganizationInfo),
        (status = 403, description = "Not a member", body = ApiError),
        (status = 404, description = "Organization not found", body = ApiError)
    ),
    tag = "organizations"
)]
pub async fn get_organization(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(org_id): Path<Uuid>,
) -> Result<Json<OrganizationInfo>, ApiError> {
    let org = OrganizationRepository::new(&state.db).find(org_id).await?;
    require_org_member(&state.db, org_id, user.id).await?;
    Ok(Json(OrganizationInfo::build(&state, org).await))
}

#[utoipa::path(
    put,
    path = "/api/v1/organizations/{org_id}",
    security(("bearer_auth" = [])),
    params(("org_id" = String, Path, description = "Organization id")),
    request_body = UpdateOrganizationRequest,
    responses(
        (status = 200, description = "Organization updated", body = OrganizationInfo),
        (status = 403, description = "Not an owner or admin", body = ApiError),
        (status = 409, description = "Organization name already taken", body = ApiError)
    ),
    tag = "organizations"
)]
pub async fn update_organization(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(org_id): Path<Uuid>,
    ApiJson(request): ApiJson<UpdateOrganizationRequest>,
) -> Result<Json<OrganizationInfo>, ApiError> {
    OrganizationRepository::new(&state.db).find(org_id).await?;
    require_org_admin(&state.db, org_id, user.id).await?;

    let name = request.name.as_deref().map(require_name).transpose()?;
    let org = OrganizationRepository::new(&state.db)
        .update(
            org_id,
            OrganizationChanges {
                name,
                description: request.description,
                avatar_color: request.avatar_color,
                avatar_icon: request.avatar_icon,
            },
        )
        .await?;
    Ok(Json(OrganizationInfo::build(&state, org).await))
}

/// Deletes the organization together with every stored object
#[utoipa::path(
    delete,
    path = "/api/v1/organizations/{org_id}",
    security(("bearer_auth" = [])),
    params(("org_id" = String, Path, description = "Organization id")),
    responses(
        (status = 204, description = "Organization deleted"),
        (status = 403, description = "Not the owner", body = ApiError),
        (status = 404, description = "Organization not found", body = ApiError)
    ),
    tag = "organizations"
)]
pub async fn delete_organization(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(org_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let repo = OrganizationRepository::new(&state.db);
    repo.find(org_id).await?;
    require_org_owner(&state.db, org_id, user.id).await?;

    let keys = FileRepository::new(&state.db)
        .storage_keys_for_org(org_id)
        .await?;
    if !keys.is_empty() {
        let outcome = state.storage.delete_many(&keys).await?;
        if !outcome.failed.is_empty() {
            tracing::warn!(
                org_id = %org_id,
                failed = outcome.failed.len(),
                "Some objects could not be deleted"
            );
        }
    }

    repo.delete(org_id).await?;
    tracing::info!(org_id = %org_id, user_id = %user.id, "Organization deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/api/v1/organizations/{org_id}/avatar",
    security(("bearer_auth" = [])),
    params(("org_id" = String, Path, description = "Organization id")),
    request_body(content_type = "multipart/form-data", description = "Image in the `file` part"),
    responses(
        (status = 200, description = "Avatar replaced", body = OrganizationInfo),
        (status = 400, description = "Invalid file", body = ApiError),
        (status = 403, description = "Not an owner or admin", body = ApiError)
    ),
    tag = "organizations"
)]
pub async fn update_organization_avatar(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(org_id): Path<Uuid>,
    multipart: Multipart,
) -> Result<Json<OrganizationInfo>, ApiError> {
    let repo = OrganizationRepository::new(&state.db);
    repo.find(org_id).await?;
    require_org_admin(&state.db, org_id, user.id).await?;

    let upload = MultipartForm::read(multipart).await?.require_file()?;
    let file = store_file(&state, org_id, user.id, upload, None, None).await?;
    let org = repo.set_avatar(org_id, file.id).await?;
    Ok(Json(OrganizationInfo::build(&state, org).await))
}

/// Makes the organization the caller's active one
#[utoipa::path(
    post,
    path = "/api/v1/organizations/{org_id}/active",
    security(("bearer_auth" = [])),
    params(("org_id" = String, Path, description = "Organization id")),
    responses(
        (status = 204, description = "Active organization set"),
        (status = 403, description = "Not a member", body = ApiError)
    ),
    tag = "organizations"
)]
pub async fn set_active_organization(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(org_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    require_org_member(&state.db, org_id, user.id).await?;
    OrganizationRepository::new(&state.db)
        .set_active(org_id, user.id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/v1/organizations/active",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Active organization", body = OrganizationInfo),
        (status = 404, description = "No active organization found", body = ApiError)
    ),
    tag = "organizations"
)]
pub async fn get_active_organization(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<OrganizationInfo>, ApiError> {
    let repo = OrganizationRepository::new(&state.db);
    let membership = repo
        .active_membership(user.id)
        .await?
        .ok_or_else(|| not_found("No active organization found"))?;
    let org = repo.find(membership.org_id).await?;
    Ok(Json(OrganizationInfo::build(&state, org).await))
}

#[utoipa::path(
    post,
    path = "/api/v1/organizations/deactivate",
    security(("bearer_auth" = [])),
    responses((status = 204, description = "No organization is active anymore")),
    tag = "organizations"
)]
pub async fn deactivate_organization(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<StatusCode, ApiError> {
    OrganizationRepository::new(&state.db)
        .deactivate_all(user.id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/v1/organizations/{org_id}/members",
    security(("bearer_auth" = [])),
    params(("org_id" = String, Path, description = "Organization id")),
    responses(
        (status = 200, description = "Members", body = [OrganizationMemberInfo]),
        (status = 403, description = "Not a member", body = ApiError)
    ),
    tag = "organizations"
)]
pub async fn list_organization_members(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(org_id): Path<Uuid>,
) -> Result<Json<Vec<OrganizationMemberInfo>>, ApiError> {
    require_org_member(&state.db, org_id, user.id).await?;
    let members = OrganizationRepository::new(&state.db)
        .members(org_id)
        .await?;
    let ids: Vec<Uuid> = members.iter().map(|member| member.user_id).collect();
    let mut users = load_users(&state, &ids).await?;

    Ok(Json(
        members
            .into_iter()
            .map(|member| {
                let info = users.remove(&member.user_id);
                OrganizationMemberInfo {
                    user_id: member.user_id,
                    display_name: info.as_ref().and_then(|u| u.display_name.clone()),
                    avatar_url: info.and_then(|u| u.avatar_url),
                    role: member.role,
                    joined_at: member.created_at.to_rfc3339(),
                }
            })
            .collect(),
    ))
}

/// Invites people by email
#[utoipa::path(
    post,
    path = "/api/v1/organizations/{org_id}/invitations",
    security(("bearer_auth" = [])),
    params(("org_id" = String, Path, description = "Organization id")),
    request_body = InviteMembersRequest,
    responses(
        (status = 201, description = "Invitations created", body = InviteMembersResponse),
        (status = 400, description = "Invalid emails", body = ApiError),
        (status = 403, description = "Not an owner or admin", body = ApiError)
    ),
    tag = "organizations"
)]
pub async fn invite_members(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(org_id): Path<Uuid>,
    ApiJson(request): ApiJson<InviteMembersRequest>,
) -> Result<(StatusCode, Json<InviteMembersResponse>), ApiError> {
    let repo = OrganizationRepository::new(&state.db);
    let org = repo.find(org_id).await?;
    require_org_admin(&state.db, org_id, user.id).await?;

    let emails: Vec<String> = request
        .emails
        .iter()
        .map(|email| email.trim().to_lowercase())
        .filter(|email| !email.is_empty())
        .collect();
    if emails.is_empty() {
        return Err(bad_request("At least one email is required"));
    }
    if let Some(invalid) = emails.iter().find(|email| !email.contains('@')) {
        return Err(validation_error(
            "Invalid email address",
            serde_json::json!({ "emails": invalid }),
        ));
    }

    let role = request.role.unwrap_or(OrganizationRole::Member);
    let inviter_name = actor_name(&state, &user).await?;
    let mut invitations = Vec::with_capacity(emails.len());

    for email in emails {
        let invitation =
            send_invitation(&state, &org, user.id, &inviter_name, &email, role, &[]).await?;
        invitations.push(InvitationInfo {
            id: invitation.id,
            email: invitation.email,
            role: invitation.role,
            expires_at: invitation.expires_at.to_rfc3339(),
        });
    }

    tracing::info!(org_id = %org_id, count = invitations.len(), "Invitations sent");
    Ok((
        StatusCode::CREATED,
        Json(InviteMembersResponse { invitations }),
    ))
}

/// Joins the organization an invitation token was issued for
#[utoipa::path(
    post,
    path = "/api/v1/organizations/invitations/{token}/accept",
    security(("bearer_auth" = [])),
    params(("token" = String, Path, description = "Invitation token")),
    responses(
        (status = 200, description = "Joined the organization", body = OrganizationInfo),
        (status = 400, description = "Invitation expired", body = ApiError),
        (status = 403, description = "Invitation addressed to another email", body = ApiError),
        (status = 404, description = "Invitation not found", body = ApiError),
        (status = 409, description = "Invitation already accepted", body = ApiError)
    ),
    tag = "organizations"
)]
pub async fn accept_invitation(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(token): Path<String>,
) -> Result<Json<OrganizationInfo>, ApiError> {
    let repo = OrganizationRepository::new(&state.db);
    let invitation = repo
        .find_invitation_by_token(&token)
        .await?
        .ok_or_else(|| not_found("Invitation not found"))?;

    if invitation.accepted_at.is_some() {
        return Err(conflict("Invitation already accepted"));
    }
    if invitation.invalidated_at.is_some() {
        return Err(bad_request("Invitation has been invalidated"));
    }
    if invitation.expires_at < Utc::now() {
        return Err(bad_request("Invitation has expired"));
    }
    if let Some(email) = user.email.as_deref()
        && !email.eq_ignore_ascii_case(&invitation.email)
    {
        return Err(forbidden(Some("Invitation was sent to a different email")));
    }

    let org_id = invitation.org_id;
    join_from_invitation(&state, &user, invitation).await?;
    let org = repo.find(org_id).await?;
    Ok(Json(OrganizationInfo::build(&state, org).await))
}
