//! # Tests for Handlers
//!
//! Requests go through the full router against an in-memory database; the
//! broker and object storage are disabled.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use crate::auth::{Claims, issue_token};
use crate::config::AppConfig;
use crate::jobs::{Job, JobTask};
use crate::models::organization_invitation;
use crate::models::organization_member::OrganizationRole;
use crate::models::project_member::ProjectRole;
use crate::queue::{JobSink, QueueError, TaskDispatcher};
use crate::repositories::organization::NewInvitation;
use crate::repositories::{OrganizationRepository, ProjectRepository};
use crate::server::{AppState, create_app};
use crate::test_support::setup_db;

const SECRET: &str = "handler-test-secret";

fn test_config() -> AppConfig {
    AppConfig {
        auth_jwt_secret: Some(SECRET.to_string()),
        max_subtask_depth: 1,
        max_comment_reply_depth: 1,
        ..Default::default()
    }
}

async fn app() -> Router {
    app_with_db().await.0
}

/// Router plus a handle on its database for seeding rows the API never returns.
async fn app_with_db() -> (Router, DatabaseConnection) {
    let db = setup_db().await;
    let state = AppState::standalone(test_config(), db.clone()).unwrap();
    (create_app(state), db)
}

#[derive(Default)]
struct RecordedJobs(Mutex<Vec<JobTask>>);

#[async_trait]
impl JobSink for RecordedJobs {
    async fn push(&self, job: &Job) -> Result<(), QueueError> {
        self.0.lock().unwrap().push(job.payload.clone());
        Ok(())
    }
}

impl RecordedJobs {
    fn take(&self) -> Vec<JobTask> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

async fn app_with_jobs() -> (Router, DatabaseConnection, Arc<RecordedJobs>) {
    let db = setup_db().await;
    let jobs = Arc::new(RecordedJobs::default());
    let mut state = AppState::standalone(test_config(), db.clone()).unwrap();
    state.dispatcher = TaskDispatcher::new(jobs.clone(), 3);
    (create_app(state), db, jobs)
}

fn token(user_id: Uuid) -> String {
    issue_token(
        SECRET,
        &Claims::new(
            user_id,
            Some(format!("{user_id}@example.com")),
            chrono::Duration::hours(1),
        ),
    )
    .unwrap()
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    user: Option<Uuid>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        request = request.header(header::AUTHORIZATION, format!("Bearer {}", token(user)));
    }
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

fn id_of(value: &Value) -> String {
    value["id"].as_str().unwrap().to_string()
}

/// Creates an organization and a project owned by `owner`, returning the project id.
async fn seed_workspace(app: &Router, owner: Uuid) -> String {
    let (status, _) = call(
        app,
        "POST",
        "/api/v1/organizations/create",
        Some(owner),
        Some(json!({ "name": "Acme" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, project) = call(
        app,
        "POST",
        "/api/v1/projects/create",
        Some(owner),
        Some(json!({ "name": "Apollo", "start_date": "2025-01-01" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    id_of(&project)
}

#[tokio::test]
async fn test_root_and_health_use_app_name() {
    let app = app().await;

    let (status, body) = call(&app, "GET", "/", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "message": "Hello from HexoTeams API!" }));

    let (status, body) = call(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "message": "HexoTeams API is running!", "status": "healthy" })
    );

    let (status, body) = call(&app, "GET", "/health/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let app = app().await;
    let (status, body) = call(&app, "GET", "/api/v1/organizations", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_depth_limits_are_public() {
    let app = app().await;
    let (status, body) = call(&app, "GET", "/api/v1/misc/comment-depth", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "max_comment_reply_depth": 1 }));

    let (_, body) = call(&app, "GET", "/api/v1/misc/subtask-depth", None, None).await;
    assert_eq!(body, json!({ "max_subtask_depth": 1 }));
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let app = app().await;
    let (status, body) = call(&app, "GET", "/openapi.json", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["info"]["title"], "HexoTeams API");
    assert!(body["paths"]["/api/v1/tasks/{task_id}/subtasks"].is_object());
}

#[tokio::test]
async fn test_profile_is_created_lazily_and_validates_timezone() {
    let app = app().await;
    let user = Uuid::new_v4();

    let (status, body) = call(&app, "GET", "/api/v1/auth/me", Some(user), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"], user.to_string());
    assert_eq!(body["email_notifications"], true);

    let (status, _) = call(
        &app,
        "PATCH",
        "/api/v1/auth/me",
        Some(user),
        Some(json!({ "timezone": "Nowhere/Land" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        &app,
        "PATCH",
        "/api/v1/auth/me",
        Some(user),
        Some(json!({ "display_name": "Ada", "timezone": "Europe/Berlin" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["display_name"], "Ada");
    assert_eq!(body["timezone"], "Europe/Berlin");
}

#[tokio::test]
async fn test_organization_names_are_unique() {
    let app = app().await;
    let owner = Uuid::new_v4();
    seed_workspace(&app, owner).await;

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/organizations/create",
        Some(Uuid::new_v4()),
        Some(json!({ "name": "Acme" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["message"], "Organization name already taken");
}

#[tokio::test]
async fn test_active_organization_is_required() {
    let app = app().await;
    let (status, body) = call(&app, "GET", "/api/v1/projects", Some(Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "User does not have an active organization");

    let (status, body) = call(
        &app,
        "GET",
        "/api/v1/organizations/active",
        Some(Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "No active organization found");
}

#[tokio::test]
async fn test_project_names_are_unique_and_unarchived_projects_survive_delete() {
    let app = app().await;
    let owner = Uuid::new_v4();
    let project_id = seed_workspace(&app, owner).await;

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/projects/create",
        Some(owner),
        Some(json!({ "name": "apollo" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Project name already exists");

    let uri = format!("/api/v1/projects/{project_id}");
    let (status, body) = call(&app, "DELETE", &uri, Some(owner), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        "Project is not archived, cannot delete unarchived projects"
    );

    let (status, _) = call(&app, "PATCH", &format!("{uri}/archive"), Some(owner), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&app, "DELETE", &uri, Some(owner), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_task_lifecycle_and_subtask_depth() {
    let app = app().await;
    let owner = Uuid::new_v4();
    let project_id = seed_workspace(&app, owner).await;

    let (status, task) = call(
        &app,
        "POST",
        &format!("/api/v1/tasks?project_id={project_id}"),
        Some(owner),
        Some(json!({ "title": "Write launch plan" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(task["status"], "todo");
    let task_id = id_of(&task);

    let (status, subtask) = call(
        &app,
        "POST",
        &format!("/api/v1/tasks/{task_id}/subtasks"),
        Some(owner),
        Some(json!({ "title": "Draft" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(subtask["parent_id"], task_id.as_str());

    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/v1/tasks/{}/subtasks", id_of(&subtask)),
        Some(owner),
        Some(json!({ "title": "Too deep" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        "Subtask depth exceed the maximum allowed depth"
    );

    let (status, listing) = call(
        &app,
        "GET",
        &format!("/api/v1/tasks?project_id={project_id}"),
        Some(owner),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["total"], 1);

    let (status, updated) = call(
        &app,
        "PATCH",
        &format!("/api/v1/tasks/{task_id}/status"),
        Some(owner),
        Some(json!({ "status": "completed" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["status"], "completed");

    let (status, summary) = call(
        &app,
        "GET",
        &format!("/api/v1/projects/{project_id}/summary"),
        Some(owner),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["task_summary"]["completed"], 1);

    let (status, detail) = call(
        &app,
        "GET",
        &format!("/api/v1/tasks/{task_id}/get"),
        Some(owner),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["subtasks"].as_array().unwrap().len(), 1);
    assert!(!detail["activities"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_comment_threads_and_reply_depth() {
    let app = app().await;
    let owner = Uuid::new_v4();
    let project_id = seed_workspace(&app, owner).await;
    let (_, task) = call(
        &app,
        "POST",
        &format!("/api/v1/tasks?project_id={project_id}"),
        Some(owner),
        Some(json!({ "title": "Review" })),
    )
    .await;
    let task_id = id_of(&task);

    let (status, comment) = call(
        &app,
        "POST",
        &format!("/api/v1/tasks/{task_id}/comments"),
        Some(owner),
        Some(json!({ "content": "Looks good" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(comment["message_time"].as_str().unwrap().ends_with("seconds ago"));

    let (status, reply) = call(
        &app,
        "POST",
        &format!("/api/v1/tasks/{task_id}/comments/{}/reply", id_of(&comment)),
        Some(owner),
        Some(json!({ "content": "Thanks" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/v1/tasks/{task_id}/comments/{}/reply", id_of(&reply)),
        Some(owner),
        Some(json!({ "content": "Nested" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        "Comment depth exceed the maximum allowed depth"
    );

    let (status, threads) = call(
        &app,
        "GET",
        &format!("/api/v1/tasks/{task_id}/comments"),
        Some(owner),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(threads["total"], 1);
    assert_eq!(threads["comments"][0]["replies"][0]["content"], "Thanks");

    let (status, _) = call(
        &app,
        "DELETE",
        &format!("/api/v1/tasks/comments/{}", id_of(&comment)),
        Some(Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_inbox_is_scoped_to_caller() {
    let app = app().await;
    let owner = Uuid::new_v4();
    seed_workspace(&app, owner).await;

    let (status, body) = call(&app, "GET", "/api/v1/inbox/unread-count", Some(owner), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "unread_count": 0 }));

    let (status, _) = call(
        &app,
        "PATCH",
        &format!("/api/v1/inbox/{}/read", Uuid::new_v4()),
        Some(owner),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, "GET", "/api/v1/inbox?limit=500", Some(owner), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

async fn active_org_id(app: &Router, user: Uuid) -> Uuid {
    let (status, org) = call(app, "GET", "/api/v1/organizations/active", Some(user), None).await;
    assert_eq!(status, StatusCode::OK);
    id_of(&org).parse().unwrap()
}

/// Adds `user` to the organization and makes it their active one.
async fn enrol(db: &DatabaseConnection, org_id: Uuid, user: Uuid, role: OrganizationRole) {
    let repo = OrganizationRepository::new(db);
    repo.add_member(org_id, user, role).await.unwrap();
    repo.set_active(org_id, user).await.unwrap();
}

async fn open_invitation_token(db: &DatabaseConnection, email: &str) -> String {
    organization_invitation::Entity::find()
        .filter(organization_invitation::Column::Email.eq(email))
        .filter(organization_invitation::Column::InvalidatedAt.is_null())
        .one(db)
        .await
        .unwrap()
        .expect("open invitation")
        .token
}

#[tokio::test]
async fn test_malformed_json_body_is_a_problem_document() {
    let app = app().await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/organizations/create")
        .header(header::AUTHORIZATION, format!("Bearer {}", token(Uuid::new_v4())))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"name": "#))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/problem+json"
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["message"].as_str().unwrap().starts_with("JSON syntax error"));
}

#[tokio::test]
async fn test_restored_modules_are_documented() {
    let app = app().await;
    let (_, body) = call(&app, "GET", "/openapi.json", None, None).await;
    for path in [
        "/api/v1/teams/invite",
        "/api/v1/teams/accept-invitation",
        "/api/v1/time-logs",
        "/api/v1/time-logs/{time_log_id}/stop",
        "/api/v1/tasks/{task_id}/links",
        "/api/v1/tasks/attachments/{attachment_id}/download",
    ] {
        assert!(body["paths"][path].is_object(), "{path} missing");
    }
}

#[tokio::test]
async fn test_organization_invitation_acceptance_rules() {
    let (app, db) = app_with_db().await;
    let owner = Uuid::new_v4();
    seed_workspace(&app, owner).await;
    let org_id = active_org_id(&app, owner).await;
    let invitee = Uuid::new_v4();
    let email = format!("{invitee}@example.com");

    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/v1/organizations/{org_id}/invitations"),
        Some(owner),
        Some(json!({ "emails": [email.to_uppercase()] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["invitations"][0]["email"], email.as_str());
    let token = open_invitation_token(&db, &email).await;
    let accept = format!("/api/v1/organizations/invitations/{token}/accept");

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/organizations/invitations/no-such-token/accept",
        Some(invitee),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Invitation not found");

    let (status, _) = call(&app, "POST", &accept, Some(Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(&app, "POST", &accept, Some(invitee), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], org_id.to_string());
    assert_eq!(active_org_id(&app, invitee).await, org_id);

    let (status, _) = call(&app, "POST", &accept, Some(invitee), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let latecomer = Uuid::new_v4();
    OrganizationRepository::new(&db)
        .create_invitation(NewInvitation {
            org_id,
            email: format!("{latecomer}@example.com"),
            role: OrganizationRole::Member,
            invited_by: owner,
            token: "expired-token".into(),
            ttl_hours: -1,
            project_ids: Vec::new(),
        })
        .await
        .unwrap();
    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/organizations/invitations/expired-token/accept",
        Some(latecomer),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invitation has expired");
}

#[tokio::test]
async fn test_project_membership_and_lifecycle_endpoints() {
    let (app, db) = app_with_db().await;
    let owner = Uuid::new_v4();
    let project_id = seed_workspace(&app, owner).await;
    let org_id = active_org_id(&app, owner).await;
    let members = format!("/api/v1/projects/{project_id}/members");

    let (status, body) = call(
        &app,
        "POST",
        &members,
        Some(owner),
        Some(json!({ "user_id": Uuid::new_v4() })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "User is not a member of this organization");

    let colleague = Uuid::new_v4();
    enrol(&db, org_id, colleague, OrganizationRole::Member).await;
    let (status, body) = call(
        &app,
        "POST",
        &members,
        Some(owner),
        Some(json!({ "user_id": colleague })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["role"], "member");
    let (status, _) = call(
        &app,
        "POST",
        &members,
        Some(owner),
        Some(json!({ "user_id": colleague })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let project = format!("/api/v1/projects/{project_id}");
    let (_, body) = call(&app, "PATCH", &format!("{project}/favourite"), Some(owner), None).await;
    assert_eq!(body["is_favourite"], true);
    let (_, body) = call(&app, "PATCH", &format!("{project}/favourite"), Some(owner), None).await;
    assert_eq!(body["is_favourite"], false);

    let (status, _) = call(&app, "PATCH", &format!("{project}/archive"), Some(owner), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, archived) = call(&app, "GET", "/api/v1/projects/archived", Some(owner), None).await;
    assert_eq!(archived["total"], 1);
    let (status, _) = call(&app, "PATCH", &format!("{project}/restore"), Some(owner), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, archived) = call(&app, "GET", "/api/v1/projects/archived", Some(owner), None).await;
    assert_eq!(archived["total"], 0);

    let (status, _) = call(&app, "POST", &format!("{project}/join"), Some(colleague), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&app, "POST", &format!("{project}/join"), Some(owner), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let admin = Uuid::new_v4();
    enrol(&db, org_id, admin, OrganizationRole::Admin).await;
    let (status, body) = call(&app, "POST", &format!("{project}/join"), Some(admin), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], project_id.as_str());
}

#[tokio::test]
async fn test_assignment_notifications_skip_the_actor() {
    let (app, db, jobs) = app_with_jobs().await;
    let owner = Uuid::new_v4();
    let project_id = seed_workspace(&app, owner).await;
    let org_id = active_org_id(&app, owner).await;
    let colleague = Uuid::new_v4();
    enrol(&db, org_id, colleague, OrganizationRole::Member).await;
    ProjectRepository::new(&db)
        .add_member(project_id.parse().unwrap(), colleague, ProjectRole::Member)
        .await
        .unwrap();
    jobs.take();

    let (status, task) = call(
        &app,
        "POST",
        &format!("/api/v1/tasks?project_id={project_id}"),
        Some(owner),
        Some(json!({ "title": "Plan", "assignee_id": owner })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(jobs.take().is_empty());

    let assignee = format!("/api/v1/tasks/{}/assignee", id_of(&task));
    let (status, _) = call(
        &app,
        "PATCH",
        &assignee,
        Some(owner),
        Some(json!({ "assignee_id": colleague })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let queued = jobs.take();
    assert_eq!(queued.len(), 1);
    assert!(matches!(&queued[0], JobTask::TaskAssigned(args) if args.user_id == colleague));

    let (status, _) = call(
        &app,
        "PATCH",
        &assignee,
        Some(owner),
        Some(json!({ "assignee_id": owner })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let queued = jobs.take();
    assert_eq!(queued.len(), 1);
    assert!(matches!(&queued[0], JobTask::TaskUnassigned(args) if args.user_id == colleague));
}

#[tokio::test]
async fn test_team_invitation_flow_and_member_management() {
    let (app, db) = app_with_db().await;
    let owner = Uuid::new_v4();
    let project_id = seed_workspace(&app, owner).await;
    let invitee = Uuid::new_v4();
    let email = format!("{invitee}@example.com");

    let (status, _) = call(
        &app,
        "POST",
        "/api/v1/teams/invite",
        Some(owner),
        Some(json!({ "user_emails": [" ", email], "project_ids": [project_id] })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, listing) = call(&app, "GET", "/api/v1/teams/invitations", Some(owner), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["total"], 1);
    assert_eq!(listing["invitations"][0]["status"], "pending");
    assert_eq!(listing["invitations"][0]["as_admin"], false);
    assert_eq!(listing["invitations"][0]["invited_projects"][0]["name"], "Apollo");

    let token = open_invitation_token(&db, &email).await;
    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/teams/accept-invitation",
        None,
        Some(json!({ "token": token })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(
        body["message"],
        "Please sign in or register to accept the invitation"
    );

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/teams/accept-invitation",
        Some(Uuid::new_v4()),
        Some(json!({ "token": token })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Email does not match invitation");

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/teams/accept-invitation",
        Some(invitee),
        Some(json!({ "token": token })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["project_ids"], json!([project_id]));

    let (status, body) = call(
        &app,
        "POST",
        "/api/v1/teams/accept-invitation",
        Some(invitee),
        Some(json!({ "token": token })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invitation already accepted");

    let (_, listing) = call(&app, "GET", "/api/v1/teams/members", Some(owner), None).await;
    assert_eq!(listing["total"], 2);

    let admin_toggle = format!("/api/v1/teams/{invitee}/admin");
    let (status, _) = call(&app, "PATCH", &admin_toggle, Some(invitee), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (_, body) = call(&app, "PATCH", &admin_toggle, Some(owner), None).await;
    assert_eq!(body["role"], "admin");
    let (status, body) = call(
        &app,
        "PATCH",
        &format!("/api/v1/teams/{owner}/admin"),
        Some(owner),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Cannot change owner's role");

    let (status, _) = call(
        &app,
        "POST",
        "/api/v1/teams/invite",
        Some(invitee),
        Some(json!({ "user_emails": ["someone@example.com"], "add_as_admin": true })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let remove = format!("/api/v1/teams/{invitee}/remove");
    let (status, _) = call(
        &app,
        "DELETE",
        &format!("/api/v1/teams/{owner}/remove"),
        Some(owner),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = call(&app, "DELETE", &remove, Some(owner), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, body) = call(&app, "DELETE", &remove, Some(owner), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Member not found");
    assert!(
        ProjectRepository::new(&db)
            .membership(project_id.parse().unwrap(), invitee)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_task_links_and_attachments() {
    let app = app().await;
    let owner = Uuid::new_v4();
    let project_id = seed_workspace(&app, owner).await;
    let (_, task) = call(
        &app,
        "POST",
        &format!("/api/v1/tasks?project_id={project_id}"),
        Some(owner),
        Some(json!({ "title": "Research" })),
    )
    .await;
    let task_id = id_of(&task);
    let links = format!("/api/v1/tasks/{task_id}/links");

    let (status, _) = call(
        &app,
        "POST",
        &links,
        Some(owner),
        Some(json!({ "link_url": "ftp://example.com/spec" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, link) = call(
        &app,
        "POST",
        &links,
        Some(owner),
        Some(json!({ "title": "Docs", "link_url": "https://example.com/docs" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let link_uri = format!("{links}/{}", id_of(&link));

    let (status, body) = call(&app, "PUT", &link_uri, Some(owner), Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "No updates provided");

    let (status, body) = call(
        &app,
        "PUT",
        &link_uri,
        Some(owner),
        Some(json!({ "title": "Reference" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Reference");
    assert_eq!(body["link_url"], "https://example.com/docs");

    let (_, listing) = call(&app, "GET", &links, Some(owner), None).await;
    assert_eq!(listing["total"], 1);
    let (status, _) = call(&app, "DELETE", &link_uri, Some(owner), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&app, "DELETE", &link_uri, Some(owner), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let missing = Uuid::new_v4();
    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/v1/tasks/{task_id}/attachments"),
        Some(owner),
        Some(json!({ "file_id": missing })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        format!("Failed to add attachment for file {missing}, invalid file id")
    );

    let (status, _) = call(
        &app,
        "GET",
        &format!("/api/v1/tasks/{task_id}/links"),
        Some(Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_time_log_timer_and_manual_entries() {
    let (app, db) = app_with_db().await;
    let owner = Uuid::new_v4();
    let project_id = seed_workspace(&app, owner).await;
    let (_, task) = call(
        &app,
        "POST",
        &format!("/api/v1/tasks?project_id={project_id}"),
        Some(owner),
        Some(json!({ "title": "Build" })),
    )
    .await;
    let task_id = id_of(&task);

    let (status, body) = call(&app, "GET", "/api/v1/time-logs/active", Some(owner), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::Null);

    let start = json!({ "project_id": project_id, "task_id": task_id });
    let (status, running) = call(
        &app,
        "POST",
        "/api/v1/time-logs/start",
        Some(owner),
        Some(start.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(running["status"], "running");
    let running_uri = format!("/api/v1/time-logs/{}", id_of(&running));

    let (status, _) = call(&app, "POST", "/api/v1/time-logs/start", Some(owner), Some(start)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        &app,
        "PUT",
        &running_uri,
        Some(owner),
        Some(json!({ "notes": "wip" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        "Cannot update a running time log. Please stop it first."
    );

    let (status, stopped) = call(
        &app,
        "POST",
        &format!("{running_uri}/stop"),
        Some(owner),
        Some(json!({ "notes": "done" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stopped["status"], "stopped");
    assert_eq!(stopped["notes"], "done");
    let stop_again = format!("{running_uri}/stop");
    let (status, _) = call(&app, "POST", &stop_again, Some(owner), Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, manual) = call(
        &app,
        "POST",
        "/api/v1/time-logs",
        Some(owner),
        Some(json!({
            "project_id": project_id,
            "task_id": task_id,
            "date": "2025-03-01",
            "started_at": "09:00:00",
            "duration_seconds": 5400,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(manual["duration_formatted"], "01:30:00");

    let (status, edited) = call(
        &app,
        "PUT",
        &format!("/api/v1/time-logs/{}", id_of(&manual)),
        Some(owner),
        Some(json!({ "stopped_at": "08:00:00" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(edited["duration_seconds"], 15 * 3600 - 1);

    let (status, listing) = call(
        &app,
        "GET",
        "/api/v1/time-logs?status_filter=stopped",
        Some(owner),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["total_count"], 2);
    let total = stopped["duration_seconds"].as_i64().unwrap() + 15 * 3600 - 1;
    assert_eq!(listing["total_duration_seconds"], total);

    let (status, _) = call(&app, "GET", "/api/v1/time-logs?limit=0", Some(owner), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let colleague = Uuid::new_v4();
    enrol(&db, active_org_id(&app, owner).await, colleague, OrganizationRole::Member).await;
    let (status, _) = call(&app, "DELETE", &running_uri, Some(colleague), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&app, "DELETE", &running_uri, Some(owner), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}
