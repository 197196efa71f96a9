//! # Server Configuration
//!
//! This module contains the router, shared state and startup sequence of the
//! HexoTeams API.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{delete, get, patch, post, put},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::cache::Cache;
use crate::config::AppConfig;
use crate::handlers::{
    self, attachments, files, inbox, links, misc, organizations, profiles, projects, tasks, teams,
    time_logs, ws,
};
use crate::queue::{self, JobQueue, TaskDispatcher};
use crate::realtime::{NotificationHub, run_subscriber};
use crate::storage::ObjectStorage;
use crate::telemetry::trace_id_middleware;

/// Multipart overhead allowed on top of the configured file size limit.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub storage: Arc<ObjectStorage>,
    pub cache: Cache,
    pub dispatcher: TaskDispatcher,
    pub hub: NotificationHub,
}

impl AppState {
    /// State without a broker: caching, job dispatch and realtime relays are off.
    pub fn standalone(config: AppConfig, db: DatabaseConnection) -> anyhow::Result<Self> {
        let storage = ObjectStorage::new(&config.storage).context("invalid storage settings")?;
        Ok(Self {
            config: Arc::new(config),
            db,
            storage: Arc::new(storage),
            cache: Cache::disabled(),
            dispatcher: TaskDispatcher::disabled(),
            hub: NotificationHub::default(),
        })
    }
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/me", get(profiles::get_me).patch(profiles::update_me))
        // organizations
        .route("/organizations", get(organizations::list_organizations))
        .route("/organizations/create", post(organizations::create_organization))
        .route("/organizations/active", get(organizations::get_active_organization))
        .route("/organizations/deactivate", post(organizations::deactivate_organization))
        .route(
            "/organizations/invitations/{token}/accept",
            post(organizations::accept_invitation),
        )
        .route(
            "/organizations/{org_id}",
            get(organizations::get_organization)
                .put(organizations::update_organization)
                .delete(organizations::delete_organization),
        )
        .route(
            "/organizations/{org_id}/avatar",
            put(organizations::update_organization_avatar),
        )
        .route(
            "/organizations/{org_id}/active",
            post(organizations::set_active_organization),
        )
        .route(
            "/organizations/{org_id}/members",
            get(organizations::list_organization_members),
        )
        .route(
            "/organizations/{org_id}/invitations",
            post(organizations::invite_members),
        )
        // projects
        .route("/projects", get(projects::list_projects))
        .route("/projects/create", post(projects::create_project))
        .route("/projects/non-member", get(projects::list_non_member_projects))
        .route("/projects/archived", get(projects::list_archived_projects))
        .route(
            "/projects/{project_id}",
            get(projects::get_project).delete(projects::delete_project),
        )
        .route("/projects/{project_id}/archive", patch(projects::archive_project))
        .route("/projects/{project_id}/restore", patch(projects::restore_project))
        .route("/projects/{project_id}/favourite", patch(projects::toggle_favourite))
        .route("/projects/{project_id}/join", post(projects::join_project))
        .route(
            "/projects/{project_id}/members",
            get(projects::list_project_members).post(projects::add_project_member),
        )
        .route("/projects/{project_id}/avatar", put(projects::update_project_avatar))
        .route("/projects/{project_id}/summary", get(projects::get_project_summary))
        .route(
            "/projects/{project_id}/activities",
            get(projects::list_project_activities),
        )
        // tasks
        .route("/tasks", get(tasks::list_tasks).post(tasks::create_task))
        .route(
            "/tasks/comments/{comment_id}",
            put(tasks::update_comment).delete(tasks::delete_comment),
        )
        .route(
            "/tasks/{task_id}",
            patch(tasks::update_task).delete(tasks::delete_task),
        )
        .route("/tasks/{task_id}/get", get(tasks::get_task))
        .route(
            "/tasks/{task_id}/subtasks",
            get(tasks::list_subtasks).post(tasks::create_subtask),
        )
        .route(
            "/tasks/{task_id}/assignee",
            get(tasks::get_assignee).patch(tasks::update_assignee),
        )
        .route("/tasks/{task_id}/status", patch(tasks::update_status))
        .route(
            "/tasks/{task_id}/comments",
            get(tasks::list_comments).post(tasks::create_comment),
        )
        .route(
            "/tasks/{task_id}/comments/{comment_id}/reply",
            post(tasks::reply_to_comment),
        )
        .route("/tasks/{task_id}/activities", get(tasks::list_task_activities))
        .route(
            "/tasks/{task_id}/links",
            get(links::list_links).post(links::create_link),
        )
        .route(
            "/tasks/{task_id}/links/{link_id}",
            put(links::update_link).delete(links::delete_link),
        )
        .route(
            "/tasks/{task_id}/attachments",
            get(attachments::list_attachments).post(attachments::create_attachment),
        )
        .route(
            "/tasks/attachments/{attachment_id}",
            delete(attachments::delete_attachment),
        )
        .route(
            "/tasks/attachments/{attachment_id}/download",
            get(attachments::download_attachment),
        )
        // teams
        .route("/teams/invite", post(teams::invite_team_members))
        .route("/teams/invitations", get(teams::list_team_invitations))
        .route("/teams/members", get(teams::list_team_members))
        .route("/teams/{user_id}/remove", delete(teams::remove_team_member))
        .route("/teams/{user_id}/admin", patch(teams::toggle_team_admin))
        // time logs
        .route(
            "/time-logs",
            get(time_logs::list_time_logs).post(time_logs::create_time_log),
        )
        .route("/time-logs/start", post(time_logs::start_time_log))
        .route("/time-logs/active", get(time_logs::get_active_time_log))
        .route(
            "/time-logs/{time_log_id}",
            get(time_logs::get_time_log)
                .put(time_logs::update_time_log)
                .delete(time_logs::delete_time_log),
        )
        .route("/time-logs/{time_log_id}/stop", post(time_logs::stop_time_log))
        // files
        .route("/files", get(files::list_files))
        .route("/files/upload", post(files::upload_file))
        .route(
            "/files/{file_id}",
            get(files::get_file).delete(files::delete_file),
        )
        .route("/files/{file_id}/url", get(files::get_file_url))
        .route(
            "/files/{file_id}/permanently",
            delete(files::delete_file_permanently),
        )
        // inbox
        .route("/inbox", get(inbox::list_inbox))
        .route("/inbox/unread-count", get(inbox::unread_count))
        .route(
            "/inbox/{inbox_id}",
            get(inbox::get_inbox_item).delete(inbox::delete_inbox_item),
        )
        .route("/inbox/{inbox_id}/read", patch(inbox::mark_read))
        .route("/inbox/{inbox_id}/archive", patch(inbox::archive))
        .route("/inbox/{inbox_id}/unarchive", patch(inbox::unarchive))
}

/// Routes that authenticate on their own or not at all.
fn public_api_routes() -> Router<AppState> {
    Router::new()
        .route("/misc/comment-depth", get(misc::comment_depth))
        .route("/misc/subtask-depth", get(misc::subtask_depth))
        .route("/ws/inbox/{org_id}", get(ws::inbox_socket))
        .route("/teams/accept-invitation", post(teams::accept_team_invitation))
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true)
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let config = Arc::clone(&state.config);
    let body_limit = usize::try_from(config.storage.max_file_size_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    let protected = api_routes().route_layer(middleware::from_fn_with_state(
        Arc::clone(&config),
        auth_middleware,
    ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/health/ready", get(handlers::ready))
        .nest("/api/v1", protected.merge(public_api_routes()))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(cors_layer(&config))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id_middleware))
}

/// Connects the broker-backed services. Without Redis, or when it cannot be
/// reached, the API keeps serving with those services disabled.
async fn connect_broker(config: &AppConfig) -> (Cache, TaskDispatcher, Option<String>) {
    let Some(redis_url) = config.redis_url.clone() else {
        tracing::warn!("REDIS_URL is not set, cache, task dispatch and realtime are disabled");
        return (Cache::disabled(), TaskDispatcher::disabled(), None);
    };

    let connected = async {
        let cache = queue::connect(&redis_url).await?;
        let jobs = JobQueue::connect(&redis_url, &config.worker.queue_name).await?;
        Ok::<_, queue::QueueError>((cache, jobs))
    };
    match connected.await {
        Ok((cache, jobs)) => (
            Cache::new(cache),
            TaskDispatcher::new(Arc::new(jobs), config.worker.max_attempts),
            Some(redis_url),
        ),
        Err(err) => {
            tracing::error!(error = %err, "Redis is unreachable, broker features are disabled");
            (Cache::disabled(), TaskDispatcher::disabled(), None)
        }
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
    shutdown.cancel();
}

/// Starts the server with the given configuration
pub async fn run_server(config: AppConfig, db: DatabaseConnection) -> anyhow::Result<()> {
    let addr = config.bind_addr().context("invalid server address")?;
    let (cache, dispatcher, redis_url) = connect_broker(&config).await;

    let mut state = AppState::standalone(config, db)?;
    state.cache = cache;
    state.dispatcher = dispatcher;

    // Provisioning is retried lazily on every storage call, so a failure here
    // is only reported.
    let storage = Arc::clone(&state.storage);
    tokio::spawn(async move {
        if let Err(err) = storage.ensure_bucket().await {
            tracing::error!(error = %err, "Object storage is not ready yet");
        }
    });

    let shutdown = CancellationToken::new();
    let subscriber = redis_url.map(|url| {
        tokio::spawn(run_subscriber(url, state.hub.clone(), shutdown.clone()))
    });

    let profile = state.config.profile.clone();
    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, %profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("server error")?;

    shutdown.cancel();
    if let Some(subscriber) = subscriber {
        let _ = subscriber.await;
    }
    tracing::info!("Server stopped");
    Ok(())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health,
        crate::handlers::ready,
        profiles::get_me,
        profiles::update_me,
        organizations::create_organization,
        organizations::list_organizations,
        organizations::get_organization,
        organizations::update_organization,
        organizations::delete_organization,
        organizations::update_organization_avatar,
        organizations::set_active_organization,
        organizations::get_active_organization,
        organizations::deactivate_organization,
        organizations::list_organization_members,
        organizations::invite_members,
        organizations::accept_invitation,
        projects::create_project,
        projects::list_projects,
        projects::list_non_member_projects,
        projects::list_archived_projects,
        projects::archive_project,
        projects::restore_project,
        projects::toggle_favourite,
        projects::join_project,
        projects::get_project,
        projects::list_project_members,
        projects::add_project_member,
        projects::delete_project,
        projects::update_project_avatar,
        projects::get_project_summary,
        projects::list_project_activities,
        tasks::create_task,
        tasks::create_subtask,
        tasks::list_tasks,
        tasks::list_subtasks,
        tasks::get_task,
        tasks::get_assignee,
        tasks::update_assignee,
        tasks::update_status,
        tasks::update_task,
        tasks::delete_task,
        tasks::create_comment,
        tasks::reply_to_comment,
        tasks::update_comment,
        tasks::delete_comment,
        tasks::list_comments,
        tasks::list_task_activities,
        links::create_link,
        links::list_links,
        links::update_link,
        links::delete_link,
        attachments::create_attachment,
        attachments::list_attachments,
        attachments::delete_attachment,
        attachments::download_attachment,
        teams::invite_team_members,
        teams::accept_team_invitation,
        teams::remove_team_member,
        teams::list_team_invitations,
        teams::list_team_members,
        teams::toggle_team_admin,
        time_logs::create_time_log,
        time_logs::start_time_log,
        time_logs::stop_time_log,
        time_logs::get_active_time_log,
        time_logs::list_time_logs,
        time_logs::get_time_log,
        time_logs::update_time_log,
        time_logs::delete_time_log,
        files::upload_file,
        files::list_files,
        files::get_file,
        files::get_file_url,
        files::delete_file,
        files::delete_file_permanently,
        inbox::unread_count,
        inbox::list_inbox,
        inbox::get_inbox_item,
        inbox::mark_read,
        inbox::archive,
        inbox::unarchive,
        inbox::delete_inbox_item,
        misc::comment_depth,
        misc::subtask_depth,
        ws::inbox_socket,
    ),
    components(
        schemas(
            crate::error::ApiError,
            crate::models::ServiceInfo,
            crate::models::HealthStatus,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "root", description = "Service greeting and liveness"),
        (name = "auth", description = "Caller profile"),
        (name = "organizations", description = "Organizations, members and invitations"),
        (name = "projects", description = "Projects, members and summaries"),
        (name = "tasks", description = "Tasks, subtasks, comments, links and attachments"),
        (name = "teams", description = "Team members and invitations of the active organization"),
        (name = "time-logs", description = "Timers and manual time entries"),
        (name = "files", description = "File uploads"),
        (name = "inbox", description = "Notifications"),
        (name = "misc", description = "Client-facing limits"),
    ),
    info(
        title = "HexoTeams API",
        description = "Team, project and task management API",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
