//! # Time Log API Handlers
//!
//! Per-user timers and manual time entries booked against a project task.
//! Clock times in requests are wall-clock times in the caller's profile
//! timezone on the given `date`; responses carry RFC 3339 instants.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::types::ApiJson;
use crate::auth::{ActiveOrganization, require_project_access};
use crate::error::{ApiError, bad_request, forbidden, validation_error};
use crate::models::time_log::{Model as TimeLogModel, TimeLogStatus};
use crate::repositories::time_log::{NewTimeLog, TimeLogChanges, TimeLogFilter};
use crate::repositories::{
    Page, ProfileRepository, ProjectRepository, TaskRepository, TimeLogRepository,
};
use crate::server::AppState;
use crate::utils::format_duration;

const DEFAULT_LIST_LIMIT: u64 = 100;
const MAX_LIST_LIMIT: u64 = 1000;
const END_OF_DAY: NaiveTime = match NaiveTime::from_hms_opt(23, 59, 59) {
    Some(time) => time,
    None => panic!("23:59:59 is a valid time"),
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TimeLogInfo {
    #[schema(value_type = String)]
    pub id: Uuid,
    #[schema(value_type = String)]
    pub project_id: Uuid,
    #[schema(value_type = Option<String>)]
    pub task_id: Option<Uuid>,
    #[schema(value_type = String)]
    pub date: NaiveDate,
    #[schema(value_type = String)]
    pub started_at: String,
    #[schema(value_type = Option<String>)]
    pub stopped_at: Option<String>,
    /// Elapsed time so far for running logs
    pub duration_seconds: i64,
    pub duration_formatted: String,
    pub status: TimeLogStatus,
    pub notes: Option<String>,
    #[schema(value_type = String)]
    pub created_by: Uuid,
    #[schema(value_type = String)]
    pub created_at: String,
    #[schema(value_type = String)]
    pub updated_at: String,
}

impl TimeLogInfo {
    fn at(model: TimeLogModel, now: DateTime<Utc>) -> Self {
        let status = model.status();
        let duration_seconds = model.duration_seconds.unwrap_or_else(|| {
            (now - model.started_at.with_timezone(&Utc))
                .num_seconds()
                .max(0)
        });
        Self {
            id: model.id,
            project_id: model.project_id,
            task_id: model.task_id,
            date: model.log_date,
            started_at: model.started_at.to_rfc3339(),
            stopped_at: model.stopped_at.map(|at| at.to_rfc3339()),
            duration_seconds,
            duration_formatted: format_duration(duration_seconds),
            status,
            notes: model.notes,
            created_by: model.created_by,
            created_at: model.created_at.to_rfc3339(),
            updated_at: model.updated_at.to_rfc3339(),
        }
    }
}

impl From<TimeLogModel> for TimeLogInfo {
    fn from(model: TimeLogModel) -> Self {
        Self::at(model, Utc::now())
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StartTimeLogRequest {
    #[schema(value_type = String)]
    pub project_id: Uuid,
    #[schema(value_type = String)]
    pub task_id: Uuid,
    pub notes: Option<String>,
}

/// Manual entry; needs `stopped_at`, `duration_seconds` or both
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTimeLogRequest {
    #[schema(value_type = String)]
    pub project_id: Uuid,
    #[schema(value_type = String)]
    pub task_id: Uuid,
    #[schema(value_type = String, example = "2025-03-01")]
    pub date: NaiveDate,
    #[schema(value_type = String, example = "09:00:00")]
    pub started_at: NaiveTime,
    #[schema(value_type = Option<String>, example = "10:30:00")]
    pub stopped_at: Option<NaiveTime>,
    pub duration_seconds: Option<i64>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct StopTimeLogRequest {
    pub notes: Option<String>,
}

/// Only provided fields are changed
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateTimeLogRequest {
    pub notes: Option<String>,
    #[schema(value_type = Option<String>)]
    pub started_at: Option<NaiveTime>,
    #[schema(value_type = Option<String>)]
    pub stopped_at: Option<NaiveTime>,
    pub duration_seconds: Option<i64>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListTimeLogsQuery {
    #[param(value_type = Option<String>)]
    pub project_id: Option<Uuid>,
    #[param(value_type = Option<String>)]
    pub task_id: Option<Uuid>,
    #[param(value_type = Option<String>)]
    pub from_date: Option<NaiveDate>,
    #[param(value_type = Option<String>)]
    pub to_date: Option<NaiveDate>,
    pub status_filter: Option<TimeLogStatus>,
    /// Defaults to 100, at most 1000
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TimeLogListResponse {
    pub time_logs: Vec<TimeLogInfo>,
    pub total_count: u64,
    pub total_duration_seconds: i64,
    pub total_duration_formatted: String,
}

/// `date` at `time` in `zone`. Skipped wall-clock times (DST gaps) are rejected.
fn local_instant(date: NaiveDate, time: NaiveTime, zone: Tz) -> Result<DateTime<Utc>, ApiError> {
    zone.from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|at| at.with_timezone(&Utc))
        .ok_or_else(|| bad_request("Time does not exist in your timezone on that date"))
}

/// Resolves start, stop and duration for a stopped entry on `date`.
///
/// An explicit stop time wins over a duration. A stop time earlier than the
/// start is read as "until the end of the day".
fn resolve_interval(
    date: NaiveDate,
    started_at: NaiveTime,
    stopped_at: Option<NaiveTime>,
    duration_seconds: Option<i64>,
    zone: Tz,
) -> Result<(DateTime<Utc>, DateTime<Utc>, i64), ApiError> {
    let start = local_instant(date, started_at, zone)?;
    let stop = match (stopped_at, duration_seconds) {
        (Some(stopped_at), _) => {
            let stop = local_instant(date, stopped_at, zone)?;
            if stop < start {
                local_instant(date, END_OF_DAY, zone)?
            } else {
                stop
            }
        }
        (None, Some(seconds)) if seconds >= 0 => Duration::try_seconds(seconds)
            .and_then(|duration| start.checked_add_signed(duration))
            .ok_or_else(|| {
                validation_error(
                    "Duration is too large",
                    serde_json::json!({ "duration_seconds": "Out of range" }),
                )
            })?,
        (None, Some(_)) => {
            return Err(validation_error(
                "Duration must not be negative",
                serde_json::json!({ "duration_seconds": "Must be zero or greater" }),
            ));
        }
        (None, None) => {
            return Err(bad_request(
                "Either stopped_at or duration_seconds is required",
            ));
        }
    };
    Ok((start, stop, (stop - start).num_seconds()))
}

async fn caller_zone(state: &AppState, org: &ActiveOrganization) -> Result<Tz, ApiError> {
    Ok(ProfileRepository::new(&state.db)
        .find(org.user.id)
        .await?
        .and_then(|profile| profile.timezone.parse().ok())
        .unwrap_or(Tz::UTC))
}

/// Checks the project belongs to the organization and the task to the project.
async fn require_task_in_project(
    state: &AppState,
    org: &ActiveOrganization,
    project_id: Uuid,
    task_id: Uuid,
) -> Result<(), ApiError> {
    ProjectRepository::new(&state.db)
        .find_in_org(org.org_id, project_id)
        .await?;
    require_project_access(&state.db, project_id, org).await?;
    let task = TaskRepository::new(&state.db).find(task_id).await?;
    if task.project_id != project_id {
        return Err(bad_request("Task does not belong to the specified project"));
    }
    Ok(())
}

/// Loads a log of the active organization created by the caller.
async fn owned_log(
    state: &AppState,
    org: &ActiveOrganization,
    id: Uuid,
    action: &str,
) -> Result<TimeLogModel, ApiError> {
    let log = TimeLogRepository::new(&state.db).find(id).await?;
    let project = ProjectRepository::new(&state.db)
        .find(log.project_id)
        .await?;
    if project.org_id != org.org_id {
        return Err(forbidden(Some("Time log does not belong to this organization")));
    }
    if log.created_by != org.user.id {
        return Err(forbidden(Some(&format!(
            "You don't have permission to {action} this time log"
        ))));
    }
    Ok(log)
}

/// Books a finished block of time
#[utoipa::path(
    post,
    path = "/api/v1/time-logs",
    security(("bearer_auth" = [])),
    request_body = CreateTimeLogRequest,
    responses(
        (status = 201, description = "Time log created", body = TimeLogInfo),
        (status = 400, description = "Missing stop time and duration, or task outside the project", body = ApiError),
        (status = 404, description = "Project or task not found", body = ApiError)
    ),
    tag = "time-logs"
)]
pub async fn create_time_log(
    State(state): State<AppState>,
    org: ActiveOrganization,
    ApiJson(request): ApiJson<CreateTimeLogRequest>,
) -> Result<(StatusCode, Json<TimeLogInfo>), ApiError> {
    require_task_in_project(&state, &org, request.project_id, request.task_id).await?;
    let zone = caller_zone(&state, &org).await?;
    let (started_at, stopped_at, duration) = resolve_interval(
        request.date,
        request.started_at,
        request.stopped_at,
        request.duration_seconds,
        zone,
    )?;

    let log = TimeLogRepository::new(&state.db)
        .create(NewTimeLog {
            project_id: request.project_id,
            task_id: request.task_id,
            log_date: request.date,
            started_at,
            stopped_at: Some(stopped_at),
            duration_seconds: Some(duration),
            notes: request.notes,
            created_by: org.user.id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(log.into())))
}

/// Starts a timer; a user runs at most one at a time
#[utoipa::path(
    post,
    path = "/api/v1/time-logs/start",
    security(("bearer_auth" = [])),
    request_body = StartTimeLogRequest,
    responses(
        (status = 201, description = "Timer started", body = TimeLogInfo),
        (status = 400, description = "A timer is already running", body = ApiError),
        (status = 404, description = "Project or task not found", body = ApiError)
    ),
    tag = "time-logs"
)]
pub async fn start_time_log(
    State(state): State<AppState>,
    org: ActiveOrganization,
    ApiJson(request): ApiJson<StartTimeLogRequest>,
) -> Result<(StatusCode, Json<TimeLogInfo>), ApiError> {
    let repo = TimeLogRepository::new(&state.db);
    if repo.running_for_user(org.user.id).await?.is_some() {
        return Err(bad_request(
            "You already have an active time log running. Please stop it before starting a new one.",
        ));
    }
    require_task_in_project(&state, &org, request.project_id, request.task_id).await?;
    let zone = caller_zone(&state, &org).await?;

    let now = Utc::now();
    let log = repo
        .create(NewTimeLog {
            project_id: request.project_id,
            task_id: request.task_id,
            log_date: now.with_timezone(&zone).date_naive(),
            started_at: now,
            stopped_at: None,
            duration_seconds: None,
            notes: request.notes,
            created_by: org.user.id,
        })
        .await?;
    tracing::info!(time_log_id = %log.id, user_id = %org.user.id, "Timer started");
    Ok((StatusCode::CREATED, Json(log.into())))
}

#[utoipa::path(
    post,
    path = "/api/v1/time-logs/{time_log_id}/stop",
    security(("bearer_auth" = [])),
    params(("time_log_id" = String, Path, description = "Time log id")),
    request_body = StopTimeLogRequest,
    responses(
        (status = 200, description = "Timer stopped", body = TimeLogInfo),
        (status = 400, description = "Time log is not running", body = ApiError),
        (status = 403, description = "Someone else's time log", body = ApiError),
        (status = 404, description = "Time log not found", body = ApiError)
    ),
    tag = "time-logs"
)]
pub async fn stop_time_log(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(time_log_id): Path<Uuid>,
    ApiJson(request): ApiJson<StopTimeLogRequest>,
) -> Result<Json<TimeLogInfo>, ApiError> {
    let log = owned_log(&state, &org, time_log_id, "stop").await?;
    if log.status() != TimeLogStatus::Running {
        return Err(bad_request("Time log is not running"));
    }
    let log = TimeLogRepository::new(&state.db)
        .stop(log, Utc::now(), request.notes)
        .await?;
    tracing::info!(time_log_id = %log.id, seconds = ?log.duration_seconds, "Timer stopped");
    Ok(Json(log.into()))
}

/// The caller's running timer, or `null`
#[utoipa::path(
    get,
    path = "/api/v1/time-logs/active",
    security(("bearer_auth" = [])),
    responses((status = 200, description = "Running timer with elapsed time, or null", body = TimeLogInfo)),
    tag = "time-logs"
)]
pub async fn get_active_time_log(
    State(state): State<AppState>,
    org: ActiveOrganization,
) -> Result<Json<Option<TimeLogInfo>>, ApiError> {
    let log = TimeLogRepository::new(&state.db)
        .running_for_user(org.user.id)
        .await?;
    Ok(Json(log.map(TimeLogInfo::from)))
}

/// The caller's time logs in the active organization
#[utoipa::path(
    get,
    path = "/api/v1/time-logs",
    security(("bearer_auth" = [])),
    params(ListTimeLogsQuery),
    responses(
        (status = 200, description = "Time logs with totals", body = TimeLogListResponse),
        (status = 403, description = "Project outside the organization", body = ApiError)
    ),
    tag = "time-logs"
)]
pub async fn list_time_logs(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Query(query): Query<ListTimeLogsQuery>,
) -> Result<Json<TimeLogListResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if limit == 0 || limit > MAX_LIST_LIMIT {
        return Err(validation_error(
            "Invalid limit",
            serde_json::json!({ "limit": "Must be between 1 and 1000" }),
        ));
    }

    let mut project_ids = ProjectRepository::new(&state.db)
        .ids_in_org(org.org_id)
        .await?;
    if let Some(project_id) = query.project_id {
        if !project_ids.contains(&project_id) {
            return Err(forbidden(Some("Project does not belong to this organization")));
        }
        project_ids = vec![project_id];
    }

    let filter = TimeLogFilter {
        project_ids,
        created_by: Some(org.user.id),
        task_id: query.task_id,
        from_date: query.from_date,
        to_date: query.to_date,
        status: query.status_filter,
    };
    let page = TimeLogRepository::new(&state.db)
        .list(&filter, Page::new(query.offset.unwrap_or(0), limit))
        .await?;

    let now = Utc::now();
    Ok(Json(TimeLogListResponse {
        time_logs: page
            .rows
            .into_iter()
            .map(|log| TimeLogInfo::at(log, now))
            .collect(),
        total_count: page.total_count,
        total_duration_seconds: page.total_duration_seconds,
        total_duration_formatted: format_duration(page.total_duration_seconds),
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/time-logs/{time_log_id}",
    security(("bearer_auth" = [])),
    params(("time_log_id" = String, Path, description = "Time log id")),
    responses(
        (status = 200, description = "Time log", body = TimeLogInfo),
        (status = 403, description = "Someone else's time log", body = ApiError),
        (status = 404, description = "Time log not found", body = ApiError)
    ),
    tag = "time-logs"
)]
pub async fn get_time_log(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(time_log_id): Path<Uuid>,
) -> Result<Json<TimeLogInfo>, ApiError> {
    let log = owned_log(&state, &org, time_log_id, "view").await?;
    Ok(Json(log.into()))
}

/// Edits notes or the interval of a stopped time log
#[utoipa::path(
    put,
    path = "/api/v1/time-logs/{time_log_id}",
    security(("bearer_auth" = [])),
    params(("time_log_id" = String, Path, description = "Time log id")),
    request_body = UpdateTimeLogRequest,
    responses(
        (status = 200, description = "Time log updated", body = TimeLogInfo),
        (status = 400, description = "Time log is still running", body = ApiError),
        (status = 403, description = "Someone else's time log", body = ApiError)
    ),
    tag = "time-logs"
)]
pub async fn update_time_log(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(time_log_id): Path<Uuid>,
    ApiJson(request): ApiJson<UpdateTimeLogRequest>,
) -> Result<Json<TimeLogInfo>, ApiError> {
    let log = owned_log(&state, &org, time_log_id, "update").await?;
    let Some(current_stop) = log.stopped_at else {
        return Err(bad_request(
            "Cannot update a running time log. Please stop it first.",
        ));
    };

    let reschedules = request.started_at.is_some()
        || request.stopped_at.is_some()
        || request.duration_seconds.is_some();
    let interval = if reschedules {
        let zone = caller_zone(&state, &org).await?;
        let started_at = request
            .started_at
            .unwrap_or_else(|| log.started_at.with_timezone(&zone).time());
        // A new duration alone moves the stop time; otherwise keep the old stop.
        let stopped_at = match (request.stopped_at, request.duration_seconds) {
            (Some(stopped_at), _) => Some(stopped_at),
            (None, Some(_)) => None,
            (None, None) => Some(current_stop.with_timezone(&zone).time()),
        };
        Some(resolve_interval(
            log.log_date,
            started_at,
            stopped_at,
            request.duration_seconds,
            zone,
        )?)
    } else {
        None
    };

    let log = TimeLogRepository::new(&state.db)
        .update(
            log,
            TimeLogChanges {
                interval,
                notes: request.notes,
            },
        )
        .await?;
    Ok(Json(log.into()))
}

#[utoipa::path(
    delete,
    path = "/api/v1/time-logs/{time_log_id}",
    security(("bearer_auth" = [])),
    params(("time_log_id" = String, Path, description = "Time log id")),
    responses(
        (status = 204, description = "Time log deleted"),
        (status = 403, description = "Someone else's time log", body = ApiError),
        (status = 404, description = "Time log not found", body = ApiError)
    ),
    tag = "time-logs"
)]
pub async fn delete_time_log(
    State(state): State<AppState>,
    org: ActiveOrganization,
    Path(time_log_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let log = owned_log(&state, &org, time_log_id, "delete").await?;
    TimeLogRepository::new(&state.db).delete(log.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn stop_time_wins_over_duration() {
        let (start, stop, seconds) =
            resolve_interval(day(), at(9, 0), Some(at(10, 30)), Some(60), Tz::UTC).unwrap();
        assert_eq!(seconds, 90 * 60);
        assert_eq!(stop - start, Duration::minutes(90));
    }

    #[test]
    fn duration_alone_sets_the_stop_time() {
        let (start, stop, seconds) =
            resolve_interval(day(), at(23, 0), None, Some(7_200), Tz::UTC).unwrap();
        assert_eq!(seconds, 7_200);
        assert_eq!(stop, start + Duration::hours(2));
    }

    #[test]
    fn early_stop_runs_to_end_of_day() {
        let (_, stop, seconds) =
            resolve_interval(day(), at(22, 0), Some(at(1, 0)), None, Tz::UTC).unwrap();
        assert_eq!(stop.time(), END_OF_DAY);
        assert_eq!(seconds, 2 * 3_600 - 1);
    }

    #[test]
    fn clock_times_are_read_in_the_callers_zone() {
        let zone: Tz = "Asia/Tokyo".parse().unwrap();
        let (start, _, _) = resolve_interval(day(), at(9, 0), None, Some(0), zone).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn incomplete_or_negative_entries_are_rejected() {
        for (stop, duration) in [(None, None), (None, Some(-1))] {
            let err = resolve_interval(day(), at(9, 0), stop, duration, Tz::UTC).unwrap_err();
            assert_eq!(err.status, StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn running_logs_report_elapsed_time() {
        let started = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let model = TimeLogModel {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            task_id: None,
            log_date: day(),
            started_at: started.into(),
            stopped_at: None,
            duration_seconds: None,
            notes: None,
            created_by: Uuid::new_v4(),
            created_at: started.into(),
            updated_at: started.into(),
        };
        let info = TimeLogInfo::at(model, started + Duration::seconds(3_725));
        assert_eq!(info.status, TimeLogStatus::Running);
        assert_eq!(info.duration_seconds, 3_725);
        assert_eq!(info.duration_formatted, "01:02:05");
    }
}
