//! # API Handlers
//!
//! This module contains all the HTTP endpoint handlers for the HexoTeams API.

use axum::{extract::State, response::Json};

use crate::db;
use crate::error::{ApiError, ErrorCode};
use crate::models::{HealthStatus, ServiceInfo};
use crate::server::AppState;

pub mod attachments;
pub mod files;
pub mod inbox;
pub mod links;
pub mod misc;
pub mod organizations;
pub mod profiles;
pub mod projects;
pub mod tasks;
pub mod teams;
pub mod time_logs;
pub mod types;
pub mod ws;

/// Root handler that returns a greeting
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service greeting", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo::for_app(&state.config.app_name))
}

/// Liveness check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is running", body = HealthStatus)
    ),
    tag = "root"
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus::healthy(&state.config.app_name))
}

/// Readiness check: fails with 503 while the database is unreachable
#[utoipa::path(
    get,
    path = "/health/ready",
    responses(
        (status = 200, description = "Database reachable", body = HealthStatus),
        (status = 503, description = "Database unreachable", body = ApiError)
    ),
    tag = "root"
)]
pub async fn ready(State(state): State<AppState>) -> Result<Json<HealthStatus>, ApiError> {
    db::health_check(&state.db).await.map_err(|err| {
        tracing::warn!(error = %err, "Readiness check failed");
        ApiError::new(ErrorCode::Unavailable, "Database service unavailable").with_retry_after(5)
    })?;
    Ok(Json(HealthStatus::ready(&state.config.app_name)))
}

#[cfg(test)]
mod tests;
