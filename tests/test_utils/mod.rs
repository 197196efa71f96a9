//! Test utilities shared by the integration tests.
//!
//! In-memory SQLite with every migration applied, signed access tokens and a
//! small request helper for driving the full router.

#![allow(dead_code)]

use anyhow::Result;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use hexoteams::auth::{Claims, issue_token};
use hexoteams::config::AppConfig;
use hexoteams::server::{AppState, create_app};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_SECRET: &str = "integration-test-secret";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Local-profile config that accepts tokens from [`bearer`].
pub fn test_config() -> AppConfig {
    AppConfig {
        auth_jwt_secret: Some(TEST_SECRET.to_string()),
        redis_url: None,
        ..Default::default()
    }
}

/// Full router over a fresh database.
pub async fn test_app(config: AppConfig) -> Result<Router> {
    let state = AppState::standalone(config, setup_test_db().await?)?;
    Ok(create_app(state))
}

/// `Authorization` header value for `user_id`.
pub fn bearer(user_id: Uuid) -> String {
    let claims = Claims::new(
        user_id,
        Some(format!("{}@example.com", user_id.simple())),
        chrono::Duration::hours(1),
    );
    format!("Bearer {}", issue_token(TEST_SECRET, &claims).unwrap())
}

/// Sends `request` and returns the status with the body parsed as JSON
/// (`Null` for empty bodies).
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

pub fn json_request(method: &str, uri: &str, user: Uuid, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, bearer(user))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn empty_request(method: &str, uri: &str, user: Uuid) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, bearer(user))
        .body(Body::empty())
        .unwrap()
}

/// Multipart request carrying one file part named `file`.
pub fn upload_request(uri: &str, user: Uuid, filename: &str, data: &[u8]) -> Request<Body> {
    let boundary = "hexoteams-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, bearer(user))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}
