//! # Error Handling
//!
//! Every failure leaves the API as an `application/problem+json` body:
//! `{code, message, details?, retry_after, trace_id}`. Handlers build errors
//! through the helpers at the bottom of this module or let `?` convert
//! repository, storage and database errors.

use axum::{
    extract::{multipart::MultipartError, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{repositories::RepositoryError, storage::StorageError, telemetry};

/// Seconds a client should wait after a dependency outage.
const DEPENDENCY_RETRY_AFTER_SECS: u64 = 5;

/// Machine-readable error codes and the status each one maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationFailed,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    PayloadTooLarge,
    Internal,
    Storage,
    Unavailable,
}

impl ErrorCode {
    pub fn status(self) -> StatusCode {
        match self {
            Self::ValidationFailed => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage => StatusCode::BAD_GATEWAY,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::Internal => "INTERNAL_SERVER_ERROR",
            Self::Storage => "STORAGE_ERROR",
            Self::Unavailable => "SERVICE_UNAVAILABLE",
        }
    }
}

/// Problem document returned for every failed request
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    /// One of the `ErrorCode` strings, e.g. `NOT_FOUND`
    pub code: Box<str>,
    pub message: Box<str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Seconds to wait before retrying, set for dependency outages
    pub retry_after: Option<u64>,
    /// Request trace id, echoed in the `X-Trace-Id` header
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status(),
            code: code.as_str().into(),
            message: message.into().into_boxed_str(),
            details: None,
            retry_after: None,
            trace_id: Some(request_trace_id().into_boxed_str()),
        }
    }

    pub fn with_details(mut self, details: impl Into<serde_json::Value>) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }
}

/// Trace id of the request being served; errors raised outside a request
/// (background tasks, tests) get a fresh one so logs can still be joined.
fn request_trace_id() -> String {
    telemetry::current_trace_id().unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string())
}

/// True for unique-constraint violations on Postgres and SQLite.
pub(crate) fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::{DbErr, RuntimeErr};

    const PG_UNIQUE_VIOLATION: &str = "23505";
    const SQLITE_CONSTRAINT_CODES: [&str; 2] = ["1555", "2067"];

    let (DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
    | DbErr::Exec(RuntimeErr::SqlxError(sqlx_err))) = error
    else {
        return false;
    };
    let Some(db_error) = sqlx_err.as_database_error() else {
        return false;
    };

    db_error.is_unique_violation()
        || db_error.code().is_some_and(|code| {
            let code: &str = &code;
            code == PG_UNIQUE_VIOLATION || SQLITE_CONSTRAINT_CODES.contains(&code)
        })
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        if let Some(seconds) = self.retry_after {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!(error = ?error, "Unhandled internal error");
        Self::new(ErrorCode::Internal, "An internal error occurred")
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err.body_text()),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err.body_text()),
            JsonRejection::MissingJsonContentType(_) => {
                "Request body must be sent as application/json".to_string()
            }
            _ => "Invalid request body".to_string(),
        };
        bad_request(&message)
    }
}

impl From<MultipartError> for ApiError {
    fn from(error: MultipartError) -> Self {
        if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return Self::new(ErrorCode::PayloadTooLarge, "Uploaded file is too large");
        }
        bad_request(&format!("Invalid multipart body: {}", error.body_text()))
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        if is_unique_violation(&error) {
            tracing::debug!(error = %error, "Unique constraint violated");
            return conflict("Resource already exists");
        }

        match error {
            sea_orm::DbErr::RecordNotFound(record) => not_found(&format!("{record} not found")),
            sea_orm::DbErr::Conn(err) => {
                tracing::error!(error = %err, "Database unreachable");
                Self::new(ErrorCode::Unavailable, "Database service unavailable")
                    .with_retry_after(DEPENDENCY_RETRY_AFTER_SECS)
            }
            other => {
                tracing::error!(error = %other, "Database operation failed");
                Self::new(ErrorCode::Internal, "Database error occurred")
            }
        }
    }
}

impl From<RepositoryError> for ApiError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::NotFound(what) => not_found(&what),
            RepositoryError::Conflict(message) => conflict(&message),
            RepositoryError::Database(db_err) => db_err.into(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::NotFound { key } => not_found(&format!("Object {key} not found")),
            StorageError::InvalidExtension { .. } | StorageError::FileTooLarge { .. } => {
                bad_request(&error.to_string())
            }
            StorageError::AccessDenied { .. } | StorageError::ProvisioningFailed { .. } => {
                tracing::error!(error = %error, "Object storage is not available");
                Self::new(ErrorCode::Unavailable, "Object storage is not available")
                    .with_retry_after(DEPENDENCY_RETRY_AFTER_SECS)
            }
            other => {
                tracing::error!(error = %other, "Object storage request failed");
                Self::new(ErrorCode::Storage, "Object storage request failed")
            }
        }
    }
}

/// 401; `None` uses a generic message.
pub fn unauthorized(message: Option<&str>) -> ApiError {
    ApiError::new(
        ErrorCode::Unauthorized,
        message.unwrap_or("Authentication required"),
    )
}

/// 403; `None` uses a generic message.
pub fn forbidden(message: Option<&str>) -> ApiError {
    ApiError::new(
        ErrorCode::Forbidden,
        message.unwrap_or("Insufficient permissions"),
    )
}

pub fn not_found(message: &str) -> ApiError {
    ApiError::new(ErrorCode::NotFound, message)
}

pub fn conflict(message: &str) -> ApiError {
    ApiError::new(ErrorCode::Conflict, message)
}

pub fn bad_request(message: &str) -> ApiError {
    ApiError::new(ErrorCode::ValidationFailed, message)
}

/// 400 carrying per-field messages in `details`.
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    let error = bad_request(message);
    if field_errors.is_null() {
        error
    } else {
        error.with_details(field_errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn body_of(error: ApiError) -> (StatusCode, HeaderMap, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn renders_problem_json() {
        let (status, headers, body) =
            body_of(validation_error("Invalid timezone", json!({"timezone": "unknown"}))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(headers[header::CONTENT_TYPE], "application/problem+json");
        assert_eq!(body["code"], "VALIDATION_FAILED");
        assert_eq!(body["message"], "Invalid timezone");
        assert_eq!(body["details"], json!({"timezone": "unknown"}));
        assert_eq!(body["retry_after"], serde_json::Value::Null);
        assert!(body["trace_id"].as_str().is_some_and(|id| !id.is_empty()));
    }

    #[tokio::test]
    async fn dependency_outages_ask_clients_to_retry() {
        let error: ApiError = StorageError::ProvisioningFailed {
            bucket: "team-management".into(),
            attempts: 10,
            reason: "connection refused".into(),
        }
        .into();
        let (status, headers, body) = body_of(error).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(headers[header::RETRY_AFTER], "5");
        assert_eq!(body["retry_after"], 5);
    }

    #[test]
    fn every_code_maps_to_its_status() {
        let cases = [
            (ErrorCode::ValidationFailed, 400),
            (ErrorCode::Unauthorized, 401),
            (ErrorCode::Forbidden, 403),
            (ErrorCode::NotFound, 404),
            (ErrorCode::Conflict, 409),
            (ErrorCode::PayloadTooLarge, 413),
            (ErrorCode::Internal, 500),
            (ErrorCode::Storage, 502),
            (ErrorCode::Unavailable, 503),
        ];
        for (code, status) in cases {
            let error = ApiError::new(code, "x");
            assert_eq!(error.status.as_u16(), status, "{code:?}");
            assert_eq!(&*error.code, code.as_str());
        }
    }

    #[test]
    fn anyhow_errors_do_not_leak() {
        let error: ApiError = anyhow::anyhow!("password=hunter2").into();
        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(&*error.message, "An internal error occurred");
    }

    #[test]
    fn repository_and_database_errors() {
        let error: ApiError = RepositoryError::NotFound("Project not found".into()).into();
        assert_eq!(error.status, StatusCode::NOT_FOUND);
        assert_eq!(&*error.message, "Project not found");

        let error: ApiError = RepositoryError::Conflict("Organization name already taken".into()).into();
        assert_eq!(error.status, StatusCode::CONFLICT);

        let error: ApiError = sea_orm::DbErr::RecordNotFound("Task".into()).into();
        assert_eq!(&*error.message, "Task not found");
    }

    #[test]
    fn storage_errors() {
        let error: ApiError = StorageError::InvalidExtension {
            extension: "exe".into(),
        }
        .into();
        assert_eq!(error.status, StatusCode::BAD_REQUEST);

        let error: ApiError = StorageError::UnexpectedStatus {
            operation: "put_object",
            status: 500,
            body: String::new(),
        }
        .into();
        assert_eq!(error.status, StatusCode::BAD_GATEWAY);
        assert_eq!(&*error.code, "STORAGE_ERROR");
    }

    #[test]
    fn helper_messages() {
        assert_eq!(&*unauthorized(None).message, "Authentication required");
        assert_eq!(
            &*forbidden(Some("Only the author can change this comment")).message,
            "Only the author can change this comment"
        );
        assert!(bad_request("nope").details.is_none());
    }
}
