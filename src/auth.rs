//! # Authentication and Authorization
//!
//! Access tokens are HS256 JWTs issued by the identity provider; `sub`
//! carries the user id. The middleware verifies the bearer token and stores
//! a [`CurrentUser`] in the request extensions. Organization and project
//! role checks live here too.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{ApiError, forbidden, unauthorized};
use crate::models::organization_member::{Model as MemberModel, OrganizationRole};
use crate::models::project_member::ProjectRole;
use crate::repositories::{OrganizationRepository, ProjectRepository};
use crate::server::AppState;

const NO_ACTIVE_ORGANIZATION: &str = "User does not have an active organization";
const ORG_ADMIN_REQUIRED: &str = "Only organization owners and admins can perform this action";
const ORG_OWNER_REQUIRED: &str = "Only the organization owner can perform this action";
const NOT_ORG_MEMBER: &str = "User is not a member of this organization";
const PROJECT_MANAGER_REQUIRED: &str = "Only project owners and admins can perform this action";
const NO_PROJECT_ACCESS: &str = "User does not have access to this project";

/// Token claims accepted by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

impl Claims {
    pub fn new(user_id: Uuid, email: Option<String>, ttl: chrono::Duration) -> Self {
        Self {
            sub: user_id,
            email,
            exp: (Utc::now() + ttl).timestamp(),
            aud: None,
        }
    }
}

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: Uuid,
    pub email: Option<String>,
}

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.config)
    }
}

/// Signs `claims` with the shared secret.
pub fn issue_token(secret: &str, claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Verifies a token and returns the caller it identifies.
pub fn verify_token(config: &AppConfig, token: &str) -> Result<CurrentUser, ApiError> {
    let Some(secret) = config.auth_jwt_secret.as_deref() else {
        tracing::warn!("AUTH_JWT_SECRET is not configured, rejecting token");
        return Err(unauthorized(Some("Authentication is not configured")));
    };

    let mut validation = Validation::new(Algorithm::HS256);
    match config.auth_jwt_audience.as_deref() {
        Some(audience) => {
            validation.set_audience(&[audience]);
            // jsonwebtoken skips the audience check when the claim is absent.
            validation.set_required_spec_claims(&["exp", "aud"]);
        }
        None => validation.validate_aud = false,
    }

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|err| {
        tracing::debug!(error = %err, "Rejected access token");
        unauthorized(Some("Invalid or expired token"))
    })?;

    Ok(CurrentUser {
        id: data.claims.sub,
        email: data.claims.email,
    })
}

/// Authentication middleware that validates bearer tokens
pub async fn auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers())?;
    let user = verify_token(&config, token)?;
    tracing::debug!(user_id = %user.id, "Authenticated request");

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(AUTHORIZATION)
        .ok_or_else(|| unauthorized(Some("Missing Authorization header")))?
        .to_str()
        .map_err(|_| unauthorized(Some("Invalid Authorization header")))?
        .strip_prefix("Bearer ")
        .filter(|token| !token.is_empty())
        .ok_or_else(|| unauthorized(Some("Authorization header must use Bearer scheme")))
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| unauthorized(None))
    }
}

/// Caller on routes that also serve anonymous requests. A missing or
/// invalid bearer token yields `None` rather than a rejection.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<CurrentUser>);

impl<S> FromRequestParts<S> for MaybeUser
where
    Arc<AppConfig>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = Arc::<AppConfig>::from_ref(state);
        let user = extract_bearer_token(&parts.headers)
            .and_then(|token| verify_token(&config, token))
            .ok();
        Ok(Self(user))
    }
}

/// The caller together with their active organization membership.
#[derive(Debug, Clone)]
pub struct ActiveOrganization {
    pub user: CurrentUser,
    pub org_id: Uuid,
    pub role: OrganizationRole,
}

impl ActiveOrganization {
    pub fn is_admin(&self) -> bool {
        matches!(self.role, OrganizationRole::Owner | OrganizationRole::Admin)
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(forbidden(Some(ORG_ADMIN_REQUIRED)))
        }
    }
}

impl FromRequestParts<AppState> for ActiveOrganization {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        let membership = OrganizationRepository::new(&state.db)
            .active_membership(user.id)
            .await?
            .ok_or_else(|| forbidden(Some(NO_ACTIVE_ORGANIZATION)))?;

        Ok(Self {
            user,
            org_id: membership.org_id,
            role: membership.role,
        })
    }
}

pub async fn require_org_member(
    db: &DatabaseConnection,
    org_id: Uuid,
    user_id: Uuid,
) -> Result<MemberModel, ApiError> {
    OrganizationRepository::new(db)
        .membership(org_id, user_id)
        .await?
        .ok_or_else(|| forbidden(Some(NOT_ORG_MEMBER)))
}

pub async fn require_org_admin(
    db: &DatabaseConnection,
    org_id: Uuid,
    user_id: Uuid,
) -> Result<MemberModel, ApiError> {
    let member = require_org_member(db, org_id, user_id).await?;
    match member.role {
        OrganizationRole::Owner | OrganizationRole::Admin => Ok(member),
        OrganizationRole::Member => Err(forbidden(Some(ORG_ADMIN_REQUIRED))),
    }
}

pub async fn require_org_owner(
    db: &DatabaseConnection,
    org_id: Uuid,
    user_id: Uuid,
) -> Result<MemberModel, ApiError> {
    let member = require_org_member(db, org_id, user_id).await?;
    match member.role {
        OrganizationRole::Owner => Ok(member),
        _ => Err(forbidden(Some(ORG_OWNER_REQUIRED))),
    }
}

/// Project owners and project admins.
pub async fn require_project_manager(
    db: &DatabaseConnection,
    project_id: Uuid,
    user_id: Uuid,
) -> Result<(), ApiError> {
    let membership = ProjectRepository::new(db)
        .membership(project_id, user_id)
        .await?;
    match membership.map(|member| member.role) {
        Some(ProjectRole::Owner | ProjectRole::Admin) => Ok(()),
        _ => Err(forbidden(Some(PROJECT_MANAGER_REQUIRED))),
    }
}

/// Project members, plus admins and owners of the organization.
pub async fn require_project_access(
    db: &DatabaseConnection,
    project_id: Uuid,
    org: &ActiveOrganization,
) -> Result<(), ApiError> {
    if org.is_admin() {
        return Ok(());
    }
    ProjectRepository::new(db)
        .membership(project_id, org.user.id)
        .await?
        .map(|_| ())
        .ok_or_else(|| forbidden(Some(NO_PROJECT_ACCESS)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode},
        routing::get,
    };
    use tower::ServiceExt;

    const SECRET: &str = "test-secret";

    fn create_test_config() -> Arc<AppConfig> {
        Arc::new(AppConfig {
            auth_jwt_secret: Some(SECRET.to_string()),
            ..Default::default()
        })
    }

    fn token_for(user_id: Uuid, ttl: chrono::Duration) -> String {
        issue_token(
            SECRET,
            &Claims::new(user_id, Some("ada@example.com".into()), ttl),
        )
        .unwrap()
    }

    async fn run_middleware(config: Arc<AppConfig>, request: Request<Body>) -> Response {
        async fn handler(user: CurrentUser) -> String {
            user.id.to_string()
        }

        Router::new()
            .route("/test", get(handler))
            .layer(axum::middleware::from_fn_with_state(config, auth_middleware))
            .oneshot(request)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn optional_auth_treats_bad_tokens_as_anonymous() {
        async fn handler(MaybeUser(user): MaybeUser) -> String {
            user.map(|user| user.id.to_string()).unwrap_or_default()
        }
        let app = Router::new()
            .route("/maybe", get(handler))
            .with_state(create_test_config());
        let user_id = Uuid::new_v4();

        for (header, expected) in [
            (Some(format!("Bearer {}", token_for(user_id, chrono::Duration::hours(1)))), user_id.to_string()),
            (Some("Bearer garbage".to_string()), String::new()),
            (None, String::new()),
        ] {
            let mut request = Request::builder().uri("/maybe");
            if let Some(header) = header {
                request = request.header("Authorization", header);
            }
            let response = app
                .clone()
                .oneshot(request.body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            assert_eq!(String::from_utf8(body.to_vec()).unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn missing_auth_header_returns_401() {
        let request = Request::builder().uri("/test").body(Body::empty()).unwrap();
        let response = run_middleware(create_test_config(), request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn invalid_auth_scheme_returns_401() {
        let request = Request::builder()
            .uri("/test")
            .header("Authorization", "Basic dGVzdDoxMjM=")
            .body(Body::empty())
            .unwrap();
        let response = run_middleware(create_test_config(), request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn expired_or_foreign_tokens_return_401() {
        let expired = token_for(Uuid::new_v4(), chrono::Duration::hours(-2));
        let foreign = issue_token(
            "other-secret",
            &Claims::new(Uuid::new_v4(), None, chrono::Duration::hours(1)),
        )
        .unwrap();

        for token in [expired, foreign, "garbage".to_string()] {
            let request = Request::builder()
                .uri("/test")
                .header("Authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap();
            let response = run_middleware(create_test_config(), request).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn valid_token_exposes_current_user() {
        let user_id = Uuid::new_v4();
        let request = Request::builder()
            .uri("/test")
            .header(
                "Authorization",
                format!("Bearer {}", token_for(user_id, chrono::Duration::hours(1))),
            )
            .body(Body::empty())
            .unwrap();

        let response = run_middleware(create_test_config(), request).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body, user_id.to_string());
    }

    #[test]
    fn audience_is_enforced_when_configured() {
        let config = AppConfig {
            auth_jwt_secret: Some(SECRET.to_string()),
            auth_jwt_audience: Some("hexoteams".to_string()),
            ..Default::default()
        };
        let mut claims = Claims::new(Uuid::new_v4(), None, chrono::Duration::hours(1));
        let without_audience = issue_token(SECRET, &claims).unwrap();
        assert!(verify_token(&config, &without_audience).is_err());

        claims.aud = Some("hexoteams".to_string());
        let with_audience = issue_token(SECRET, &claims).unwrap();
        assert_eq!(verify_token(&config, &with_audience).unwrap().id, claims.sub);
    }

    #[test]
    fn missing_secret_rejects_everything() {
        let token = token_for(Uuid::new_v4(), chrono::Duration::hours(1));
        assert!(verify_token(&AppConfig::default(), &token).is_err());
    }
}
