//! # Inbox WebSocket
//!
//! Browsers cannot set headers on websocket upgrades, so the access token
//! travels in the query string. Authentication failures are reported with
//! application close codes after the upgrade: 4001 for token problems and
//! 4003 for callers outside the organization.

use axum::{
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket},
    },
    response::Response,
};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::auth::verify_token;
use crate::realtime::NotificationHub;
use crate::repositories::OrganizationRepository;
use crate::server::AppState;

pub const CLOSE_UNAUTHORIZED: u16 = 4001;
pub const CLOSE_FORBIDDEN: u16 = 4003;

#[derive(Debug, Deserialize, IntoParams)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Why a session was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    pub code: u16,
    pub reason: &'static str,
}

async fn authorize(
    state: &AppState,
    org_id: Uuid,
    token: Option<&str>,
) -> Result<Uuid, Rejection> {
    let token = token.filter(|token| !token.is_empty()).ok_or(Rejection {
        code: CLOSE_UNAUTHORIZED,
        reason: "Token required",
    })?;
    let user = verify_token(&state.config, token).map_err(|_| Rejection {
        code: CLOSE_UNAUTHORIZED,
        reason: "Invalid token",
    })?;

    let access_denied = Rejection {
        code: CLOSE_FORBIDDEN,
        reason: "Access denied",
    };
    match OrganizationRepository::new(&state.db)
        .membership(org_id, user.id)
        .await
    {
        Ok(Some(_)) => Ok(user.id),
        Ok(None) => Err(access_denied),
        Err(err) => {
            tracing::error!(org_id = %org_id, error = %err, "Membership lookup failed for websocket");
            Err(access_denied)
        }
    }
}

/// Streams inbox events for the caller in `org_id`
#[utoipa::path(
    get,
    path = "/api/v1/ws/inbox/{org_id}",
    params(("org_id" = String, Path, description = "Organization id"), WsQuery),
    responses((status = 101, description = "Switching to the websocket protocol")),
    tag = "inbox"
)]
pub async fn inbox_socket(
    State(state): State<AppState>,
    Path(org_id): Path<Uuid>,
    Query(query): Query<WsQuery>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let outcome = authorize(&state, org_id, query.token.as_deref()).await;
    let hub = state.hub.clone();

    upgrade.on_upgrade(move |socket| async move {
        match outcome {
            Ok(user_id) => forward_events(socket, hub, user_id, org_id).await,
            Err(rejection) => close(socket, rejection).await,
        }
    })
}

async fn close(mut socket: WebSocket, rejection: Rejection) {
    tracing::debug!(code = rejection.code, reason = rejection.reason, "Refusing inbox websocket");
    let frame = CloseFrame {
        code: rejection.code,
        reason: rejection.reason.into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

async fn forward_events(mut socket: WebSocket, hub: NotificationHub, user_id: Uuid, org_id: Uuid) {
    let mut events = hub.subscribe();
    tracing::info!(user_id = %user_id, org_id = %org_id, "Inbox websocket connected");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) if event.user_id == user_id && event.org_id == org_id => {
                    let text = event.message.to_string();
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(user_id = %user_id, skipped, "Inbox websocket lagged behind");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::info!(user_id = %user_id, org_id = %org_id, "Inbox websocket disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Claims, issue_token};
    use crate::config::AppConfig;
    use crate::test_support::{seed_org, setup_db};

    const SECRET: &str = "ws-secret";

    async fn state() -> AppState {
        let config = AppConfig {
            auth_jwt_secret: Some(SECRET.to_string()),
            ..Default::default()
        };
        AppState::standalone(config, setup_db().await).unwrap()
    }

    fn token_for(user_id: Uuid) -> String {
        issue_token(SECRET, &Claims::new(user_id, None, chrono::Duration::minutes(5))).unwrap()
    }

    #[tokio::test]
    async fn token_problems_close_with_4001() {
        let state = state().await;
        let org_id = Uuid::new_v4();

        let missing = authorize(&state, org_id, None).await.unwrap_err();
        assert_eq!(missing.code, CLOSE_UNAUTHORIZED);
        assert_eq!(missing.reason, "Token required");

        let empty = authorize(&state, org_id, Some("")).await.unwrap_err();
        assert_eq!(empty.code, CLOSE_UNAUTHORIZED);

        let claims = Claims::new(Uuid::new_v4(), None, chrono::Duration::minutes(5));
        let forged = issue_token("other-secret", &claims).unwrap();
        let invalid = authorize(&state, org_id, Some(&forged)).await.unwrap_err();
        assert_eq!(invalid.code, CLOSE_UNAUTHORIZED);
        assert_eq!(invalid.reason, "Invalid token");
    }

    #[tokio::test]
    async fn outsiders_close_with_4003_and_members_connect() {
        let state = state().await;
        let owner = Uuid::new_v4();
        let org = seed_org(&state.db, "Acme", owner).await;

        let outsider = authorize(&state, org.id, Some(&token_for(Uuid::new_v4())))
            .await
            .unwrap_err();
        assert_eq!(outsider.code, CLOSE_FORBIDDEN);
        assert_eq!(outsider.reason, "Access denied");

        let member = authorize(&state, org.id, Some(&token_for(owner))).await;
        assert_eq!(member, Ok(owner));
    }
}
