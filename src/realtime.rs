//! # Realtime Fan-out
//!
//! Inbox events are published to Redis by whichever process created them
//! (usually the worker). Every API instance runs one subscriber that relays
//! them into an in-process broadcast channel, from which each websocket
//! session picks the events addressed to its user and organization.

use std::time::Duration;

use futures::StreamExt;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::notifications::INBOX_CHANNEL;

const HUB_CAPACITY: usize = 256;
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// An event addressed to one user's sessions in one organization.
#[derive(Debug, Clone, PartialEq)]
pub struct InboxEvent {
    pub user_id: Uuid,
    pub org_id: Uuid,
    /// Client-facing message: `{"type": ..., ...payload}`
    pub message: Value,
}

/// In-process broadcast of inbox events.
#[derive(Clone)]
pub struct NotificationHub {
    sender: broadcast::Sender<InboxEvent>,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(HUB_CAPACITY)
    }
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InboxEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of sessions that received the event.
    pub fn deliver(&self, event: InboxEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}

/// Parses a pub/sub payload. Events without a valid `user_id`, `org_id`
/// or `type` are dropped.
pub fn parse_event(raw: &str) -> Option<InboxEvent> {
    let event: Value = serde_json::from_str(raw).ok()?;
    let user_id = event.get("user_id")?.as_str()?.parse().ok()?;
    let org_id = event.get("org_id")?.as_str()?.parse().ok()?;
    let kind = event.get("type")?.as_str().filter(|kind| !kind.is_empty())?;

    let mut message = Map::new();
    message.insert("type".into(), Value::String(kind.to_string()));
    if let Some(Value::Object(payload)) = event.get("payload") {
        for (key, value) in payload {
            message.insert(key.clone(), value.clone());
        }
    }

    Some(InboxEvent {
        user_id,
        org_id,
        message: Value::Object(message),
    })
}

/// Relays `notifications:inbox` into `hub` until `shutdown` fires,
/// resubscribing after connection loss.
pub async fn run_subscriber(redis_url: String, hub: NotificationHub, shutdown: CancellationToken) {
    info!(channel = INBOX_CHANNEL, "Starting notification subscriber");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            result = relay(&redis_url, &hub) => {
                if let Err(err) = result {
                    warn!(error = %err, "Notification subscriber lost its connection");
                }
            }
        }
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
        }
    }
    info!("Notification subscriber stopped");
}

async fn relay(redis_url: &str, hub: &NotificationHub) -> Result<(), redis::RedisError> {
    let client = redis::Client::open(redis_url)?;
    let mut pubsub = client.get_async_connection().await?.into_pubsub();
    pubsub.subscribe(INBOX_CHANNEL).await?;

    let mut messages = pubsub.on_message();
    while let Some(msg) = messages.next().await {
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "Unreadable notification payload");
                continue;
            }
        };
        match parse_event(&payload) {
            Some(event) => {
                let receivers = hub.deliver(event);
                debug!(receivers, "Relayed inbox event");
            }
            None => warn!("Dropping notification event with missing fields"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_event_flattens_payload_under_type() {
        let user_id = Uuid::new_v4();
        let org_id = Uuid::new_v4();
        let raw = json!({
            "user_id": user_id,
            "org_id": org_id,
            "type": "inbox_new",
            "payload": {"data": {"title": "Hi"}, "unread_count": 3}
        })
        .to_string();

        let event = parse_event(&raw).unwrap();
        assert_eq!(event.user_id, user_id);
        assert_eq!(event.org_id, org_id);
        assert_eq!(
            event.message,
            json!({"type": "inbox_new", "data": {"title": "Hi"}, "unread_count": 3})
        );
    }

    #[test]
    fn parse_event_rejects_incomplete_events() {
        let org_id = Uuid::new_v4().to_string();
        assert!(parse_event(&json!({"org_id": org_id, "type": "inbox_new"}).to_string()).is_none());
        assert!(
            parse_event(&json!({"user_id": "nope", "org_id": org_id, "type": "x"}).to_string())
                .is_none()
        );
        assert!(parse_event("not json").is_none());
    }

    #[tokio::test]
    async fn relay_reports_unreachable_redis() {
        let hub = NotificationHub::new(4);
        // Port 1 is never a redis server.
        assert!(relay("redis://127.0.0.1:1/", &hub).await.is_err());
        assert!(relay("not a url", &hub).await.is_err());
    }

    #[tokio::test]
    async fn hub_reaches_every_subscriber() {
        let hub = NotificationHub::new(4);
        assert_eq!(
            hub.deliver(InboxEvent {
                user_id: Uuid::nil(),
                org_id: Uuid::nil(),
                message: json!({}),
            }),
            0
        );

        let mut first = hub.subscribe();
        let mut second = hub.subscribe();
        let event = InboxEvent {
            user_id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            message: json!({"type": "inbox_new"}),
        };
        assert_eq!(hub.deliver(event.clone()), 2);
        assert_eq!(first.recv().await.unwrap(), event);
        assert_eq!(second.recv().await.unwrap(), event);
    }
}
