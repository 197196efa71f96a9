//! # Inbox Notifications
//!
//! Turns domain events (invitations, assignments, completions, project
//! membership) into inbox rows, realtime events and notification emails,
//! honoring each recipient's preferences.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use sea_orm::DatabaseConnection;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::jobs::{
    JobTask, OrganizationInvitationArgs, ProjectMemberAddedArgs, SendEmailArgs, TaskAssignedArgs,
    TaskCompletedArgs, TaskCompletedNoticeArgs, TaskUnassignedArgs,
};
use crate::models::inbox::{InboxEventType, Model as InboxModel};
use crate::queue::{QueueError, TaskDispatcher};
use crate::repositories::inbox::NewInboxEntry;
use crate::repositories::{InboxRepository, ProfileRepository, ProjectRepository, RepositoryError};

/// Redis channel carrying inbox events to every API instance.
pub const INBOX_CHANNEL: &str = "notifications:inbox";

pub const INBOX_EMAIL_TEMPLATE: &str = "inbox_notification.html";

/// Fan-out transport for realtime events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), QueueError>;
}

/// Publishes over Redis pub/sub.
#[derive(Clone)]
pub struct RedisPublisher {
    conn: ConnectionManager,
}

impl RedisPublisher {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl EventPublisher for RedisPublisher {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(channel, payload).await?;
        Ok(())
    }
}

/// Delivers inbox notifications.
#[derive(Clone)]
pub struct Notifier {
    publisher: Option<Arc<dyn EventPublisher>>,
    dispatcher: TaskDispatcher,
    frontend_url: String,
}

impl Notifier {
    pub fn new(
        publisher: Option<Arc<dyn EventPublisher>>,
        dispatcher: TaskDispatcher,
        frontend_url: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            dispatcher,
            frontend_url: frontend_url.into(),
        }
    }

    /// Stores the inbox row, then pushes it to the recipient's open sessions
    /// and mailbox according to their preferences. Delivery failures after
    /// the row is stored are logged, never returned.
    pub async fn send_inbox_notification(
        &self,
        db: &DatabaseConnection,
        entry: NewInboxEntry,
    ) -> Result<InboxModel, RepositoryError> {
        let inbox = InboxRepository::new(db);
        let row = inbox.create(entry).await?;
        counter!("inbox_notifications_total", "event_type" => row.event_type.as_str())
            .increment(1);

        let Some(profile) = ProfileRepository::new(db).find(row.user_id).await? else {
            debug!(user_id = %row.user_id, "Recipient has no profile, skipping delivery");
            return Ok(row);
        };

        if profile.browser_notifications {
            let unread_count = inbox.unread_count(row.user_id, row.org_id).await?;
            self.publish_inbox_event(&row, unread_count).await;
        }

        if profile.email_notifications
            && let Some(email) = profile.email.clone()
        {
            self.dispatcher
                .dispatch(JobTask::SendEmail(self.inbox_email(&row, email)))
                .await;
        }

        Ok(row)
    }

    async fn publish_inbox_event(&self, row: &InboxModel, unread_count: u64) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        let event = json!({
            "user_id": row.user_id,
            "org_id": row.org_id,
            "type": "inbox_new",
            "payload": {
                "data": row,
                "unread_count": unread_count,
            },
        });
        if let Err(err) = publisher.publish(INBOX_CHANNEL, event.to_string()).await {
            warn!(inbox_id = %row.id, error = %err, "Failed to publish inbox event");
        }
    }

    fn inbox_email(&self, row: &InboxModel, to_email: String) -> SendEmailArgs {
        let mut template_vars = Map::new();
        template_vars.insert("title".into(), Value::String(row.title.clone()));
        template_vars.insert("message".into(), Value::String(row.message.clone()));
        template_vars.insert(
            "event_type".into(),
            Value::String(row.event_type.as_str().to_string()),
        );
        template_vars.insert(
            "frontend_url".into(),
            Value::String(self.frontend_url.clone()),
        );

        SendEmailArgs {
            to_email,
            subject: format!("[Notification] {}", row.title),
            template: INBOX_EMAIL_TEMPLATE.to_string(),
            text_content: format!("{}\n\n{}", row.title, row.message),
            token: None,
            template_vars,
        }
    }

    pub async fn organization_invitation(
        &self,
        db: &DatabaseConnection,
        args: &OrganizationInvitationArgs,
    ) -> Result<(), RepositoryError> {
        self.send_inbox_notification(
            db,
            NewInboxEntry {
                user_id: args.user_id,
                org_id: args.org_id,
                user_by: args.inviter_id,
                event_type: InboxEventType::OrganizationInvitation,
                title: format!("Invitation to {}", args.org_name),
                message: format!(
                    "{} has invited you to join {}",
                    args.inviter_name, args.org_name
                ),
                reference_id: Some(args.org_id),
            },
        )
        .await?;
        Ok(())
    }

    pub async fn task_assigned(
        &self,
        db: &DatabaseConnection,
        args: &TaskAssignedArgs,
    ) -> Result<(), RepositoryError> {
        self.send_inbox_notification(
            db,
            NewInboxEntry {
                user_id: args.user_id,
                org_id: args.org_id,
                user_by: args.assigned_by_id,
                event_type: InboxEventType::TaskAssigned,
                title: format!("Task Assigned: {}", args.task_title),
                message: format!(
                    "{} assigned you a task '{}' in project {}",
                    args.assigned_by_name, args.task_title, args.project_name
                ),
                reference_id: Some(args.task_id),
            },
        )
        .await?;
        Ok(())
    }

    pub async fn task_unassigned(
        &self,
        db: &DatabaseConnection,
        args: &TaskUnassignedArgs,
    ) -> Result<(), RepositoryError> {
        self.send_inbox_notification(
            db,
            NewInboxEntry {
                user_id: args.user_id,
                org_id: args.org_id,
                user_by: args.unassigned_by_id,
                event_type: InboxEventType::TaskUnassigned,
                title: format!("Task Unassigned: {}", args.task_title),
                message: format!(
                    "{} unassigned you from task '{}' in project {}",
                    args.unassigned_by_name, args.task_title, args.project_name
                ),
                reference_id: Some(args.task_id),
            },
        )
        .await?;
        Ok(())
    }

    /// Queues one `task_completed_notice` per project member except the one
    /// who completed the task, so a failed delivery is retried for its
    /// recipient alone. Returns the number of queued notices.
    pub async fn task_completed(
        &self,
        db: &DatabaseConnection,
        args: &TaskCompletedArgs,
    ) -> Result<usize, RepositoryError> {
        let recipients: Vec<Uuid> = ProjectRepository::new(db)
            .members(args.project_id)
            .await?
            .into_iter()
            .map(|member| member.user_id)
            .filter(|user_id| *user_id != args.completed_by_id)
            .collect();

        let mut queued = 0;
        for user_id in recipients {
            let notice = TaskCompletedNoticeArgs {
                user_id,
                completion: args.clone(),
            };
            if self
                .dispatcher
                .dispatch(JobTask::TaskCompletedNotice(notice))
                .await
            {
                queued += 1;
            } else {
                warn!(%user_id, task_id = %args.task_id, "Completion notice was not queued");
            }
        }
        Ok(queued)
    }

    pub async fn task_completed_notice(
        &self,
        db: &DatabaseConnection,
        args: &TaskCompletedNoticeArgs,
    ) -> Result<(), RepositoryError> {
        let completion = &args.completion;
        self.send_inbox_notification(
            db,
            NewInboxEntry {
                user_id: args.user_id,
                org_id: completion.org_id,
                user_by: completion.completed_by_id,
                event_type: InboxEventType::TaskCompleted,
                title: format!("Task Completed: {}", completion.task_title),
                message: format!(
                    "{} completed task '{}' in project {}",
                    completion.completed_by_name, completion.task_title, completion.project_name
                ),
                reference_id: Some(completion.task_id),
            },
        )
        .await?;
        Ok(())
    }

    pub async fn project_member_added(
        &self,
        db: &DatabaseConnection,
        args: &ProjectMemberAddedArgs,
    ) -> Result<(), RepositoryError> {
        self.send_inbox_notification(
            db,
            NewInboxEntry {
                user_id: args.user_id,
                org_id: args.org_id,
                user_by: args.added_by_id,
                event_type: InboxEventType::ProjectMemberAdded,
                title: format!("Added to project: {}", args.project_name),
                message: format!(
                    "{} added you to project {}",
                    args.added_by_name, args.project_name
                ),
                reference_id: Some(args.project_id),
            },
        )
        .await?;
        Ok(())
    }
}
