//! # Background Worker
//!
//! Consumes the task queue with a fixed number of concurrent loops. A job
//! that fails is retried until it reaches its attempt limit and is then
//! parked on the dead letter list together with the last error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use sea_orm::DatabaseConnection;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::jobs::{Job, JobTask};
use crate::mail::{MailError, Mailer};
use crate::notifications::Notifier;
use crate::queue::{JobQueue, QueueError, Reservation, ReserveConnection};
use crate::repositories::RepositoryError;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("mail delivery failed: {0}")]
    Mail(#[from] MailError),

    #[error("repository operation failed: {0}")]
    Repository(#[from] RepositoryError),

    #[error("queue operation failed: {0}")]
    Queue(#[from] QueueError),
}

/// Executes a single task.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, task: &JobTask) -> Result<(), WorkerError>;
}

/// Production handler: email delivery and inbox notifications.
pub struct TaskExecutor {
    db: DatabaseConnection,
    mailer: Mailer,
    notifier: Notifier,
}

impl TaskExecutor {
    pub fn new(db: DatabaseConnection, mailer: Mailer, notifier: Notifier) -> Self {
        Self {
            db,
            mailer,
            notifier,
        }
    }
}

#[async_trait]
impl JobHandler for TaskExecutor {
    async fn handle(&self, task: &JobTask) -> Result<(), WorkerError> {
        match task {
            JobTask::SendEmail(args) => self.mailer.send_templated(args).await?,
            JobTask::OrganizationInvitation(args) => {
                self.notifier.organization_invitation(&self.db, args).await?
            }
            JobTask::TaskAssigned(args) => self.notifier.task_assigned(&self.db, args).await?,
            JobTask::TaskUnassigned(args) => self.notifier.task_unassigned(&self.db, args).await?,
            JobTask::TaskCompleted(args) => {
                let queued = self.notifier.task_completed(&self.db, args).await?;
                debug!(task_id = %args.task_id, queued, "Completion notices queued");
            }
            JobTask::TaskCompletedNotice(args) => {
                self.notifier.task_completed_notice(&self.db, args).await?
            }
            JobTask::ProjectMemberAdded(args) => {
                self.notifier.project_member_added(&self.db, args).await?
            }
        }
        Ok(())
    }
}

/// What happens to a reserved job after its handler ran.
#[derive(Debug, PartialEq)]
pub enum Settlement {
    Ack,
    Retry(Job),
    DeadLetter(String),
}

pub fn settle(mut job: Job, outcome: Result<(), WorkerError>) -> Settlement {
    match outcome {
        Ok(()) => Settlement::Ack,
        Err(err) if job.record_failure() => {
            warn!(job_id = %job.id, task = job.payload.name(), attempts = job.attempts, error = %err, "Job failed, retrying");
            Settlement::Retry(job)
        }
        Err(err) => Settlement::DeadLetter(err.to_string()),
    }
}

/// Fixed-size pool of queue consumers.
pub struct WorkerPool {
    queue: JobQueue,
    handler: Arc<dyn JobHandler>,
    concurrency: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(
        queue: JobQueue,
        handler: Arc<dyn JobHandler>,
        concurrency: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            handler,
            concurrency: concurrency.max(1),
            poll_interval,
        }
    }

    /// Runs until `shutdown` fires and every loop has finished its current job.
    #[instrument(skip_all, fields(queue = %self.queue.queue_name()))]
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), WorkerError> {
        self.queue.recover_processing().await?;
        info!(concurrency = self.concurrency, "Worker pool started");

        let mut handles = Vec::with_capacity(self.concurrency);
        for index in 0..self.concurrency {
            let consumer = Consumer {
                index,
                queue: self.queue.clone(),
                handler: Arc::clone(&self.handler),
                poll_interval: self.poll_interval,
            };
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move { consumer.run(shutdown).await }));
        }

        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "Worker loop panicked");
            }
        }

        info!("Worker pool stopped");
        Ok(())
    }
}

struct Consumer {
    index: usize,
    queue: JobQueue,
    handler: Arc<dyn JobHandler>,
    poll_interval: Duration,
}

impl Consumer {
    async fn run(self, shutdown: CancellationToken) {
        debug!(worker = self.index, "Worker loop started");
        let mut connection: Option<ReserveConnection> = None;
        while !shutdown.is_cancelled() {
            let reserved = match connection.as_mut() {
                Some(conn) => self.queue.reserve(conn, self.poll_interval).await,
                None => match self.queue.reserve_connection().await {
                    Ok(conn) => {
                        connection = Some(conn);
                        continue;
                    }
                    Err(err) => Err(err),
                },
            };

            match reserved {
                Ok(Some(reservation)) => self.process(reservation).await,
                Ok(None) => {}
                Err(err) => {
                    error!(worker = self.index, error = %err, "Failed to reserve job");
                    // Reconnect on the next pass.
                    connection = None;
                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }
        debug!(worker = self.index, "Worker loop stopped");
    }

    async fn process(&self, reservation: Reservation) {
        let started = Instant::now();

        let (task_name, settlement) = match &reservation.job {
            Ok(job) => {
                let outcome = self.handler.handle(&job.payload).await;
                (job.payload.name(), settle(job.clone(), outcome))
            }
            Err(err) => ("unknown", Settlement::DeadLetter(format!("undecodable job: {err}"))),
        };

        let applied = match &settlement {
            Settlement::Ack => self.queue.ack(&reservation).await,
            Settlement::Retry(job) => self.queue.retry(&reservation, job).await,
            Settlement::DeadLetter(reason) => {
                error!(worker = self.index, task = task_name, reason = %reason, "Job moved to dead letter queue");
                self.queue.dead_letter(&reservation, reason).await
            }
        };
        if let Err(err) = applied {
            error!(worker = self.index, task = task_name, error = %err, "Failed to settle job");
        }

        let outcome = match settlement {
            Settlement::Ack => "succeeded",
            Settlement::Retry(_) => "retried",
            Settlement::DeadLetter(_) => "dead_lettered",
        };
        counter!("jobs_processed_total", "task" => task_name, "outcome" => outcome).increment(1);
        histogram!("job_duration_ms", "task" => task_name)
            .record(started.elapsed().as_secs_f64() * 1_000.0);
        info!(worker = self.index, task = task_name, outcome, "Job processed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{ProjectMemberAddedArgs, SendEmailArgs};
    use crate::mail::{EmailTransport, OutgoingEmail};
    use crate::queue::TaskDispatcher;
    use crate::repositories::{InboxRepository, ProfileRepository};
    use crate::test_support::{seed_org, setup_db};
    use serde_json::Map;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<OutgoingEmail>>,
    }

    #[async_trait]
    impl EmailTransport for Outbox {
        async fn send(&self, email: OutgoingEmail) -> Result<(), MailError> {
            self.sent.lock().unwrap().push(email);
            Ok(())
        }
    }

    fn email_job() -> Job {
        Job::new(
            JobTask::SendEmail(SendEmailArgs {
                to_email: "ada@example.com".into(),
                subject: "Hi".into(),
                template: "missing.html".into(),
                text_content: "Hi".into(),
                token: None,
                template_vars: Map::new(),
            }),
            2,
        )
    }

    fn failure() -> WorkerError {
        WorkerError::Repository(RepositoryError::not_found("Task"))
    }

    #[test]
    fn settle_retries_until_attempts_are_exhausted() {
        assert_eq!(settle(email_job(), Ok(())), Settlement::Ack);

        let first = match settle(email_job(), Err(failure())) {
            Settlement::Retry(job) => job,
            other => panic!("expected retry, got {other:?}"),
        };
        assert_eq!(first.attempts, 1);

        match settle(first, Err(failure())) {
            Settlement::DeadLetter(reason) => assert!(reason.contains("Task not found")),
            other => panic!("expected dead letter, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn executor_routes_email_and_notification_tasks() {
        let db = setup_db().await;
        let templates = tempfile::tempdir().unwrap();
        std::fs::write(
            templates.path().join("inbox_notification.html"),
            "<h1>{{ title }}</h1>",
        )
        .unwrap();

        let outbox = Arc::new(Outbox::default());
        let executor = TaskExecutor::new(
            db.clone(),
            Mailer::new(outbox.clone(), templates.path()),
            Notifier::new(None, TaskDispatcher::disabled(), "http://localhost:3000"),
        );

        let mut vars = Map::new();
        vars.insert("title".into(), "Welcome".into());
        executor
            .handle(&JobTask::SendEmail(SendEmailArgs {
                to_email: "ada@example.com".into(),
                subject: "[Notification] Welcome".into(),
                template: "inbox_notification.html".into(),
                text_content: "Welcome".into(),
                token: None,
                template_vars: vars,
            }))
            .await
            .unwrap();
        assert_eq!(outbox.sent.lock().unwrap()[0].html_body, "<h1>Welcome</h1>");

        let owner = Uuid::new_v4();
        let member = Uuid::new_v4();
        let org = seed_org(&db, "Acme", owner).await;
        ProfileRepository::new(&db)
            .get_or_create(member, None)
            .await
            .unwrap();
        executor
            .handle(&JobTask::ProjectMemberAdded(ProjectMemberAddedArgs {
                user_id: member,
                org_id: org.id,
                project_id: Uuid::new_v4(),
                project_name: "Apollo".into(),
                added_by_id: owner,
                added_by_name: "Ada".into(),
            }))
            .await
            .unwrap();

        let (rows, total) = InboxRepository::new(&db)
            .list(member, org.id, false, crate::repositories::Page::new(0, 10))
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].title, "Added to project: Apollo");
        assert_eq!(rows[0].message, "Ada added you to project Apollo");
    }

    #[tokio::test]
    async fn missing_template_is_a_handler_error() {
        let db = setup_db().await;
        let templates = tempfile::tempdir().unwrap();
        let executor = TaskExecutor::new(
            db,
            Mailer::new(Arc::new(Outbox::default()), templates.path()),
            Notifier::new(None, TaskDispatcher::disabled(), "http://localhost:3000"),
        );

        let err = executor.handle(&email_job().payload).await.unwrap_err();
        assert!(matches!(err, WorkerError::Mail(MailError::TemplateNotFound { .. })));
    }
}
