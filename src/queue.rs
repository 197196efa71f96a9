//! # Task Queue
//!
//! Redis list transport between the API (producer) and the worker (consumer).
//!
//! Three lists are used per queue name:
//!
//! - `{queue}`: pending jobs, `LPUSH`ed by producers
//! - `{queue}:processing`: jobs a worker has reserved with `BRPOPLPUSH`
//! - `{queue}:dead_letter`: jobs that exhausted their attempts or could not be decoded
//!
//! A reserved job stays in the processing list until it is acknowledged,
//! retried or dead-lettered, so a crashed worker loses nothing; stranded
//! entries are recovered on the next worker start.
//!
//! `BRPOPLPUSH` holds its socket until it returns, so every consumer reserves
//! on its own [`ReserveConnection`]. The shared managed connection only
//! carries non-blocking commands.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::jobs::{Job, JobTask};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Job serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Opens a managed (auto-reconnecting) Redis connection.
pub async fn connect(redis_url: &str) -> Result<ConnectionManager, QueueError> {
    let client =
        redis::Client::open(redis_url).map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;
    ConnectionManager::new(client)
        .await
        .map_err(|e| QueueError::ConnectionFailed(e.to_string()))
}

/// A job reserved from the queue. `raw` is the exact list entry, needed to
/// remove it from the processing list.
#[derive(Debug)]
pub struct Reservation {
    pub raw: String,
    pub job: Result<Job, serde_json::Error>,
}

/// Destination for produced jobs.
#[async_trait]
pub trait JobSink: Send + Sync {
    async fn push(&self, job: &Job) -> Result<(), QueueError>;
}

/// Connection owned by a single consumer loop for blocking reservations.
pub struct ReserveConnection {
    conn: MultiplexedConnection,
}

/// Redis-backed job queue.
#[derive(Clone)]
pub struct JobQueue {
    client: redis::Client,
    redis: ConnectionManager,
    queue_name: String,
    processing_queue: String,
    dead_letter_queue: String,
}

impl JobQueue {
    /// Connects the queue's managed connection for `queue_name`.
    pub async fn connect(redis_url: &str, queue_name: &str) -> Result<Self, QueueError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;
        let redis = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;
        Ok(Self {
            client,
            redis,
            queue_name: queue_name.to_string(),
            processing_queue: format!("{queue_name}:processing"),
            dead_letter_queue: format!("{queue_name}:dead_letter"),
        })
    }

    /// Opens a fresh connection for one consumer's `reserve` calls.
    pub async fn reserve_connection(&self) -> Result<ReserveConnection, QueueError> {
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;
        Ok(ReserveConnection { conn })
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        let serialized = serde_json::to_string(job)?;
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(&self.queue_name, serialized).await?;
        debug!(job_id = %job.id, task = job.payload.name(), "Job enqueued");
        Ok(())
    }

    /// Blocks `conn` up to `timeout` for the next job and moves it to the
    /// processing list.
    pub async fn reserve(
        &self,
        conn: &mut ReserveConnection,
        timeout: Duration,
    ) -> Result<Option<Reservation>, QueueError> {
        let timeout_secs = timeout.as_secs().max(1) as usize;

        let raw: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(&self.queue_name)
            .arg(&self.processing_queue)
            .arg(timeout_secs)
            .query_async(&mut conn.conn)
            .await?;

        Ok(raw.map(|raw| Reservation {
            job: serde_json::from_str(&raw),
            raw,
        }))
    }

    /// Drops a finished job from the processing list.
    pub async fn ack(&self, reservation: &Reservation) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        conn.lrem::<_, _, ()>(&self.processing_queue, 1, &reservation.raw)
            .await?;
        Ok(())
    }

    /// Puts `job` (with its updated attempt count) back on the pending list.
    pub async fn retry(&self, reservation: &Reservation, job: &Job) -> Result<(), QueueError> {
        let serialized = serde_json::to_string(job)?;
        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .lrem(&self.processing_queue, 1, &reservation.raw)
            .lpush(&self.queue_name, serialized);
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    /// Moves the reserved entry to the dead letter list together with `error`.
    pub async fn dead_letter(&self, reservation: &Reservation, error: &str) -> Result<(), QueueError> {
        let job = match &reservation.job {
            Ok(job) => serde_json::to_value(job)?,
            Err(_) => serde_json::Value::String(reservation.raw.clone()),
        };
        let entry = serde_json::json!({
            "job": job,
            "error": error,
            "moved_at": chrono::Utc::now().to_rfc3339(),
        });

        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .lrem(&self.processing_queue, 1, &reservation.raw)
            .lpush(&self.dead_letter_queue, serde_json::to_string(&entry)?);
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    /// Returns jobs left in the processing list by a previous run to the
    /// pending list. Must only run while no other worker is consuming.
    pub async fn recover_processing(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let stranded: Vec<String> = conn.lrange(&self.processing_queue, 0, -1).await?;

        for raw in &stranded {
            let mut pipe = redis::pipe();
            pipe.atomic()
                .lrem(&self.processing_queue, 1, raw)
                .rpush(&self.queue_name, raw);
            pipe.query_async::<_, ()>(&mut conn).await?;
        }

        if !stranded.is_empty() {
            info!(count = stranded.len(), queue = %self.queue_name, "Recovered stranded jobs");
        }
        Ok(stranded.len())
    }

    pub async fn dead_letter_len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        Ok(conn.llen(&self.dead_letter_queue).await?)
    }
}

#[async_trait]
impl JobSink for JobQueue {
    async fn push(&self, job: &Job) -> Result<(), QueueError> {
        self.enqueue(job).await
    }
}

/// Producer facade used by request handlers and job handlers.
///
/// Dispatch never fails the caller: without a broker, or when the push
/// fails, the job is logged and dropped.
#[derive(Clone)]
pub struct TaskDispatcher {
    sink: Option<Arc<dyn JobSink>>,
    max_attempts: u32,
}

impl TaskDispatcher {
    pub fn new(sink: Arc<dyn JobSink>, max_attempts: u32) -> Self {
        Self {
            sink: Some(sink),
            max_attempts,
        }
    }

    /// Dispatcher that drops every job.
    pub fn disabled() -> Self {
        Self {
            sink: None,
            max_attempts: 1,
        }
    }

    /// Queues `task`; returns whether it reached the broker.
    pub async fn dispatch(&self, task: JobTask) -> bool {
        let Some(sink) = &self.sink else {
            warn!(task = task.name(), "Task broker not configured, dropping job");
            return false;
        };

        let job = Job::new(task, self.max_attempts);
        match sink.push(&job).await {
            Ok(()) => true,
            Err(err) => {
                warn!(job_id = %job.id, task = job.payload.name(), error = %err, "Failed to enqueue job");
                false
            }
        }
    }
}
