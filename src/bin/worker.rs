//! # HexoTeams Worker Entry Point
//!
//! Consumes the task queue and performs the side effects the API enqueues:
//! email delivery and inbox notifications.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use hexoteams::{
    config::ConfigLoader,
    db::init_pool,
    mail::{Mailer, SmtpMailer},
    notifications::{Notifier, RedisPublisher},
    queue::{self, JobQueue, TaskDispatcher},
    telemetry::init_tracing,
    worker::{TaskExecutor, WorkerPool},
};
use tokio_util::sync::CancellationToken;

/// Background task worker for the HexoTeams API
#[derive(Debug, Parser)]
#[command(name = "hexoteams-worker", version)]
struct Args {
    /// Number of concurrent consumer loops (overrides WORKER_CONCURRENCY)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Queue to consume (overrides QUEUE_NAME)
    #[arg(long)]
    queue: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = ConfigLoader::new()
        .load()
        .context("failed to load configuration")?;
    if let Some(concurrency) = args.concurrency {
        config.worker.concurrency = concurrency;
    }
    if let Some(queue) = args.queue {
        config.worker.queue_name = queue;
    }
    config.validate().context("invalid worker configuration")?;

    init_tracing(&config).context("failed to initialize tracing")?;

    let Some(redis_url) = config.redis_url.as_deref() else {
        bail!("REDIS_URL must be set for the worker");
    };
    // Consumers open their own reserve connections; this one only carries
    // acks, retries and jobs enqueued by handlers.
    let queue = JobQueue::connect(redis_url, &config.worker.queue_name)
        .await
        .context("failed to connect to Redis")?;
    let publisher = queue::connect(redis_url)
        .await
        .context("failed to connect to Redis")?;
    let db = init_pool(&config).await?;

    match queue.dead_letter_len().await {
        Ok(0) => {}
        Ok(parked) => tracing::warn!(parked, "Dead letter queue is not empty"),
        Err(err) => tracing::warn!(error = %err, "Failed to inspect dead letter queue"),
    }
    let dispatcher = TaskDispatcher::new(Arc::new(queue.clone()), config.worker.max_attempts);
    let notifier = Notifier::new(
        Some(Arc::new(RedisPublisher::new(publisher))),
        dispatcher,
        config.frontend_url.clone(),
    );
    let transport = SmtpMailer::from_config(&config.smtp).context("invalid SMTP settings")?;
    let mailer = Mailer::new(Arc::new(transport), config.smtp.templates_path.clone());

    let pool = WorkerPool::new(
        queue,
        Arc::new(TaskExecutor::new(db, mailer, notifier)),
        config.worker.concurrency,
        Duration::from_secs(config.worker.poll_interval_seconds),
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received, finishing in-flight jobs"),
            Err(err) => tracing::error!(error = %err, "Failed to listen for shutdown signal"),
        }
        signal.cancel();
    });

    pool.run(shutdown).await.context("worker pool failed")?;
    Ok(())
}
