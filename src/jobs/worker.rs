//! Polling job worker.
//!
//! Any number of workers can run against the same queue; the claim
//! statement guarantees at-most-one-worker-per-job. Each cycle releases
//! stale locks, claims up to `batch_size` jobs, and executes their
//! handlers. On shutdown the worker stops claiming and lets in-flight
//! jobs finish.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::TaskwellConfig;
use crate::domain::{Job, JobType};
use crate::events::EventBus;
use crate::notify::push::PushClient;

/// What a handler reports back to the queue.
#[derive(Debug)]
pub enum HandlerOutcome {
    /// Work done; optional result JSON for the log line.
    Success(Option<serde_json::Value>),
    /// Nothing to do; counts as completed.
    Skipped(String),
    /// Transient failure; re-queue with backoff.
    Retry(String),
}

/// Shared dependencies handed to every job handler.
pub struct JobContext {
    /// Connection pool; handlers open their own transactions.
    pub pool: PgPool,
    /// Application configuration.
    pub config: Arc<TaskwellConfig>,
    /// Event bus for events emitted from job transactions.
    pub bus: Arc<EventBus>,
    /// Push delivery client.
    pub push: Arc<PushClient>,
}

/// A registered job handler.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job type this handler serves.
    fn job_type(&self) -> JobType;

    /// Execute one job. A returned error routes to retry like
    /// [`HandlerOutcome::Retry`].
    async fn run(
        &self,
        payload: &serde_json::Value,
        ctx: &JobContext,
    ) -> anyhow::Result<HandlerOutcome>;
}

/// The polling worker.
pub struct Worker {
    ctx: JobContext,
    registry: HashMap<JobType, Arc<dyn JobHandler>>,
    worker_id: String,
}

impl Worker {
    /// Build a worker with a generated id and an empty registry.
    pub fn new(ctx: JobContext) -> Self {
        let worker_id = format!("worker-{}", uuid::Uuid::new_v4());
        Self {
            ctx,
            registry: HashMap::new(),
            worker_id,
        }
    }

    /// Register a handler. The last registration for a type wins.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.registry.insert(handler.job_type(), handler);
    }

    /// This worker's queue lock id.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run until `shutdown` flips to true. In-flight jobs finish before
    /// the loop exits.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let poll_interval = Duration::from_secs(self.ctx.config.worker.poll_interval_seconds);
        let batch_size = self.ctx.config.worker.batch_size;
        info!(worker_id = %self.worker_id, "worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) =
                super::release_stale_locks(&self.ctx.pool, self.ctx.config.worker.stale_lock_seconds)
                    .await
            {
                error!(error = %e, "failed to release stale locks");
            }

            let mut claimed = 0;
            for _ in 0..batch_size {
                if *shutdown.borrow() {
                    break;
                }
                match super::claim_next(&self.ctx.pool, &self.worker_id).await {
                    Ok(Some(job)) => {
                        claimed += 1;
                        self.execute(job).await;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "job claim failed");
                        break;
                    }
                }
            }

            if claimed == 0 {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }

        info!(worker_id = %self.worker_id, "worker stopped");
    }

    /// Execute one claimed job and record its outcome.
    async fn execute(&self, job: Job) {
        let Some(handler) = self.registry.get(&job.job_type) else {
            // No handler is a permanent failure: dead-letter immediately.
            warn!(job_id = %job.id, job_type = job.job_type.as_str(), "no handler registered");
            if let Err(e) = super::fail(&self.ctx.pool, job.id, "no handler registered", false).await
            {
                error!(job_id = %job.id, error = %e, "failed to dead-letter job");
            }
            return;
        };

        let started = std::time::Instant::now();
        let outcome = handler.run(&job.payload.0, &self.ctx).await;
        let elapsed_ms = started.elapsed().as_millis();

        let result = match outcome {
            Ok(HandlerOutcome::Success(result)) => {
                info!(
                    job_id = %job.id,
                    job_type = job.job_type.as_str(),
                    elapsed_ms,
                    result = ?result,
                    "job succeeded"
                );
                super::complete(&self.ctx.pool, job.id).await
            }
            Ok(HandlerOutcome::Skipped(reason)) => {
                info!(job_id = %job.id, reason = %reason, "job skipped");
                super::complete(&self.ctx.pool, job.id).await
            }
            Ok(HandlerOutcome::Retry(reason)) => {
                warn!(job_id = %job.id, reason = %reason, elapsed_ms, "job requested retry");
                super::fail(&self.ctx.pool, job.id, &reason, true).await.map(|_| ())
            }
            Err(err) => {
                error!(job_id = %job.id, error = %err, elapsed_ms, "job handler errored");
                super::fail(&self.ctx.pool, job.id, &err.to_string(), true)
                    .await
                    .map(|_| ())
            }
        };

        if let Err(e) = result {
            error!(job_id = %job.id, error = %e, "failed to record job outcome");
        }
    }
}
