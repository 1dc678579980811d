//! `activity_cleanup`: retention sweeps for audit rows and housekeeping
//! of old jobs, idempotency keys, and expired refresh tokens.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;

use crate::domain::JobType;
use crate::jobs;
use crate::jobs::worker::{HandlerOutcome, JobContext, JobHandler};
use crate::store::{activity, idempotency, refresh_tokens};

/// Activity rows deleted per batch.
const BATCH_SIZE: i64 = 1000;

/// Completed/dead jobs older than this are deleted.
const JOB_RETENTION_DAYS: i64 = 7;

/// Deletes activity rows past the 30-day retention in batches, plus old
/// queue rows, expired idempotency keys, and expired refresh tokens.
pub struct ActivityCleanupHandler;

#[async_trait]
impl JobHandler for ActivityCleanupHandler {
    fn job_type(&self) -> JobType {
        JobType::ActivityCleanup
    }

    async fn run(
        &self,
        _payload: &serde_json::Value,
        ctx: &JobContext,
    ) -> anyhow::Result<HandlerOutcome> {
        let now = Utc::now();
        let mut activity_deleted = 0u64;

        loop {
            let mut tx = ctx.pool.begin().await?;
            let deleted = activity::delete_expired_batch(&mut *tx, now, BATCH_SIZE).await?;
            tx.commit().await?;
            activity_deleted += deleted;
            if deleted < BATCH_SIZE as u64 {
                break;
            }
        }

        let mut conn = ctx.pool.acquire().await?;
        let jobs_deleted = jobs::cleanup_old(&mut conn, JOB_RETENTION_DAYS).await?;
        let keys_deleted = idempotency::delete_expired(&mut conn, now).await?;
        let tokens_deleted =
            refresh_tokens::delete_expired(&mut conn, now - Duration::days(1)).await?;

        Ok(HandlerOutcome::Success(Some(json!({
            "activity_deleted": activity_deleted,
            "jobs_deleted": jobs_deleted,
            "idempotency_keys_deleted": keys_deleted,
            "refresh_tokens_deleted": tokens_deleted,
        }))))
    }
}
