//! Postgres-backed durable job queue.
//!
//! No extra queueing infrastructure: jobs are rows, and the critical
//! claim operation is a single `UPDATE … WHERE id = (SELECT … FOR UPDATE
//! SKIP LOCKED LIMIT 1) RETURNING *` statement, so any number of workers
//! can run against the same queue with at-most-one-worker-per-job.

pub mod handlers;
pub mod scheduler;
pub mod worker;

use chrono::{DateTime, Duration, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{Job, JobType};

const JOB_COLUMNS: &str = "id, job_type, payload, status, scheduled_at, started_at, \
     completed_at, attempts, max_attempts, last_error, locked_at, locked_by, created_at";

/// Retry delays in seconds for attempts 1..=5; later attempts reuse the
/// last value.
pub const BACKOFF_DELAYS: [i64; 5] = [60, 300, 900, 1800, 3600];

/// Default retry budget.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Backoff delay after the given attempt count.
pub fn backoff_delay(attempts: i32) -> Duration {
    let index = usize::try_from((attempts - 1).max(0))
        .unwrap_or(0)
        .min(BACKOFF_DELAYS.len() - 1);
    Duration::seconds(BACKOFF_DELAYS[index])
}

/// Add a job to the queue. `scheduled_at` defaults to now.
pub async fn enqueue(
    conn: &mut PgConnection,
    job_type: JobType,
    payload: serde_json::Value,
    scheduled_at: Option<DateTime<Utc>>,
) -> Result<Job, sqlx::Error> {
    let job = sqlx::query_as::<_, Job>(&format!(
        "INSERT INTO job_queue (id, job_type, payload, scheduled_at, max_attempts)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING {JOB_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(job_type)
    .bind(sqlx::types::Json(payload))
    .bind(scheduled_at.unwrap_or_else(Utc::now))
    .bind(DEFAULT_MAX_ATTEMPTS)
    .fetch_one(conn)
    .await?;

    info!(
        job_id = %job.id,
        job_type = job_type.as_str(),
        scheduled_at = %job.scheduled_at,
        "job enqueued"
    );
    Ok(job)
}

/// Atomically claim the next due pending job for `worker_id`.
///
/// Selects the oldest-scheduled pending job whose time has come, skipping
/// rows locked by concurrent claimers, and in the same statement marks it
/// processing with the lock stamped and the attempt counted.
pub async fn claim_next(pool: &PgPool, worker_id: &str) -> Result<Option<Job>, sqlx::Error> {
    let job = sqlx::query_as::<_, Job>(&format!(
        "UPDATE job_queue
         SET status = 'processing',
             started_at = now(),
             locked_at = now(),
             locked_by = $1,
             attempts = attempts + 1
         WHERE id = (
             SELECT id FROM job_queue
             WHERE status = 'pending' AND scheduled_at <= now()
             ORDER BY scheduled_at ASC
             FOR UPDATE SKIP LOCKED
             LIMIT 1
         )
         RETURNING {JOB_COLUMNS}"
    ))
    .bind(worker_id)
    .fetch_optional(pool)
    .await?;

    if let Some(job) = &job {
        info!(
            job_id = %job.id,
            job_type = job.job_type.as_str(),
            attempt = job.attempts,
            max_attempts = job.max_attempts,
            "job claimed"
        );
    }
    Ok(job)
}

/// Mark a job completed and release its lock.
pub async fn complete(pool: &PgPool, job_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE job_queue SET
             status = 'completed', completed_at = now(),
             locked_at = NULL, locked_by = NULL
         WHERE id = $1",
    )
    .bind(job_id)
    .execute(pool)
    .await?;
    info!(job_id = %job_id, "job completed");
    Ok(())
}

/// Mark a job failed: re-queue with exponential backoff while the retry
/// budget lasts, otherwise move it to the dead-letter state. Returns
/// `true` when the job will retry.
pub async fn fail(
    pool: &PgPool,
    job_id: Uuid,
    error: &str,
    retry: bool,
) -> Result<bool, sqlx::Error> {
    let job = sqlx::query_as::<_, Job>(&format!(
        "SELECT {JOB_COLUMNS} FROM job_queue WHERE id = $1"
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;
    let Some(job) = job else {
        warn!(job_id = %job_id, "job not found for failure handling");
        return Ok(false);
    };

    if retry && job.can_retry() {
        let next_run = Utc::now() + backoff_delay(job.attempts);
        sqlx::query(
            "UPDATE job_queue SET
                 status = 'pending', scheduled_at = $1, last_error = $2,
                 locked_at = NULL, locked_by = NULL
             WHERE id = $3",
        )
        .bind(next_run)
        .bind(error)
        .bind(job_id)
        .execute(pool)
        .await?;
        info!(
            job_id = %job_id,
            next_run = %next_run,
            attempt = job.attempts,
            max_attempts = job.max_attempts,
            "job failed, retrying"
        );
        return Ok(true);
    }

    sqlx::query(
        "UPDATE job_queue SET
             status = 'dead', completed_at = now(), last_error = $1,
             locked_at = NULL, locked_by = NULL
         WHERE id = $2",
    )
    .bind(error)
    .bind(job_id)
    .execute(pool)
    .await?;
    warn!(job_id = %job_id, error, "job moved to dead letter");
    Ok(false)
}

/// Release processing locks older than `timeout_seconds` back to pending.
/// Handles workers that crashed while holding a job.
pub async fn release_stale_locks(
    pool: &PgPool,
    timeout_seconds: i64,
) -> Result<u64, sqlx::Error> {
    let cutoff = Utc::now() - Duration::seconds(timeout_seconds);
    let result = sqlx::query(
        "UPDATE job_queue SET
             status = 'pending', locked_at = NULL, locked_by = NULL
         WHERE status = 'processing' AND locked_at < $1",
    )
    .bind(cutoff)
    .execute(pool)
    .await?;
    let count = result.rows_affected();
    if count > 0 {
        warn!(count, "released stale job lock(s)");
    }
    Ok(count)
}

/// Manually reset a dead job: clears attempts and re-queues it now.
pub async fn reset_dead(pool: &PgPool, job_id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE job_queue SET
             status = 'pending', scheduled_at = now(), attempts = 0,
             last_error = NULL, completed_at = NULL
         WHERE id = $1 AND status = 'dead'",
    )
    .bind(job_id)
    .execute(pool)
    .await?;
    let reset = result.rows_affected() == 1;
    if reset {
        info!(job_id = %job_id, "dead job reset for retry");
    }
    Ok(reset)
}

/// Delete completed/dead jobs older than `days`. Returns rows removed.
pub async fn cleanup_old(conn: &mut PgConnection, days: i64) -> Result<u64, sqlx::Error> {
    let cutoff = Utc::now() - Duration::days(days);
    let result = sqlx::query(
        "DELETE FROM job_queue
         WHERE status IN ('completed', 'dead') AND completed_at < $1",
    )
    .bind(cutoff)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

/// Pending job count, optionally per type (queue depth gauge).
pub async fn pending_count(
    conn: &mut PgConnection,
    job_type: Option<JobType>,
) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = match job_type {
        Some(job_type) => {
            sqlx::query_as(
                "SELECT count(*) FROM job_queue WHERE status = 'pending' AND job_type = $1",
            )
            .bind(job_type)
            .fetch_one(conn)
            .await?
        }
        None => {
            sqlx::query_as("SELECT count(*) FROM job_queue WHERE status = 'pending'")
                .fetch_one(conn)
                .await?
        }
    };
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(backoff_delay(1), Duration::seconds(60));
        assert_eq!(backoff_delay(2), Duration::seconds(300));
        assert_eq!(backoff_delay(3), Duration::seconds(900));
        assert_eq!(backoff_delay(4), Duration::seconds(1800));
        assert_eq!(backoff_delay(5), Duration::seconds(3600));
        // Past the table, the last delay repeats.
        assert_eq!(backoff_delay(9), Duration::seconds(3600));
        // A zero attempt count maps to the first delay.
        assert_eq!(backoff_delay(0), Duration::seconds(60));
    }
}
