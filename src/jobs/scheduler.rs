//! Daily scheduler: enqueues maintenance jobs at UTC midnight.
//!
//! A separate process from the worker. Sleeps until the next UTC
//! midnight (cancellable), then enqueues the nightly jobs with small
//! staggered delays so they do not contend for the same rows at once.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use serde_json::json;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::TaskwellConfig;
use crate::domain::JobType;
use crate::store::templates;

/// Cron expression for UTC midnight (sec min hour dom month dow).
const MIDNIGHT_UTC: &str = "0 0 0 * * *";

/// Seconds between the staggered nightly enqueues.
const STAGGER_SECONDS: i64 = 60;

/// The nightly jobs in enqueue order.
const NIGHTLY_JOBS: &[JobType] = &[
    JobType::StreakCalculate,
    JobType::CreditExpire,
    JobType::SubscriptionCheck,
    JobType::ActivityCleanup,
];

/// Interval for the recurring reminder-drain job enqueued alongside the
/// nightly batch (the drain job itself batches due reminders).
const REMINDER_FIRE_INTERVAL_MINUTES: i64 = 1;

/// Next UTC midnight after `after`.
pub fn next_midnight(after: DateTime<Utc>) -> DateTime<Utc> {
    Schedule::from_str(MIDNIGHT_UTC)
        .ok()
        .and_then(|schedule| schedule.after(&after).next())
        // The expression is a constant; fall back arithmetically anyway.
        .unwrap_or_else(|| {
            (after + Duration::days(1))
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|naive| naive.and_utc())
                .unwrap_or(after + Duration::days(1))
        })
}

/// Run the scheduler until `shutdown` flips to true.
pub async fn run(pool: PgPool, config: Arc<TaskwellConfig>, mut shutdown: watch::Receiver<bool>) {
    info!("scheduler started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        // Keep a reminder-drain job in flight continuously.
        if let Err(e) = ensure_reminder_job(&pool).await {
            error!(error = %e, "failed to ensure reminder job");
        }

        // Catch recurring templates whose generation chain broke (e.g.
        // a job was lost): any template already due gets a fresh job.
        if let Err(e) = sweep_due_templates(&pool).await {
            error!(error = %e, "failed to sweep due templates");
        }

        let now = Utc::now();
        let midnight = next_midnight(now);
        let wait = (midnight - now)
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(1));
        info!(next = %midnight, "scheduler sleeping until UTC midnight");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => continue,
        }

        if *shutdown.borrow() {
            break;
        }

        if let Err(e) = enqueue_nightly(&pool, &config).await {
            error!(error = %e, "nightly enqueue failed");
        }
    }

    info!("scheduler stopped");
}

/// Enqueue the nightly maintenance batch with staggered delays.
async fn enqueue_nightly(pool: &PgPool, _config: &TaskwellConfig) -> Result<(), sqlx::Error> {
    let mut conn = pool.acquire().await?;
    let base = Utc::now();
    for (index, job_type) in NIGHTLY_JOBS.iter().enumerate() {
        let delay = Duration::seconds(STAGGER_SECONDS * index as i64);
        super::enqueue(&mut conn, *job_type, json!({}), Some(base + delay)).await?;
    }
    info!(count = NIGHTLY_JOBS.len(), "nightly jobs enqueued");
    Ok(())
}

/// Enqueue the next reminder-drain job unless one is already pending.
async fn ensure_reminder_job(pool: &PgPool) -> Result<(), sqlx::Error> {
    let mut conn = pool.acquire().await?;
    let pending = super::pending_count(&mut conn, Some(JobType::ReminderFire)).await?;
    if pending == 0 {
        super::enqueue(
            &mut conn,
            JobType::ReminderFire,
            json!({}),
            Some(Utc::now() + Duration::minutes(REMINDER_FIRE_INTERVAL_MINUTES)),
        )
        .await?;
    }
    Ok(())
}

/// Enqueue a generation job for every active template whose cached
/// `next_due` has arrived. The handler skips not-yet-due templates, so a
/// sweep overlapping the normal per-template chain is harmless.
async fn sweep_due_templates(pool: &PgPool) -> Result<(), sqlx::Error> {
    let mut conn = pool.acquire().await?;
    let due = templates::due_templates(&mut conn, Utc::now())
        .await
        .map_err(|e| match e {
            crate::store::StoreError::Database(e) => e,
            other => sqlx::Error::Protocol(other.to_string()),
        })?;
    let count = due.len();
    for template in due {
        super::enqueue(
            &mut conn,
            JobType::RecurringTaskGenerate,
            json!({ "template_id": template.id }),
            None,
        )
        .await?;
    }
    if count > 0 {
        info!(count, "due recurring templates re-queued");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_next_midnight_rolls_to_next_day() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 17, 30, 0).single().expect("ts");
        let midnight = next_midnight(at);
        assert_eq!(
            midnight,
            Utc.with_ymd_and_hms(2026, 3, 5, 0, 0, 0).single().expect("ts")
        );
    }

    #[test]
    fn test_next_midnight_at_exact_boundary() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 0, 0, 0).single().expect("ts");
        // `after` is exclusive: at exactly midnight, the next fire is
        // tomorrow's midnight.
        assert_eq!(
            next_midnight(at),
            Utc.with_ymd_and_hms(2026, 3, 5, 0, 0, 0).single().expect("ts")
        );
    }

    #[test]
    fn test_nightly_batch_covers_all_maintenance() {
        assert!(NIGHTLY_JOBS.contains(&JobType::StreakCalculate));
        assert!(NIGHTLY_JOBS.contains(&JobType::CreditExpire));
        assert!(NIGHTLY_JOBS.contains(&JobType::SubscriptionCheck));
        assert!(NIGHTLY_JOBS.contains(&JobType::ActivityCleanup));
    }
}
