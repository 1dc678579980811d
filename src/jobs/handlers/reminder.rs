//! `reminder_fire`: drain due reminders and re-arm the next drain.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;

use crate::domain::JobType;
use crate::jobs::worker::{HandlerOutcome, JobContext, JobHandler};
use crate::reminders;

/// Minutes until the next drain job after this one finishes.
const NEXT_DRAIN_MINUTES: i64 = 1;

/// Drains pending reminders whose `scheduled_at` has arrived.
pub struct ReminderFireHandler;

#[async_trait]
impl JobHandler for ReminderFireHandler {
    fn job_type(&self) -> JobType {
        JobType::ReminderFire
    }

    async fn run(
        &self,
        _payload: &serde_json::Value,
        ctx: &JobContext,
    ) -> anyhow::Result<HandlerOutcome> {
        let fired = reminders::drain_due(
            &ctx.pool,
            &ctx.config,
            &ctx.bus,
            &ctx.push,
            Utc::now(),
        )
        .await?;

        // Self-perpetuating: schedule the next drain unless a concurrent
        // worker already did.
        let mut conn = ctx.pool.acquire().await?;
        if crate::jobs::pending_count(&mut conn, Some(JobType::ReminderFire)).await? == 0 {
            crate::jobs::enqueue(
                &mut conn,
                JobType::ReminderFire,
                json!({}),
                Some(Utc::now() + Duration::minutes(NEXT_DRAIN_MINUTES)),
            )
            .await?;
        }

        Ok(HandlerOutcome::Success(Some(json!({ "fired": fired }))))
    }
}
