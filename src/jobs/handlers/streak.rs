//! `streak_calculate`: nightly streak reset sweep.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::achievements;
use crate::domain::JobType;
use crate::jobs::worker::{HandlerOutcome, JobContext, JobHandler};

/// Resets `current_streak` for users who did not complete a task
/// yesterday. The per-completion path handles increments; this job is
/// the authority for resets.
pub struct StreakCalculateHandler;

#[async_trait]
impl JobHandler for StreakCalculateHandler {
    fn job_type(&self) -> JobType {
        JobType::StreakCalculate
    }

    async fn run(
        &self,
        _payload: &serde_json::Value,
        ctx: &JobContext,
    ) -> anyhow::Result<HandlerOutcome> {
        let mut tx = ctx.pool.begin().await?;
        let sweep = achievements::nightly_streak_reset(&mut *tx, Utc::now()).await?;
        tx.commit().await?;

        Ok(HandlerOutcome::Success(Some(json!({
            "users_processed": sweep.users_processed,
            "streaks_reset": sweep.streaks_reset,
        }))))
    }
}
