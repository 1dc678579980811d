//! `subscription_check`: daily grace/cancellation sweep.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::billing;
use crate::domain::JobType;
use crate::jobs::worker::{HandlerOutcome, JobContext, JobHandler};

/// Applies grace→expired and cancelled→expired transitions and sends
/// grace warnings coming due.
pub struct SubscriptionCheckHandler;

#[async_trait]
impl JobHandler for SubscriptionCheckHandler {
    fn job_type(&self) -> JobType {
        JobType::SubscriptionCheck
    }

    async fn run(
        &self,
        _payload: &serde_json::Value,
        ctx: &JobContext,
    ) -> anyhow::Result<HandlerOutcome> {
        let mut tx = ctx.pool.begin().await?;
        let sweep = billing::daily_sweep(&mut *tx, &ctx.config, Utc::now()).await?;
        tx.commit().await?;

        Ok(HandlerOutcome::Success(Some(json!({
            "grace_expired": sweep.grace_expired,
            "cancelled_expired": sweep.cancelled_expired,
            "warnings_sent": sweep.warnings_sent,
        }))))
    }
}
