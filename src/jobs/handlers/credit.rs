//! `credit_expire`: daily credit expiration, carry-over, and pro grants.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::achievements;
use crate::credits;
use crate::domain::{JobType, UserTier};
use crate::jobs::worker::{HandlerOutcome, JobContext, JobHandler};
use crate::store::users;

/// Expires due grants, applies the subscription carry-over cap, and
/// grants the day's credits to pro users (base amount plus any
/// daily-credit achievement perks).
pub struct CreditExpireHandler;

#[async_trait]
impl JobHandler for CreditExpireHandler {
    fn job_type(&self) -> JobType {
        JobType::CreditExpire
    }

    async fn run(
        &self,
        _payload: &serde_json::Value,
        ctx: &JobContext,
    ) -> anyhow::Result<HandlerOutcome> {
        let now = Utc::now();
        let mut tx = ctx.pool.begin().await?;

        let summary =
            credits::expire_due(&mut *tx, now, ctx.config.credits.max_carryover).await?;

        let mut grants = 0u64;
        for user_id in users::pro_user_ids(&mut *tx).await? {
            let limits = achievements::effective_limits(
                &mut *tx,
                user_id,
                UserTier::Pro,
                &ctx.config.limits,
            )
            .await?;
            let amount = ctx.config.credits.daily_amount + limits.daily_credit_bonus;
            if credits::grant_daily(&mut *tx, user_id, amount, now)
                .await?
                .is_some()
            {
                grants += 1;
            }
        }

        tx.commit().await?;

        Ok(HandlerOutcome::Success(Some(json!({
            "expired_rows": summary.expired_rows,
            "expired_units": summary.expired_units,
            "carried_over": summary.carried_over,
            "daily_grants": grants,
        }))))
    }
}
