//! Subscription entity and lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Subscription lifecycle state.
///
/// Transitions are driven only by payment webhooks and the daily
/// maintenance job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Payments current; pro entitlements active.
    Active,
    /// One or two consecutive payment failures.
    PastDue,
    /// Three failures; 7-day grace window running.
    Grace,
    /// Cancelled; access retained until period end.
    Cancelled,
    /// Terminal; user downgraded to free.
    Expired,
}

/// One subscription per user, keyed to the payment vendor's id.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Subscription {
    /// Primary key.
    pub id: Uuid,
    /// Owning user (unique).
    pub user_id: Uuid,
    /// Payment vendor subscription id (unique).
    pub checkout_subscription_id: String,
    /// Lifecycle state.
    pub status: SubscriptionStatus,
    /// Billing period start.
    pub current_period_start: DateTime<Utc>,
    /// Billing period end; access boundary for cancelled subscriptions.
    pub current_period_end: DateTime<Utc>,
    /// When the grace window closes, while in `grace`.
    pub grace_period_end: Option<DateTime<Utc>>,
    /// Whether the grace warning notification has been sent.
    pub grace_warning_sent: bool,
    /// Consecutive failed payment count since the last capture.
    pub failed_payment_count: i32,
    /// Last successful capture time.
    pub last_payment_at: Option<DateTime<Utc>>,
    /// When the subscription was cancelled.
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Whether this subscription still entitles the user to pro features.
    ///
    /// Cancelled subscriptions keep access until `current_period_end`;
    /// grace keeps access until `grace_period_end`.
    pub fn entitles_pro(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            SubscriptionStatus::Active | SubscriptionStatus::PastDue => true,
            SubscriptionStatus::Grace => {
                self.grace_period_end.map(|end| now < end).unwrap_or(false)
            }
            SubscriptionStatus::Cancelled => now < self.current_period_end,
            SubscriptionStatus::Expired => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(status: SubscriptionStatus) -> Subscription {
        let now = Utc::now();
        Subscription {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            checkout_subscription_id: "sub_42".to_owned(),
            status,
            current_period_start: now - Duration::days(10),
            current_period_end: now + Duration::days(20),
            grace_period_end: None,
            grace_warning_sent: false,
            failed_payment_count: 0,
            last_payment_at: Some(now - Duration::days(10)),
            cancelled_at: None,
            created_at: now - Duration::days(10),
            updated_at: now,
        }
    }

    #[test]
    fn test_active_entitles_pro() {
        assert!(sample(SubscriptionStatus::Active).entitles_pro(Utc::now()));
    }

    #[test]
    fn test_cancelled_keeps_access_until_period_end() {
        let sub = sample(SubscriptionStatus::Cancelled);
        assert!(sub.entitles_pro(Utc::now()));
        assert!(!sub.entitles_pro(sub.current_period_end + Duration::seconds(1)));
    }

    #[test]
    fn test_grace_without_end_is_not_pro() {
        assert!(!sample(SubscriptionStatus::Grace).entitles_pro(Utc::now()));
    }

    #[test]
    fn test_expired_is_not_pro() {
        assert!(!sample(SubscriptionStatus::Expired).entitles_pro(Utc::now()));
    }
}
