//! Subscription lifecycle engine.
//!
//! States: active, past_due, grace, cancelled, expired. Transitions are
//! driven only by payment webhooks and the daily maintenance job; the
//! user's `tier` column is mutated exclusively here. Webhook processing
//! is idempotent on the vendor event id via the `webhook_events` ledger.

pub mod signature;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use sqlx::PgConnection;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::TaskwellConfig;
use crate::credits;
use crate::domain::{NotificationType, Subscription, SubscriptionStatus, UserTier};
use crate::events::{DomainEvent, EventBus, EventMeta};
use crate::store::{notifications, users, webhook_events, StoreError};

/// Consecutive failures that open the grace window.
const GRACE_AFTER_FAILURES: i32 = 3;

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, checkout_subscription_id, status, \
     current_period_start, current_period_end, grace_period_end, grace_warning_sent, \
     failed_payment_count, last_payment_at, cancelled_at, created_at, updated_at";

// ── Errors ──────────────────────────────────────────────────────

/// Errors from the subscription engine.
#[derive(Debug, Error)]
pub enum BillingError {
    /// No subscription matches the vendor id or user.
    #[error("subscription not found")]
    SubscriptionNotFound,

    /// The subscription is already cancelled or expired.
    #[error("subscription already {0:?}")]
    AlreadyTerminal(SubscriptionStatus),

    /// Webhook payload missing or malforming a required field.
    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),

    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Credit ledger failure during a grant.
    #[error(transparent)]
    Credit(#[from] credits::CreditError),

    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

// ── Webhook contract ────────────────────────────────────────────

/// A parsed checkout webhook.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    /// Vendor-unique event id; the idempotency key.
    pub event_id: String,
    /// Event type string.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload.
    pub data: WebhookData,
}

/// Payload fields used by the engine.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    /// Vendor subscription id.
    pub subscription_id: String,
    /// Our user id (present on capture events).
    pub user_id: Option<Uuid>,
    /// Billing period start (capture events).
    pub period_start: Option<DateTime<Utc>>,
    /// Billing period end (capture events).
    pub period_end: Option<DateTime<Utc>>,
}

/// Outcome of webhook processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// State was advanced.
    Processed,
    /// Same event id seen before; nothing changed.
    Duplicate,
    /// Event type we do not consume; acknowledged and dropped.
    Ignored,
}

/// Process one webhook event idempotently.
///
/// Duplicate `event_id`s are dropped before any state is touched, so a
/// replayed delivery sequence has the same effect as the deduplicated one.
/// Lifecycle transitions dispatch their domain events on the same
/// connection so the audit trail commits with the state change.
pub async fn process_webhook(
    conn: &mut PgConnection,
    config: &TaskwellConfig,
    bus: &EventBus,
    event: &WebhookEvent,
) -> Result<WebhookOutcome, BillingError> {
    let fresh = webhook_events::mark_processed(conn, &event.event_id, &event.event_type).await?;
    if !fresh {
        info!(event_id = %event.event_id, "duplicate webhook event, skipping");
        return Ok(WebhookOutcome::Duplicate);
    }

    match event.event_type.as_str() {
        "payment_captured" | "subscription_renewed" => {
            let user_id = event
                .data
                .user_id
                .ok_or_else(|| BillingError::InvalidPayload("missing user_id".to_owned()))?;
            let period_start = event.data.period_start.ok_or_else(|| {
                BillingError::InvalidPayload("missing period_start".to_owned())
            })?;
            let period_end = event
                .data
                .period_end
                .ok_or_else(|| BillingError::InvalidPayload("missing period_end".to_owned()))?;
            let (subscription, created) = handle_payment_captured(
                conn,
                config,
                user_id,
                &event.data.subscription_id,
                period_start,
                period_end,
            )
            .await?;
            if created {
                bus.dispatch(
                    DomainEvent::SubscriptionCreated {
                        meta: EventMeta::system(subscription.user_id),
                        subscription_id: subscription.id,
                    },
                    conn,
                    config,
                )
                .await;
            }
            Ok(WebhookOutcome::Processed)
        }
        "payment_declined" => {
            handle_payment_declined(conn, config, &event.data.subscription_id).await?;
            Ok(WebhookOutcome::Processed)
        }
        "subscription_cancelled" => {
            let subscription =
                handle_subscription_cancelled(conn, &event.data.subscription_id).await?;
            bus.dispatch(
                DomainEvent::SubscriptionCancelled {
                    meta: EventMeta::system(subscription.user_id),
                    subscription_id: subscription.id,
                },
                conn,
                config,
            )
            .await;
            Ok(WebhookOutcome::Processed)
        }
        other => {
            warn!(event_type = %other, "unhandled webhook event type");
            Ok(WebhookOutcome::Ignored)
        }
    }
}

// ── Transitions ─────────────────────────────────────────────────

async fn find_by_checkout_id(
    conn: &mut PgConnection,
    checkout_subscription_id: &str,
) -> Result<Option<Subscription>, BillingError> {
    let row = sqlx::query_as::<_, Subscription>(&format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
         WHERE checkout_subscription_id = $1 FOR UPDATE"
    ))
    .bind(checkout_subscription_id)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

/// A successful capture (first payment or renewal): subscription goes
/// active, failure counters and grace state reset, the user becomes pro,
/// and the monthly credit grant is applied. The boolean reports whether
/// the subscription row was newly created.
pub async fn handle_payment_captured(
    conn: &mut PgConnection,
    config: &TaskwellConfig,
    user_id: Uuid,
    checkout_subscription_id: &str,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> Result<(Subscription, bool), BillingError> {
    let existing = find_by_checkout_id(&mut *conn, checkout_subscription_id).await?;
    let created = existing.is_none();

    let subscription = match existing {
        None => {
            sqlx::query_as::<_, Subscription>(&format!(
                "INSERT INTO subscriptions
                     (id, user_id, checkout_subscription_id, status,
                      current_period_start, current_period_end, last_payment_at)
                 VALUES ($1, $2, $3, 'active', $4, $5, now())
                 RETURNING {SUBSCRIPTION_COLUMNS}"
            ))
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(checkout_subscription_id)
            .bind(period_start)
            .bind(period_end)
            .fetch_one(&mut *conn)
            .await?
        }
        Some(sub) => {
            sqlx::query_as::<_, Subscription>(&format!(
                "UPDATE subscriptions SET
                     status = 'active',
                     current_period_start = $1, current_period_end = $2,
                     last_payment_at = now(), failed_payment_count = 0,
                     grace_period_end = NULL, grace_warning_sent = FALSE,
                     cancelled_at = NULL, updated_at = now()
                 WHERE id = $3
                 RETURNING {SUBSCRIPTION_COLUMNS}"
            ))
            .bind(period_start)
            .bind(period_end)
            .bind(sub.id)
            .fetch_one(&mut *conn)
            .await?
        }
    };

    users::set_tier(&mut *conn, user_id, UserTier::Pro).await?;
    credits::grant_monthly(
        &mut *conn,
        user_id,
        config.credits.monthly_amount,
        period_end,
        checkout_subscription_id,
    )
    .await?;

    info!(
        user_id = %user_id,
        subscription = %checkout_subscription_id,
        period_end = %period_end,
        created,
        "payment captured, subscription active"
    );
    Ok((subscription, created))
}

/// A declined payment: count the failure; the third consecutive one opens
/// the 7-day grace window and notifies the user. Declines during grace
/// are no-ops.
pub async fn handle_payment_declined(
    conn: &mut PgConnection,
    config: &TaskwellConfig,
    checkout_subscription_id: &str,
) -> Result<Subscription, BillingError> {
    let subscription = find_by_checkout_id(&mut *conn, checkout_subscription_id)
        .await?
        .ok_or(BillingError::SubscriptionNotFound)?;

    if subscription.status == SubscriptionStatus::Grace {
        info!(subscription = %checkout_subscription_id, "decline during grace, no-op");
        return Ok(subscription);
    }

    let failures = subscription.failed_payment_count + 1;
    let (status, grace_end) = if failures >= GRACE_AFTER_FAILURES {
        (
            SubscriptionStatus::Grace,
            Some(Utc::now() + Duration::days(config.checkout.grace_period_days)),
        )
    } else {
        (SubscriptionStatus::PastDue, None)
    };

    let updated = sqlx::query_as::<_, Subscription>(&format!(
        "UPDATE subscriptions SET
             status = $1, failed_payment_count = $2, grace_period_end = $3,
             updated_at = now()
         WHERE id = $4
         RETURNING {SUBSCRIPTION_COLUMNS}"
    ))
    .bind(status)
    .bind(failures)
    .bind(grace_end)
    .bind(subscription.id)
    .fetch_one(&mut *conn)
    .await?;

    if status == SubscriptionStatus::Grace {
        info!(
            subscription = %checkout_subscription_id,
            failures,
            grace_end = ?grace_end,
            "subscription entered grace period"
        );
        notifications::create(
            conn,
            updated.user_id,
            NotificationType::Subscription,
            "Payment failed",
            &format!(
                "Your payment has failed {failures} times. You have {} days to update \
                 your payment method before Pro access expires.",
                config.checkout.grace_period_days
            ),
            Some("/settings/subscription"),
        )
        .await?;
    } else {
        info!(
            subscription = %checkout_subscription_id,
            failures,
            "payment declined"
        );
    }

    Ok(updated)
}

/// A vendor-side cancellation: mark cancelled, access retained until
/// period end (the daily job expires it).
pub async fn handle_subscription_cancelled(
    conn: &mut PgConnection,
    checkout_subscription_id: &str,
) -> Result<Subscription, BillingError> {
    let subscription = find_by_checkout_id(&mut *conn, checkout_subscription_id)
        .await?
        .ok_or(BillingError::SubscriptionNotFound)?;

    if matches!(
        subscription.status,
        SubscriptionStatus::Cancelled | SubscriptionStatus::Expired
    ) {
        return Ok(subscription);
    }

    let updated = mark_cancelled(conn, subscription.id).await?;
    info!(
        subscription = %checkout_subscription_id,
        access_until = %updated.current_period_end,
        "subscription cancelled"
    );
    Ok(updated)
}

/// User-initiated cancellation through the API.
pub async fn cancel_for_user(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> Result<Subscription, BillingError> {
    let subscription = get_for_user(&mut *conn, user_id)
        .await?
        .ok_or(BillingError::SubscriptionNotFound)?;
    if matches!(
        subscription.status,
        SubscriptionStatus::Cancelled | SubscriptionStatus::Expired
    ) {
        return Err(BillingError::AlreadyTerminal(subscription.status));
    }
    mark_cancelled(conn, subscription.id).await
}

async fn mark_cancelled(
    conn: &mut PgConnection,
    subscription_id: Uuid,
) -> Result<Subscription, BillingError> {
    let updated = sqlx::query_as::<_, Subscription>(&format!(
        "UPDATE subscriptions SET
             status = 'cancelled', cancelled_at = now(), updated_at = now()
         WHERE id = $1
         RETURNING {SUBSCRIPTION_COLUMNS}"
    ))
    .bind(subscription_id)
    .fetch_one(conn)
    .await?;
    Ok(updated)
}

// ── Daily maintenance ───────────────────────────────────────────

/// Outcome of the daily subscription sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscriptionSweep {
    /// Grace windows that closed (tier dropped).
    pub grace_expired: u64,
    /// Cancelled subscriptions whose period ended (tier dropped).
    pub cancelled_expired: u64,
    /// Grace warnings sent.
    pub warnings_sent: u64,
}

/// Apply grace→expired and cancelled→expired transitions, downgrading
/// tiers, and send grace warnings coming due.
pub async fn daily_sweep(
    conn: &mut PgConnection,
    config: &TaskwellConfig,
    now: DateTime<Utc>,
) -> Result<SubscriptionSweep, BillingError> {
    let mut sweep = SubscriptionSweep::default();

    // Grace windows that ran out.
    let graced = sqlx::query_as::<_, Subscription>(&format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
         WHERE status = 'grace' AND grace_period_end <= $1
         FOR UPDATE"
    ))
    .bind(now)
    .fetch_all(&mut *conn)
    .await?;

    for subscription in graced {
        expire(&mut *conn, &subscription).await?;
        notifications::create(
            &mut *conn,
            subscription.user_id,
            NotificationType::Subscription,
            "Subscription expired",
            "Your Pro subscription has expired and your account is back on the \
             free tier. Upgrade again to restore Pro features.",
            Some("/settings/subscription"),
        )
        .await?;
        sweep.grace_expired += 1;
    }

    // Cancelled subscriptions whose paid period ended.
    let cancelled = sqlx::query_as::<_, Subscription>(&format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
         WHERE status = 'cancelled' AND current_period_end <= $1
         FOR UPDATE"
    ))
    .bind(now)
    .fetch_all(&mut *conn)
    .await?;

    for subscription in cancelled {
        expire(&mut *conn, &subscription).await?;
        sweep.cancelled_expired += 1;
    }

    // Grace warnings within the warning window, not yet sent.
    let warn_cutoff = now + Duration::days(config.checkout.grace_warning_days);
    let warnable = sqlx::query_as::<_, Subscription>(&format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
         WHERE status = 'grace' AND grace_warning_sent = FALSE
           AND grace_period_end > $1 AND grace_period_end <= $2
         FOR UPDATE"
    ))
    .bind(now)
    .bind(warn_cutoff)
    .fetch_all(&mut *conn)
    .await?;

    for subscription in warnable {
        let days_left = (subscription
            .grace_period_end
            .map(|end| end - now)
            .unwrap_or_else(|| Duration::days(0)))
        .num_days()
        .max(0);
        notifications::create(
            &mut *conn,
            subscription.user_id,
            NotificationType::Subscription,
            "Pro access expiring soon",
            &format!(
                "Your payment grace period ends in {days_left} day(s). Update your \
                 payment method to keep Pro access."
            ),
            Some("/settings/subscription"),
        )
        .await?;
        sqlx::query(
            "UPDATE subscriptions SET grace_warning_sent = TRUE, updated_at = now()
             WHERE id = $1",
        )
        .bind(subscription.id)
        .execute(&mut *conn)
        .await?;
        sweep.warnings_sent += 1;
    }

    if sweep.grace_expired > 0 || sweep.cancelled_expired > 0 || sweep.warnings_sent > 0 {
        info!(
            grace_expired = sweep.grace_expired,
            cancelled_expired = sweep.cancelled_expired,
            warnings_sent = sweep.warnings_sent,
            "subscription sweep complete"
        );
    }
    Ok(sweep)
}

async fn expire(
    conn: &mut PgConnection,
    subscription: &Subscription,
) -> Result<(), BillingError> {
    sqlx::query("UPDATE subscriptions SET status = 'expired', updated_at = now() WHERE id = $1")
        .bind(subscription.id)
        .execute(&mut *conn)
        .await?;
    users::set_tier(conn, subscription.user_id, UserTier::Free).await?;
    info!(user_id = %subscription.user_id, "subscription expired, user downgraded");
    Ok(())
}

// ── Queries ─────────────────────────────────────────────────────

/// The user's subscription, if any.
pub async fn get_for_user(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> Result<Option<Subscription>, BillingError> {
    let row = sqlx::query_as::<_, Subscription>(&format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = $1"
    ))
    .bind(user_id)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

/// Read-time tier: the stored tier, downgraded unless some subscription
/// state still entitles pro. Cancelled-but-paid keeps pro until its
/// period end even though the daily sweep has not run yet.
pub fn effective_tier(
    stored: UserTier,
    subscription: Option<&Subscription>,
    now: DateTime<Utc>,
) -> UserTier {
    match stored {
        UserTier::Free => UserTier::Free,
        UserTier::Pro => match subscription {
            Some(sub) if sub.entitles_pro(now) => UserTier::Pro,
            // Pro without a subscription row only happens between manual
            // grants; treat the stored tier as authoritative.
            None => UserTier::Pro,
            Some(_) => UserTier::Free,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription(status: SubscriptionStatus) -> Subscription {
        let now = Utc::now();
        Subscription {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            checkout_subscription_id: "sub_42".to_owned(),
            status,
            current_period_start: now - Duration::days(15),
            current_period_end: now + Duration::days(15),
            grace_period_end: None,
            grace_warning_sent: false,
            failed_payment_count: 0,
            last_payment_at: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_effective_tier_free_stays_free() {
        assert_eq!(
            effective_tier(UserTier::Free, None, Utc::now()),
            UserTier::Free
        );
    }

    #[test]
    fn test_effective_tier_cancelled_keeps_pro_until_period_end() {
        let sub = subscription(SubscriptionStatus::Cancelled);
        assert_eq!(
            effective_tier(UserTier::Pro, Some(&sub), Utc::now()),
            UserTier::Pro
        );
        assert_eq!(
            effective_tier(
                UserTier::Pro,
                Some(&sub),
                sub.current_period_end + Duration::seconds(1)
            ),
            UserTier::Free
        );
    }

    #[test]
    fn test_effective_tier_expired_subscription_downgrades() {
        let sub = subscription(SubscriptionStatus::Expired);
        assert_eq!(
            effective_tier(UserTier::Pro, Some(&sub), Utc::now()),
            UserTier::Free
        );
    }
}
