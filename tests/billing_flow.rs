//! Integration tests for the subscription lifecycle and webhook
//! idempotency.

mod common;

use chrono::{Duration, Utc};
use taskwell::billing::{self, WebhookData, WebhookEvent, WebhookOutcome};
use taskwell::credits;
use taskwell::domain::{SubscriptionStatus, UserTier};
use taskwell::events::EventBus;
use taskwell::store::users;

fn capture_event(event_id: &str, user_id: uuid::Uuid, sub_id: &str) -> WebhookEvent {
    WebhookEvent {
        event_id: event_id.to_owned(),
        event_type: "payment_captured".to_owned(),
        data: WebhookData {
            subscription_id: sub_id.to_owned(),
            user_id: Some(user_id),
            period_start: Some(Utc::now()),
            period_end: Some(Utc::now() + Duration::days(30)),
        },
    }
}

fn declined_event(event_id: &str, sub_id: &str) -> WebhookEvent {
    WebhookEvent {
        event_id: event_id.to_owned(),
        event_type: "payment_declined".to_owned(),
        data: WebhookData {
            subscription_id: sub_id.to_owned(),
            user_id: None,
            period_start: None,
            period_end: None,
        },
    }
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn capture_activates_pro_and_grants_monthly_credits_once() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;
    let config = common::test_config();
    let bus: EventBus = common::test_bus();
    let sub_id = format!("sub_{}", uuid::Uuid::new_v4().simple());

    // First delivery: user goes pro, a monthly grant appears.
    let mut tx = pool.begin().await.expect("begin");
    let outcome = billing::process_webhook(
        &mut *tx,
        &config,
        &bus,
        &capture_event("evt_1", user.id, &sub_id),
    )
    .await
    .expect("process");
    tx.commit().await.expect("commit");
    assert_eq!(outcome, WebhookOutcome::Processed);

    let mut conn = pool.acquire().await.expect("acquire");
    let updated = users::get(&mut conn, user.id).await.expect("user");
    assert_eq!(updated.tier, UserTier::Pro);
    let balance = credits::balance(&mut conn, user.id, Utc::now())
        .await
        .expect("balance");
    assert_eq!(balance.subscription, config.credits.monthly_amount);

    // Duplicate event id: dropped, no second grant, still pro.
    let mut tx = pool.begin().await.expect("begin");
    let outcome = billing::process_webhook(
        &mut *tx,
        &config,
        &bus,
        &capture_event("evt_1", user.id, &sub_id),
    )
    .await
    .expect("process");
    tx.commit().await.expect("commit");
    assert_eq!(outcome, WebhookOutcome::Duplicate);

    let balance = credits::balance(&mut conn, user.id, Utc::now())
        .await
        .expect("balance");
    assert_eq!(balance.subscription, config.credits.monthly_amount);
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn third_decline_opens_grace_with_notification() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;
    let config = common::test_config();
    let bus: EventBus = common::test_bus();
    let sub_id = format!("sub_{}", uuid::Uuid::new_v4().simple());

    let mut tx = pool.begin().await.expect("begin");
    billing::process_webhook(&mut *tx, &config, &bus, &capture_event("cap_1", user.id, &sub_id))
        .await
        .expect("capture");
    tx.commit().await.expect("commit");

    // Declines 1 and 2: past_due.
    for event_id in ["dec_1", "dec_2"] {
        let mut tx = pool.begin().await.expect("begin");
        billing::process_webhook(&mut *tx, &config, &bus, &declined_event(event_id, &sub_id))
            .await
            .expect("decline");
        tx.commit().await.expect("commit");
    }
    let mut conn = pool.acquire().await.expect("acquire");
    let sub = billing::get_for_user(&mut conn, user.id)
        .await
        .expect("sub")
        .expect("exists");
    assert_eq!(sub.status, SubscriptionStatus::PastDue);
    assert_eq!(sub.failed_payment_count, 2);

    // Decline 3: grace opens, warning notification written.
    let mut tx = pool.begin().await.expect("begin");
    billing::process_webhook(&mut *tx, &config, &bus, &declined_event("dec_3", &sub_id))
        .await
        .expect("decline");
    tx.commit().await.expect("commit");

    let sub = billing::get_for_user(&mut conn, user.id)
        .await
        .expect("sub")
        .expect("exists");
    assert_eq!(sub.status, SubscriptionStatus::Grace);
    assert!(sub.grace_period_end.is_some());

    let notifications =
        taskwell::store::notifications::list(&mut conn, user.id, false, 0, 10)
            .await
            .expect("list");
    assert!(notifications
        .items
        .iter()
        .any(|n| n.title.contains("Payment failed")));

    // A decline during grace changes nothing.
    let mut tx = pool.begin().await.expect("begin");
    billing::process_webhook(&mut *tx, &config, &bus, &declined_event("dec_4", &sub_id))
        .await
        .expect("decline");
    tx.commit().await.expect("commit");
    let after = billing::get_for_user(&mut conn, user.id)
        .await
        .expect("sub")
        .expect("exists");
    assert_eq!(after.status, SubscriptionStatus::Grace);
    assert_eq!(after.grace_period_end, sub.grace_period_end);

    // A capture during grace restores active and clears counters.
    let mut tx = pool.begin().await.expect("begin");
    billing::process_webhook(&mut *tx, &config, &bus, &capture_event("cap_2", user.id, &sub_id))
        .await
        .expect("capture");
    tx.commit().await.expect("commit");
    let restored = billing::get_for_user(&mut conn, user.id)
        .await
        .expect("sub")
        .expect("exists");
    assert_eq!(restored.status, SubscriptionStatus::Active);
    assert_eq!(restored.failed_payment_count, 0);
    assert!(restored.grace_period_end.is_none());
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn daily_sweep_expires_lapsed_grace_and_downgrades() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;
    let config = common::test_config();
    let bus: EventBus = common::test_bus();
    let sub_id = format!("sub_{}", uuid::Uuid::new_v4().simple());

    let mut tx = pool.begin().await.expect("begin");
    billing::process_webhook(&mut *tx, &config, &bus, &capture_event("cap_g", user.id, &sub_id))
        .await
        .expect("capture");
    for event_id in ["g_1", "g_2", "g_3"] {
        billing::process_webhook(&mut *tx, &config, &bus, &declined_event(event_id, &sub_id))
            .await
            .expect("decline");
    }
    tx.commit().await.expect("commit");

    // Lapse the grace window.
    sqlx::query(
        "UPDATE subscriptions SET grace_period_end = now() - interval '1 hour'
         WHERE checkout_subscription_id = $1",
    )
    .bind(&sub_id)
    .execute(&pool)
    .await
    .expect("lapse");

    let mut tx = pool.begin().await.expect("begin");
    let sweep = billing::daily_sweep(&mut *tx, &config, Utc::now())
        .await
        .expect("sweep");
    tx.commit().await.expect("commit");
    assert!(sweep.grace_expired >= 1);

    let mut conn = pool.acquire().await.expect("acquire");
    let sub = billing::get_for_user(&mut conn, user.id)
        .await
        .expect("sub")
        .expect("exists");
    assert_eq!(sub.status, SubscriptionStatus::Expired);
    let downgraded = users::get(&mut conn, user.id).await.expect("user");
    assert_eq!(downgraded.tier, UserTier::Free);
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn cancelled_subscription_keeps_pro_until_period_end() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;
    let config = common::test_config();
    let bus: EventBus = common::test_bus();
    let sub_id = format!("sub_{}", uuid::Uuid::new_v4().simple());

    let mut tx = pool.begin().await.expect("begin");
    billing::process_webhook(&mut *tx, &config, &bus, &capture_event("cap_c", user.id, &sub_id))
        .await
        .expect("capture");
    billing::handle_subscription_cancelled(&mut *tx, &sub_id)
        .await
        .expect("cancel");
    tx.commit().await.expect("commit");

    let mut conn = pool.acquire().await.expect("acquire");
    let sub = billing::get_for_user(&mut conn, user.id)
        .await
        .expect("sub")
        .expect("exists");
    assert_eq!(sub.status, SubscriptionStatus::Cancelled);

    // Read-time tier stays pro while the paid period runs.
    let stored = users::get(&mut conn, user.id).await.expect("user");
    assert_eq!(
        billing::effective_tier(stored.tier, Some(&sub), Utc::now()),
        UserTier::Pro
    );

    // Once the period lapses, the sweep expires it and drops the tier.
    sqlx::query(
        "UPDATE subscriptions SET current_period_end = now() - interval '1 hour'
         WHERE checkout_subscription_id = $1",
    )
    .bind(&sub_id)
    .execute(&pool)
    .await
    .expect("lapse");

    let mut tx = pool.begin().await.expect("begin");
    let sweep = billing::daily_sweep(&mut *tx, &config, Utc::now())
        .await
        .expect("sweep");
    tx.commit().await.expect("commit");
    assert!(sweep.cancelled_expired >= 1);

    let downgraded = users::get(&mut conn, user.id).await.expect("user");
    assert_eq!(downgraded.tier, UserTier::Free);
}
