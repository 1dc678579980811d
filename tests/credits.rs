//! Integration tests for the credit ledger: FIFO consumption, grant
//! idempotency, expiration, and concurrency.

mod common;

use chrono::{Duration, Utc};
use taskwell::credits;
use taskwell::domain::CreditType;

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn fifo_consumption_drains_classes_in_order() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;
    let mut tx = pool.begin().await.expect("begin");
    let now = Utc::now();

    // Grants in creation order: daily 10 (expires tomorrow), sub 100,
    // purchased 20, kickstart 5.
    credits::grant_daily(&mut *tx, user.id, 10, now)
        .await
        .expect("daily")
        .expect("fresh grant");
    credits::grant_monthly(&mut *tx, user.id, 100, now + Duration::days(30), "sub_42")
        .await
        .expect("monthly");
    credits::grant_purchased(&mut *tx, user.id, 20, "order_1", 500, now)
        .await
        .expect("purchased");
    credits::grant_kickstart(&mut *tx, user.id, 5)
        .await
        .expect("kickstart")
        .expect("fresh grant");

    // Consume 15: all 10 daily plus 5 subscription.
    let receipt = credits::consume(&mut *tx, user.id, 15, "test")
        .await
        .expect("consume");
    assert_eq!(receipt.consumed_by_class.get(&CreditType::Daily), Some(&10));
    assert_eq!(
        receipt.consumed_by_class.get(&CreditType::Subscription),
        Some(&5)
    );
    assert_eq!(receipt.balance_after, 120);

    let balance = credits::balance(&mut *tx, user.id, now).await.expect("balance");
    assert_eq!(balance.daily, 0);
    assert_eq!(balance.subscription, 95);
    assert_eq!(balance.purchased, 20);
    assert_eq!(balance.kickstart, 5);
    assert_eq!(balance.total(), 120);

    // Consume 130 exceeds the remaining balance; nothing changes.
    let err = credits::consume(&mut *tx, user.id, 130, "test")
        .await
        .expect_err("should be rejected");
    assert!(matches!(
        err,
        credits::CreditError::InsufficientCredits {
            available: 120,
            requested: 130
        }
    ));
    let unchanged = credits::balance(&mut *tx, user.id, now).await.expect("balance");
    assert_eq!(unchanged.total(), 120);

    tx.rollback().await.expect("rollback");
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn kickstart_grant_is_once_ever() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;
    let mut conn = pool.acquire().await.expect("acquire");

    let first = credits::grant_kickstart(&mut conn, user.id, 25)
        .await
        .expect("grant");
    assert!(first.is_some());
    let second = credits::grant_kickstart(&mut conn, user.id, 25)
        .await
        .expect("grant");
    assert!(second.is_none());

    let balance = credits::balance(&mut conn, user.id, Utc::now())
        .await
        .expect("balance");
    assert_eq!(balance.kickstart, 25);
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn daily_grant_is_idempotent_per_utc_day() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;
    let mut conn = pool.acquire().await.expect("acquire");
    let now = Utc::now();

    assert!(credits::grant_daily(&mut conn, user.id, 10, now)
        .await
        .expect("grant")
        .is_some());
    assert!(credits::grant_daily(&mut conn, user.id, 10, now)
        .await
        .expect("grant")
        .is_none());

    let balance = credits::balance(&mut conn, user.id, now).await.expect("balance");
    assert_eq!(balance.daily, 10);
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn expire_sweep_writes_expire_rows_and_flags_grants() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;
    let mut conn = pool.acquire().await.expect("acquire");

    // A daily grant issued yesterday, now past its midnight expiry.
    let yesterday = Utc::now() - Duration::days(1);
    credits::grant_daily(&mut conn, user.id, 10, yesterday)
        .await
        .expect("grant")
        .expect("fresh");

    let mut tx = pool.begin().await.expect("begin");
    let summary = credits::expire_due(&mut *tx, Utc::now(), 50)
        .await
        .expect("sweep");
    tx.commit().await.expect("commit");
    assert!(summary.expired_rows >= 1);
    assert!(summary.expired_units >= 10);

    let balance = credits::balance(&mut conn, user.id, Utc::now())
        .await
        .expect("balance");
    assert_eq!(balance.daily, 0);
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn subscription_carryover_caps_at_fifty() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;
    let mut conn = pool.acquire().await.expect("acquire");

    // Period ended an hour ago with 80 units left: 50 carry, 30 expire.
    let period_end = Utc::now() - Duration::hours(1);
    credits::grant_monthly(&mut conn, user.id, 80, period_end, "sub_carry")
        .await
        .expect("grant");

    let mut tx = pool.begin().await.expect("begin");
    let summary = credits::expire_due(&mut *tx, Utc::now(), 50)
        .await
        .expect("sweep");
    tx.commit().await.expect("commit");

    assert_eq!(summary.carried_over, 50);
    assert_eq!(summary.expired_units, 30);

    let balance = credits::balance(&mut conn, user.id, Utc::now())
        .await
        .expect("balance");
    assert_eq!(balance.subscription, 50);
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn purchase_cap_is_per_calendar_month() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;
    let mut conn = pool.acquire().await.expect("acquire");
    let now = Utc::now();

    credits::grant_purchased(&mut conn, user.id, 450, "o1", 500, now)
        .await
        .expect("grant within cap");
    let err = credits::grant_purchased(&mut conn, user.id, 100, "o2", 500, now)
        .await
        .expect_err("cap exceeded");
    assert!(matches!(
        err,
        credits::CreditError::PurchaseLimitExceeded { purchased: 450, .. }
    ));
    // Topping up to exactly the cap is fine.
    credits::grant_purchased(&mut conn, user.id, 50, "o3", 500, now)
        .await
        .expect("grant to cap");
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn concurrent_consumes_never_overdraw() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;
    {
        let mut conn = pool.acquire().await.expect("acquire");
        credits::grant_kickstart(&mut conn, user.id, 10)
            .await
            .expect("grant")
            .expect("fresh");
    }

    // Two concurrent consumes of 7 against a balance of 10: exactly one
    // may succeed.
    let run = |pool: sqlx::PgPool, user_id: uuid::Uuid| async move {
        let mut tx = pool.begin().await.expect("begin");
        match credits::consume(&mut *tx, user_id, 7, "race").await {
            Ok(_) => {
                tx.commit().await.expect("commit");
                true
            }
            Err(_) => {
                tx.rollback().await.expect("rollback");
                false
            }
        }
    };
    let (a, b) = tokio::join!(run(pool.clone(), user.id), run(pool.clone(), user.id));
    assert!(a ^ b, "exactly one concurrent consume must succeed");

    let mut conn = pool.acquire().await.expect("acquire");
    let balance = credits::balance(&mut conn, user.id, Utc::now())
        .await
        .expect("balance");
    assert_eq!(balance.total(), 3);
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn refund_restores_consumed_classes() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;
    let mut tx = pool.begin().await.expect("begin");
    let now = Utc::now();

    credits::grant_daily(&mut *tx, user.id, 5, now)
        .await
        .expect("daily")
        .expect("fresh");
    credits::grant_kickstart(&mut *tx, user.id, 5)
        .await
        .expect("kickstart")
        .expect("fresh");

    let receipt = credits::consume(&mut *tx, user.id, 8, "op").await.expect("consume");
    credits::refund(&mut *tx, user.id, &receipt, "op.refund")
        .await
        .expect("refund");
    tx.commit().await.expect("commit");

    let mut conn = pool.acquire().await.expect("acquire");
    let balance = credits::balance(&mut conn, user.id, now).await.expect("balance");
    assert_eq!(balance.total(), 10);
}
