//! Integration tests for the durable job queue.

mod common;

use chrono::{Duration, Utc};
use serde_json::json;
use taskwell::domain::{JobStatus, JobType};
use taskwell::jobs;

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn claim_transitions_to_processing_with_lock() {
    let pool = common::test_pool().await;
    let mut conn = pool.acquire().await.expect("acquire");

    let job = jobs::enqueue(&mut conn, JobType::StreakCalculate, json!({}), None)
        .await
        .expect("enqueue");
    drop(conn);

    let claimed = jobs::claim_next(&pool, "w1")
        .await
        .expect("claim")
        .expect("a job is due");
    assert_eq!(claimed.id, job.id);
    assert_eq!(claimed.status, JobStatus::Processing);
    assert_eq!(claimed.locked_by.as_deref(), Some("w1"));
    assert_eq!(claimed.attempts, 1);
    assert!(claimed.locked_at.is_some());

    jobs::complete(&pool, claimed.id).await.expect("complete");
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn future_jobs_are_not_claimable() {
    let pool = common::test_pool().await;
    let mut conn = pool.acquire().await.expect("acquire");

    // Drain anything already due so the queue is quiet.
    while jobs::claim_next(&pool, "drain").await.expect("claim").is_some() {}

    let job = jobs::enqueue(
        &mut conn,
        JobType::CreditExpire,
        json!({}),
        Some(Utc::now() + Duration::hours(6)),
    )
    .await
    .expect("enqueue");

    assert!(jobs::claim_next(&pool, "w1").await.expect("claim").is_none());

    // Clean up: pull it forward and finish it.
    sqlx::query("UPDATE job_queue SET scheduled_at = now() WHERE id = $1")
        .bind(job.id)
        .execute(&pool)
        .await
        .expect("reschedule");
    let claimed = jobs::claim_next(&pool, "w1").await.expect("claim").expect("due now");
    jobs::complete(&pool, claimed.id).await.expect("complete");
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn concurrent_claims_hand_out_each_job_once() {
    let pool = common::test_pool().await;
    let mut conn = pool.acquire().await.expect("acquire");

    while jobs::claim_next(&pool, "drain").await.expect("claim").is_some() {}

    let mut expected = std::collections::HashSet::new();
    for _ in 0..5 {
        let job = jobs::enqueue(&mut conn, JobType::ActivityCleanup, json!({}), None)
            .await
            .expect("enqueue");
        expected.insert(job.id);
    }
    drop(conn);

    // Eight workers race for five jobs.
    let mut handles = Vec::new();
    for i in 0..8 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(job) = jobs::claim_next(&pool, &format!("w{i}"))
                .await
                .expect("claim")
            {
                claimed.push(job.id);
            }
            claimed
        }));
    }

    let mut seen = Vec::new();
    for handle in handles {
        seen.extend(handle.await.expect("join"));
    }

    // Exactly the five jobs, no duplicates.
    let unique: std::collections::HashSet<_> = seen.iter().copied().collect();
    assert_eq!(seen.len(), unique.len(), "a job was claimed twice");
    assert_eq!(unique, expected);

    for id in unique {
        jobs::complete(&pool, id).await.expect("complete");
    }
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn failure_requeues_with_backoff_then_dead_letters() {
    let pool = common::test_pool().await;
    let mut conn = pool.acquire().await.expect("acquire");

    while jobs::claim_next(&pool, "drain").await.expect("claim").is_some() {}
    let job = jobs::enqueue(&mut conn, JobType::SubscriptionCheck, json!({}), None)
        .await
        .expect("enqueue");
    drop(conn);

    // Attempt 1 fails: re-queued 60 s out.
    let claimed = jobs::claim_next(&pool, "w1").await.expect("claim").expect("due");
    let retried = jobs::fail(&pool, claimed.id, "boom", true).await.expect("fail");
    assert!(retried);

    let row: (JobStatus, chrono::DateTime<Utc>, Option<String>) = sqlx::query_as(
        "SELECT status, scheduled_at, last_error FROM job_queue WHERE id = $1",
    )
    .bind(job.id)
    .fetch_one(&pool)
    .await
    .expect("fetch");
    assert_eq!(row.0, JobStatus::Pending);
    assert!(row.1 > Utc::now() + Duration::seconds(30));
    assert_eq!(row.2.as_deref(), Some("boom"));

    // Burn the remaining attempts.
    for _ in 0..2 {
        sqlx::query("UPDATE job_queue SET scheduled_at = now() WHERE id = $1")
            .bind(job.id)
            .execute(&pool)
            .await
            .expect("reschedule");
        let claimed = jobs::claim_next(&pool, "w1").await.expect("claim").expect("due");
        jobs::fail(&pool, claimed.id, "boom again", true)
            .await
            .expect("fail");
    }

    let (status,): (JobStatus,) =
        sqlx::query_as("SELECT status FROM job_queue WHERE id = $1")
            .bind(job.id)
            .fetch_one(&pool)
            .await
            .expect("fetch");
    assert_eq!(status, JobStatus::Dead);

    // Manual reset re-queues with a clean slate.
    assert!(jobs::reset_dead(&pool, job.id).await.expect("reset"));
    let (status, attempts): (JobStatus, i32) =
        sqlx::query_as("SELECT status, attempts FROM job_queue WHERE id = $1")
            .bind(job.id)
            .fetch_one(&pool)
            .await
            .expect("fetch");
    assert_eq!(status, JobStatus::Pending);
    assert_eq!(attempts, 0);

    let claimed = jobs::claim_next(&pool, "w1").await.expect("claim").expect("due");
    jobs::complete(&pool, claimed.id).await.expect("complete");
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn stale_locks_are_released_back_to_pending() {
    let pool = common::test_pool().await;
    let mut conn = pool.acquire().await.expect("acquire");

    while jobs::claim_next(&pool, "drain").await.expect("claim").is_some() {}
    let job = jobs::enqueue(&mut conn, JobType::ReminderFire, json!({}), None)
        .await
        .expect("enqueue");
    drop(conn);

    let claimed = jobs::claim_next(&pool, "crashed-worker")
        .await
        .expect("claim")
        .expect("due");

    // Backdate the lock past the timeout.
    sqlx::query("UPDATE job_queue SET locked_at = now() - interval '20 minutes' WHERE id = $1")
        .bind(claimed.id)
        .execute(&pool)
        .await
        .expect("backdate");

    let released = jobs::release_stale_locks(&pool, 600).await.expect("release");
    assert!(released >= 1);

    let reclaimed = jobs::claim_next(&pool, "w2").await.expect("claim").expect("due");
    assert_eq!(reclaimed.id, job.id);
    assert_eq!(reclaimed.locked_by.as_deref(), Some("w2"));
    jobs::complete(&pool, reclaimed.id).await.expect("complete");
}
