//! Integration tests for tombstones and task recovery.

mod common;

use taskwell::achievements;
use taskwell::domain::SubtaskSource;
use taskwell::recovery::{self, RecoveryError};
use taskwell::store::{reminders, subtasks, tasks, tombstones};

fn new_task(title: &str) -> tasks::NewTask {
    tasks::NewTask {
        title: title.to_owned(),
        description: None,
        priority: Default::default(),
        due_date: None,
        estimated_minutes: None,
        template_id: None,
    }
}

/// Delete a task the way the API does: tombstone, then hard delete.
async fn delete_with_tombstone(
    pool: &sqlx::PgPool,
    user_id: uuid::Uuid,
    task_id: uuid::Uuid,
) -> uuid::Uuid {
    let mut tx = pool.begin().await.expect("begin");
    let task = tasks::get_for_update(&mut *tx, user_id, task_id)
        .await
        .expect("task");
    let task_subtasks = subtasks::list_unchecked(&mut *tx, task_id)
        .await
        .expect("subtasks");
    let task_reminders = reminders::list_for_task(&mut *tx, user_id, task_id)
        .await
        .expect("reminders");
    let tombstone =
        recovery::tombstone_task(&mut *tx, user_id, &task, task_subtasks, task_reminders)
            .await
            .expect("tombstone");
    tasks::hard_delete(&mut *tx, user_id, task_id)
        .await
        .expect("delete");
    tx.commit().await.expect("commit");
    tombstone.id
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn recover_restores_task_and_subtasks_under_original_id() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;
    let bus = common::test_bus();
    let config = common::test_config();

    let mut tx = pool.begin().await.expect("begin");
    let task = tasks::create(&mut *tx, user.id, new_task("doomed"), 50, 1000)
        .await
        .expect("task");
    for title in ["first", "second"] {
        subtasks::create(&mut *tx, user.id, task.id, title, SubtaskSource::User, 10)
            .await
            .expect("subtask");
    }
    tx.commit().await.expect("commit");

    let tombstone_id = delete_with_tombstone(&pool, user.id, task.id).await;

    {
        let mut conn = pool.acquire().await.expect("acquire");
        assert!(tasks::get(&mut conn, user.id, task.id).await.is_err());
    }

    let mut tx = pool.begin().await.expect("begin");
    let recovered = recovery::recover_task(&mut *tx, &config, &bus, user.id, tombstone_id, None)
        .await
        .expect("recover");
    tx.commit().await.expect("commit");

    assert_eq!(recovered.id, task.id);
    assert_eq!(recovered.created_at, task.created_at);

    let mut conn = pool.acquire().await.expect("acquire");
    let restored_subtasks = subtasks::list_unchecked(&mut conn, task.id)
        .await
        .expect("subtasks");
    assert_eq!(restored_subtasks.len(), 2);
    assert_eq!(restored_subtasks[0].order_index, 0);
    assert_eq!(restored_subtasks[1].order_index, 1);

    // The tombstone is gone.
    assert!(tombstones::get(&mut conn, user.id, tombstone_id).await.is_err());

    // Recovery counted nothing toward achievements.
    let state = achievements::state(&mut conn, user.id)
        .await
        .expect("state")
        .expect("row");
    assert_eq!(state.lifetime_tasks_completed, 0);
    assert_eq!(state.current_streak, 0);
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn ring_buffer_keeps_only_three_tombstones() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;

    let mut oldest_entity = None;
    for i in 0..4 {
        let mut tx = pool.begin().await.expect("begin");
        let task = tasks::create(&mut *tx, user.id, new_task(&format!("t{i}")), 50, 1000)
            .await
            .expect("task");
        tx.commit().await.expect("commit");
        if i == 0 {
            oldest_entity = Some(task.id);
        }
        delete_with_tombstone(&pool, user.id, task.id).await;
    }

    let mut conn = pool.acquire().await.expect("acquire");
    let remaining = tombstones::list(&mut conn, user.id).await.expect("list");
    assert_eq!(remaining.len(), 3);
    // The first delete's tombstone was dropped on the fourth.
    assert!(remaining
        .iter()
        .all(|t| Some(t.entity_id) != oldest_entity));
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn recovery_after_the_window_reads_as_not_found() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;
    let bus = common::test_bus();
    let config = common::test_config();

    let mut tx = pool.begin().await.expect("begin");
    let task = tasks::create(&mut *tx, user.id, new_task("stale"), 50, 1000)
        .await
        .expect("task");
    tx.commit().await.expect("commit");
    let tombstone_id = delete_with_tombstone(&pool, user.id, task.id).await;

    // Age the tombstone past 14 days.
    sqlx::query(
        "UPDATE deletion_tombstones SET deleted_at = now() - interval '15 days' WHERE id = $1",
    )
    .bind(tombstone_id)
    .execute(&pool)
    .await
    .expect("age");

    let mut tx = pool.begin().await.expect("begin");
    let err = recovery::recover_task(&mut *tx, &config, &bus, user.id, tombstone_id, None)
        .await
        .expect_err("window passed");
    assert!(matches!(err, RecoveryError::NotFound));
    tx.rollback().await.expect("rollback");
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn recovery_into_an_occupied_id_is_a_collision() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;
    let bus = common::test_bus();
    let config = common::test_config();

    let mut tx = pool.begin().await.expect("begin");
    let task = tasks::create(&mut *tx, user.id, new_task("twice"), 50, 1000)
        .await
        .expect("task");
    tx.commit().await.expect("commit");
    let tombstone_id = delete_with_tombstone(&pool, user.id, task.id).await;

    // Re-insert a row under the original id before recovering.
    {
        let mut conn = pool.acquire().await.expect("acquire");
        tasks::insert_with_id(&mut conn, &task).await.expect("occupy id");
    }

    let mut tx = pool.begin().await.expect("begin");
    let err = recovery::recover_task(&mut *tx, &config, &bus, user.id, tombstone_id, None)
        .await
        .expect_err("collision");
    assert!(matches!(err, RecoveryError::IdCollision));
    tx.rollback().await.expect("rollback");
}
