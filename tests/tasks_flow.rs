//! Integration tests for the domain store: optimistic locking, subtask
//! ordering, caps, and cascade semantics.

mod common;

use chrono::{Duration, Utc};
use taskwell::domain::{CompletedBy, SubtaskSource};
use taskwell::store::{subtasks, tasks, templates, StoreError};

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

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn stale_version_update_conflicts_and_changes_nothing() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;

    let mut tx = pool.begin().await.expect("begin");
    let task = tasks::create(&mut *tx, user.id, new_task("contended"), 50, 1000)
        .await
        .expect("task");
    tx.commit().await.expect("commit");
    assert_eq!(task.version, 1);

    // Client B updates at version 1 and wins.
    let mut tx = pool.begin().await.expect("begin");
    let updated = tasks::update(
        &mut *tx,
        user.id,
        task.id,
        1,
        tasks::TaskPatch {
            title: Some("renamed by B".to_owned()),
            ..Default::default()
        },
        1000,
    )
    .await
    .expect("update");
    tx.commit().await.expect("commit");
    assert_eq!(updated.version, 2);

    // Client A still holds version 1 and loses.
    let mut tx = pool.begin().await.expect("begin");
    let err = tasks::update(
        &mut *tx,
        user.id,
        task.id,
        1,
        tasks::TaskPatch {
            title: Some("renamed by A".to_owned()),
            ..Default::default()
        },
        1000,
    )
    .await
    .expect_err("stale version");
    assert!(matches!(
        err,
        StoreError::VersionConflict {
            supplied: 1,
            stored: 2
        }
    ));
    tx.rollback().await.expect("rollback");

    // No fields changed.
    let mut conn = pool.acquire().await.expect("acquire");
    let current = tasks::get(&mut conn, user.id, task.id).await.expect("get");
    assert_eq!(current.title, "renamed by B");
    assert_eq!(current.version, 2);
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn cross_user_access_reads_as_not_found() {
    let pool = common::test_pool().await;
    let owner = common::create_user(&pool).await;
    let other = common::create_user(&pool).await;

    let mut tx = pool.begin().await.expect("begin");
    let task = tasks::create(&mut *tx, owner.id, new_task("mine"), 50, 1000)
        .await
        .expect("task");
    tx.commit().await.expect("commit");

    let mut conn = pool.acquire().await.expect("acquire");
    let err = tasks::get(&mut conn, other.id, task.id)
        .await
        .expect_err("other user");
    assert!(matches!(err, StoreError::NotFound));
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn subtask_indices_stay_gapless_through_delete_and_reorder() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;

    let mut tx = pool.begin().await.expect("begin");
    let task = tasks::create(&mut *tx, user.id, new_task("ordered"), 50, 1000)
        .await
        .expect("task");
    let mut ids = Vec::new();
    for title in ["a", "b", "c", "d"] {
        let subtask =
            subtasks::create(&mut *tx, user.id, task.id, title, SubtaskSource::User, 10)
                .await
                .expect("subtask");
        ids.push(subtask.id);
    }
    tx.commit().await.expect("commit");

    // Delete "b": c and d shift down.
    let mut tx = pool.begin().await.expect("begin");
    subtasks::delete(&mut *tx, user.id, ids[1]).await.expect("delete");
    tx.commit().await.expect("commit");

    let mut conn = pool.acquire().await.expect("acquire");
    let rows = subtasks::list_unchecked(&mut conn, task.id).await.expect("list");
    let indices: Vec<i32> = rows.iter().map(|s| s.order_index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    let titles: Vec<&str> = rows.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(titles, vec!["a", "c", "d"]);

    // Reorder to d, a, c.
    let reordered_ids = vec![ids[3], ids[0], ids[2]];
    let mut tx = pool.begin().await.expect("begin");
    let rows = subtasks::reorder(&mut *tx, user.id, task.id, &reordered_ids)
        .await
        .expect("reorder");
    tx.commit().await.expect("commit");
    let titles: Vec<&str> = rows.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(titles, vec!["d", "a", "c"]);

    // A non-permutation is rejected.
    let mut tx = pool.begin().await.expect("begin");
    let err = subtasks::reorder(&mut *tx, user.id, task.id, &reordered_ids[..2])
        .await
        .expect_err("partial list");
    assert!(matches!(err, StoreError::InvalidReorder));
    tx.rollback().await.expect("rollback");
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn subtask_cap_is_enforced() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;

    let mut tx = pool.begin().await.expect("begin");
    let task = tasks::create(&mut *tx, user.id, new_task("capped"), 50, 1000)
        .await
        .expect("task");
    for i in 0..4 {
        subtasks::create(
            &mut *tx,
            user.id,
            task.id,
            &format!("s{i}"),
            SubtaskSource::User,
            4,
        )
        .await
        .expect("subtask");
    }
    let err = subtasks::create(&mut *tx, user.id, task.id, "s4", SubtaskSource::User, 4)
        .await
        .expect_err("over cap");
    assert!(matches!(
        err,
        StoreError::LimitExceeded { what: "subtask", limit: 4 }
    ));
    tx.rollback().await.expect("rollback");
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn archived_tasks_reject_mutation_and_completion() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;

    let mut tx = pool.begin().await.expect("begin");
    let task = tasks::create(&mut *tx, user.id, new_task("shelved"), 50, 1000)
        .await
        .expect("task");
    let task = tasks::update(
        &mut *tx,
        user.id,
        task.id,
        1,
        tasks::TaskPatch {
            archived: Some(true),
            ..Default::default()
        },
        1000,
    )
    .await
    .expect("archive");
    tx.commit().await.expect("commit");

    let mut tx = pool.begin().await.expect("begin");
    let err = tasks::update(
        &mut *tx,
        user.id,
        task.id,
        task.version,
        tasks::TaskPatch {
            title: Some("nope".to_owned()),
            ..Default::default()
        },
        1000,
    )
    .await
    .expect_err("archived");
    assert!(matches!(err, StoreError::TaskArchived));

    let err = tasks::mark_completed(&mut *tx, user.id, task.id, CompletedBy::Manual)
        .await
        .expect_err("archived");
    assert!(matches!(err, StoreError::TaskArchived));
    tx.rollback().await.expect("rollback");
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn due_dates_beyond_a_year_are_rejected() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;

    let mut tx = pool.begin().await.expect("begin");
    let err = tasks::create(
        &mut *tx,
        user.id,
        tasks::NewTask {
            due_date: Some(Utc::now() + Duration::days(400)),
            ..new_task("far future")
        },
        50,
        1000,
    )
    .await
    .expect_err("too far out");
    assert!(matches!(err, StoreError::DueDateExceeded));
    tx.rollback().await.expect("rollback");
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn template_delete_detaches_instances() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;

    let mut tx = pool.begin().await.expect("begin");
    let template = templates::create(
        &mut *tx,
        user.id,
        templates::NewTemplate {
            title: "weekly review".to_owned(),
            description: None,
            priority: Default::default(),
            recurrence: "FREQ=WEEKLY;BYDAY=FR".to_owned(),
        },
    )
    .await
    .expect("template");
    let task = tasks::create(
        &mut *tx,
        user.id,
        tasks::NewTask {
            template_id: Some(template.id),
            ..new_task("review instance")
        },
        50,
        1000,
    )
    .await
    .expect("instance");
    tx.commit().await.expect("commit");

    let mut tx = pool.begin().await.expect("begin");
    templates::delete(&mut *tx, user.id, template.id)
        .await
        .expect("delete");
    tx.commit().await.expect("commit");

    // The instance survives with its reference cleared.
    let mut conn = pool.acquire().await.expect("acquire");
    let current = tasks::get(&mut conn, user.id, task.id).await.expect("get");
    assert_eq!(current.template_id, None);
}
