//! Integration tests for the event bus, auto-completion, and the
//! achievement engine driving off dispatched events.

mod common;

use chrono::Utc;
use taskwell::achievements;
use taskwell::domain::{CompletedBy, SubtaskSource, UserTier};
use taskwell::events::{DomainEvent, EventKind, EventMeta};
use taskwell::store::{activity, subtasks, tasks};

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

#[test]
fn standard_handlers_cover_the_taxonomy() {
    let bus = common::test_bus();
    // The activity writer subscribes everywhere.
    for kind in EventKind::ALL {
        assert!(bus.handler_count(*kind) >= 1, "no handler for {kind:?}");
    }
    // Auto-complete plus the activity writer on subtask completion.
    assert!(bus.handler_count(EventKind::SubtaskCompleted) >= 2);
    // Achievement driver and recurring enqueuer join on task completion.
    assert!(bus.handler_count(EventKind::TaskCompleted) >= 3);
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn completing_last_subtask_auto_completes_the_task() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;
    let bus = common::test_bus();
    let config = common::test_config();

    let mut tx = pool.begin().await.expect("begin");
    let task = tasks::create(&mut *tx, user.id, new_task("ship release"), 50, 1000)
        .await
        .expect("task");
    let mut subtask_ids = Vec::new();
    for title in ["write notes", "tag build", "announce"] {
        let subtask = subtasks::create(&mut *tx, user.id, task.id, title, SubtaskSource::User, 10)
            .await
            .expect("subtask");
        subtask_ids.push(subtask.id);
    }
    tx.commit().await.expect("commit");

    // Complete the first two: the task stays open.
    for subtask_id in &subtask_ids[..2] {
        let mut tx = pool.begin().await.expect("begin");
        let (subtask, changed) =
            subtasks::set_completed(&mut *tx, user.id, *subtask_id, true)
                .await
                .expect("complete subtask");
        assert!(changed);
        bus.dispatch(
            DomainEvent::SubtaskCompleted {
                meta: EventMeta::user(user.id, None),
                task_id: subtask.task_id,
                subtask_id: subtask.id,
            },
            &mut *tx,
            &config,
        )
        .await;
        tx.commit().await.expect("commit");
    }
    {
        let mut conn = pool.acquire().await.expect("acquire");
        let current = tasks::get(&mut conn, user.id, task.id).await.expect("get");
        assert!(!current.completed);
        assert_eq!(current.version, 1);
    }

    // The third completion flips the task with completed_by = auto and a
    // version bump.
    let mut tx = pool.begin().await.expect("begin");
    let (subtask, _) = subtasks::set_completed(&mut *tx, user.id, subtask_ids[2], true)
        .await
        .expect("complete subtask");
    let errors = bus
        .dispatch(
            DomainEvent::SubtaskCompleted {
                meta: EventMeta::user(user.id, None),
                task_id: subtask.task_id,
                subtask_id: subtask.id,
            },
            &mut *tx,
            &config,
        )
        .await;
    assert!(errors.is_empty(), "handlers failed: {errors:?}");
    tx.commit().await.expect("commit");

    let mut conn = pool.acquire().await.expect("acquire");
    let current = tasks::get(&mut conn, user.id, task.id).await.expect("get");
    assert!(current.completed);
    assert_eq!(current.completed_by, Some(CompletedBy::Auto));
    assert_eq!(current.version, 2);
    assert!(current.completed_at.is_some());

    // The follow-up TaskCompleted drove the achievement engine.
    let state = achievements::state(&mut conn, user.id)
        .await
        .expect("state")
        .expect("state row");
    assert_eq!(state.lifetime_tasks_completed, 1);
    assert_eq!(state.current_streak, 1);
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn every_event_lands_in_the_activity_log() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;
    let bus = common::test_bus();
    let config = common::test_config();

    let mut tx = pool.begin().await.expect("begin");
    let task = tasks::create(&mut *tx, user.id, new_task("log me"), 50, 1000)
        .await
        .expect("task");
    bus.dispatch(
        DomainEvent::TaskCreated {
            meta: EventMeta::user(user.id, None),
            task_id: task.id,
            recovered: false,
        },
        &mut *tx,
        &config,
    )
    .await;
    tx.commit().await.expect("commit");

    let mut conn = pool.acquire().await.expect("acquire");
    let page = activity::list(&mut conn, user.id, 0, 10).await.expect("list");
    assert!(page
        .items
        .iter()
        .any(|row| row.action == "task.created" && row.entity_id == Some(task.id)));
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn recovered_completions_do_not_touch_achievements() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;
    let bus = common::test_bus();
    let config = common::test_config();

    let mut tx = pool.begin().await.expect("begin");
    let errors = bus
        .dispatch(
            DomainEvent::TaskCompleted {
                meta: EventMeta::user(user.id, None),
                task_id: uuid::Uuid::new_v4(),
                template_id: None,
                completed_by: CompletedBy::Manual,
                recovered: true,
            },
            &mut *tx,
            &config,
        )
        .await;
    assert!(errors.is_empty());
    tx.commit().await.expect("commit");

    let mut conn = pool.acquire().await.expect("acquire");
    let state = achievements::state(&mut conn, user.id).await.expect("state");
    let state = state.expect("state row exists from signup");
    assert_eq!(state.lifetime_tasks_completed, 0);
    assert_eq!(state.current_streak, 0);
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn fifth_completion_unlocks_task_starter_and_raises_cap() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;
    let bus = common::test_bus();
    let config = common::test_config();

    for i in 0..5 {
        let mut tx = pool.begin().await.expect("begin");
        let task = tasks::create(&mut *tx, user.id, new_task(&format!("t{i}")), 50, 1000)
            .await
            .expect("task");
        let task = tasks::mark_completed(&mut *tx, user.id, task.id, CompletedBy::Manual)
            .await
            .expect("complete");
        bus.dispatch(
            DomainEvent::TaskCompleted {
                meta: EventMeta::user(user.id, None),
                task_id: task.id,
                template_id: None,
                completed_by: CompletedBy::Manual,
                recovered: false,
            },
            &mut *tx,
            &config,
        )
        .await;
        tx.commit().await.expect("commit");
    }

    let mut conn = pool.acquire().await.expect("acquire");
    let state = achievements::state(&mut conn, user.id)
        .await
        .expect("state")
        .expect("row");
    assert_eq!(state.lifetime_tasks_completed, 5);
    assert!(state.has_achievement("tasks_5"));

    // tasks_5 carries a +15 max_tasks perk on the free base of 50.
    let limits =
        achievements::effective_limits(&mut conn, user.id, UserTier::Free, &config.limits)
            .await
            .expect("limits");
    assert_eq!(limits.max_tasks, 65);

    let page = taskwell::store::notifications::list(&mut conn, user.id, false, 0, 10)
        .await
        .expect("notifications");
    assert!(page
        .items
        .iter()
        .any(|n| n.title.contains("Achievement unlocked")));
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn nightly_job_resets_stale_streaks() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;

    // A streak last fed three days ago.
    let mut conn = pool.acquire().await.expect("acquire");
    achievements::state_for_update(&mut conn, user.id)
        .await
        .expect("state");
    sqlx::query(
        "UPDATE user_achievement_states SET
             current_streak = 4, longest_streak = 6,
             last_completion_date = (now() - interval '3 days')::date
         WHERE user_id = $1",
    )
    .bind(user.id)
    .execute(&pool)
    .await
    .expect("seed state");

    let mut tx = pool.begin().await.expect("begin");
    let sweep = achievements::nightly_streak_reset(&mut *tx, Utc::now())
        .await
        .expect("sweep");
    tx.commit().await.expect("commit");
    assert!(sweep.streaks_reset >= 1);

    let state = achievements::state(&mut conn, user.id)
        .await
        .expect("state")
        .expect("row");
    assert_eq!(state.current_streak, 0);
    assert_eq!(state.longest_streak, 6);
}
