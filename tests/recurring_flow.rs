//! Integration tests for the recurring-template generation chain.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use taskwell::jobs::handlers::RecurringTaskHandler;
use taskwell::jobs::worker::{HandlerOutcome, JobContext, JobHandler};
use taskwell::notify::push::PushClient;
use taskwell::store::{tasks, templates};

fn job_context(pool: &sqlx::PgPool) -> JobContext {
    let config = Arc::new(common::test_config());
    JobContext {
        pool: pool.clone(),
        config: Arc::clone(&config),
        bus: Arc::new(common::test_bus()),
        push: Arc::new(PushClient::new(&config.push)),
    }
}

async fn create_template(pool: &sqlx::PgPool, user_id: uuid::Uuid) -> taskwell::domain::TaskTemplate {
    let mut tx = pool.begin().await.expect("begin");
    let template = templates::create(
        &mut *tx,
        user_id,
        templates::NewTemplate {
            title: "water the plants".to_owned(),
            description: None,
            priority: Default::default(),
            recurrence: "FREQ=DAILY".to_owned(),
        },
    )
    .await
    .expect("template");
    tx.commit().await.expect("commit");
    template
}

async fn pending_generation_jobs(pool: &sqlx::PgPool, template_id: uuid::Uuid) -> i64 {
    sqlx::query_scalar::<_, i64>(
        "SELECT count(*) FROM job_queue
         WHERE job_type = 'recurring_task_generate' AND status = 'pending'
           AND payload->>'template_id' = $1",
    )
    .bind(template_id.to_string())
    .fetch_one(pool)
    .await
    .expect("count")
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn due_template_generates_an_instance_and_rearms_the_chain() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;
    let ctx = job_context(&pool);

    let template = create_template(&pool, user.id).await;
    // FREQ=DAILY caches tomorrow's midnight; pull it into the past so
    // the occurrence is due.
    sqlx::query("UPDATE task_templates SET next_due = now() - interval '1 hour' WHERE id = $1")
        .bind(template.id)
        .execute(&pool)
        .await
        .expect("backdate");

    let outcome = RecurringTaskHandler
        .run(&json!({ "template_id": template.id }), &ctx)
        .await
        .expect("run");
    assert!(matches!(outcome, HandlerOutcome::Success(_)));

    // The instance exists and is tagged with the template.
    let mut conn = pool.acquire().await.expect("acquire");
    let page = tasks::list(&mut conn, user.id, false, 0, 10).await.expect("list");
    let instance = page
        .items
        .iter()
        .find(|t| t.template_id == Some(template.id))
        .expect("generated instance");
    assert_eq!(instance.title, "water the plants");
    assert!(instance.due_date.is_some());

    // next_due advanced past now, and the chain re-enqueued itself.
    let refreshed = templates::get_by_id(&mut conn, template.id).await.expect("template");
    assert!(refreshed.next_due.expect("next_due") > Utc::now());
    assert!(pending_generation_jobs(&pool, template.id).await >= 1);

    // Running again before the next occurrence is a no-op.
    let outcome = RecurringTaskHandler
        .run(&json!({ "template_id": template.id }), &ctx)
        .await
        .expect("run");
    assert!(matches!(outcome, HandlerOutcome::Skipped(_)));
    let page = tasks::list(&mut conn, user.id, false, 0, 10).await.expect("list");
    let instances = page
        .items
        .iter()
        .filter(|t| t.template_id == Some(template.id))
        .count();
    assert_eq!(instances, 1);
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn inactive_templates_are_skipped() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;
    let ctx = job_context(&pool);

    let template = create_template(&pool, user.id).await;
    {
        let mut tx = pool.begin().await.expect("begin");
        templates::set_active(&mut *tx, user.id, template.id, false)
            .await
            .expect("deactivate");
        tx.commit().await.expect("commit");
    }
    sqlx::query("UPDATE task_templates SET next_due = now() - interval '1 hour' WHERE id = $1")
        .bind(template.id)
        .execute(&pool)
        .await
        .expect("backdate");

    let outcome = RecurringTaskHandler
        .run(&json!({ "template_id": template.id }), &ctx)
        .await
        .expect("run");
    assert!(matches!(outcome, HandlerOutcome::Skipped(_)));

    let mut conn = pool.acquire().await.expect("acquire");
    let page = tasks::list(&mut conn, user.id, false, 0, 10).await.expect("list");
    assert!(page
        .items
        .iter()
        .all(|t| t.template_id != Some(template.id)));
}

#[tokio::test]
#[ignore = "requires a Postgres at TASKWELL_TEST_DATABASE_URL"]
async fn due_templates_sweep_sees_only_due_active_rows() {
    let pool = common::test_pool().await;
    let user = common::create_user(&pool).await;

    let due = create_template(&pool, user.id).await;
    sqlx::query("UPDATE task_templates SET next_due = now() - interval '1 hour' WHERE id = $1")
        .bind(due.id)
        .execute(&pool)
        .await
        .expect("backdate");
    let future = create_template(&pool, user.id).await;

    let mut conn = pool.acquire().await.expect("acquire");
    let rows = templates::due_templates(&mut conn, Utc::now()).await.expect("sweep");
    assert!(rows.iter().any(|t| t.id == due.id));
    assert!(rows.iter().all(|t| t.id != future.id));
}
