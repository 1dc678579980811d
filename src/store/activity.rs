//! Activity log repository: the 30-day audit trail.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::{ActivityLog, ActivitySource};

use super::{Page, StoreResult};

const ACTIVITY_COLUMNS: &str =
    "id, user_id, entity_type, entity_id, action, source, extra, request_id, created_at";

/// Days of activity retained before the nightly cleanup deletes rows.
pub const RETENTION_DAYS: i64 = 30;

/// Append one audit record.
#[allow(clippy::too_many_arguments)]
pub async fn record(
    conn: &mut PgConnection,
    user_id: Uuid,
    entity_type: &str,
    entity_id: Option<Uuid>,
    action: &str,
    source: ActivitySource,
    extra: Option<serde_json::Value>,
    request_id: Option<Uuid>,
) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO activity_log
             (id, user_id, entity_type, entity_id, action, source, extra, request_id)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(entity_type)
    .bind(entity_id)
    .bind(action)
    .bind(source)
    .bind(extra.map(sqlx::types::Json))
    .bind(request_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// List a user's activity, newest first.
pub async fn list(
    conn: &mut PgConnection,
    user_id: Uuid,
    offset: i64,
    limit: i64,
) -> StoreResult<Page<ActivityLog>> {
    let (total,): (i64,) =
        sqlx::query_as("SELECT count(*) FROM activity_log WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&mut *conn)
            .await?;

    let items = sqlx::query_as::<_, ActivityLog>(&format!(
        "SELECT {ACTIVITY_COLUMNS} FROM activity_log
         WHERE user_id = $1 ORDER BY created_at DESC OFFSET $2 LIMIT $3"
    ))
    .bind(user_id)
    .bind(offset)
    .bind(limit)
    .fetch_all(conn)
    .await?;

    Ok(Page {
        items,
        offset,
        limit,
        total,
    })
}

/// Count AI-sourced actions recorded against an entity.
///
/// Backs the hard per-task AI request cap: the in-process counter is
/// approximate across replicas, the activity log is not.
pub async fn count_ai_actions(
    conn: &mut PgConnection,
    user_id: Uuid,
    entity_id: Uuid,
) -> StoreResult<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT count(*) FROM activity_log
         WHERE user_id = $1 AND entity_id = $2 AND source = 'ai'",
    )
    .bind(user_id)
    .bind(entity_id)
    .fetch_one(conn)
    .await?;
    Ok(count)
}

/// Delete one batch of rows past the retention window. Returns rows
/// deleted; callers loop until zero.
pub async fn delete_expired_batch(
    conn: &mut PgConnection,
    now: DateTime<Utc>,
    batch_size: i64,
) -> StoreResult<u64> {
    let cutoff = now - Duration::days(RETENTION_DAYS);
    let result = sqlx::query(
        "DELETE FROM activity_log
         WHERE id IN (
             SELECT id FROM activity_log WHERE created_at < $1 LIMIT $2
         )",
    )
    .bind(cutoff)
    .bind(batch_size)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}
