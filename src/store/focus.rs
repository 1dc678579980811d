//! Focus session repository.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::FocusSession;

use super::{tasks, StoreError, StoreResult};

const FOCUS_COLUMNS: &str = "id, user_id, task_id, started_at, ended_at, duration_seconds";

/// Start a focus session against a task. At most one open session per
/// (user, task); starting again returns the open session.
pub async fn start(
    conn: &mut PgConnection,
    user_id: Uuid,
    task_id: Uuid,
) -> StoreResult<FocusSession> {
    let task = tasks::get(&mut *conn, user_id, task_id).await?;
    if task.archived {
        return Err(StoreError::TaskArchived);
    }

    let open = sqlx::query_as::<_, FocusSession>(&format!(
        "SELECT {FOCUS_COLUMNS} FROM focus_sessions
         WHERE user_id = $1 AND task_id = $2 AND ended_at IS NULL"
    ))
    .bind(user_id)
    .bind(task_id)
    .fetch_optional(&mut *conn)
    .await?;
    if let Some(session) = open {
        return Ok(session);
    }

    let session = sqlx::query_as::<_, FocusSession>(&format!(
        "INSERT INTO focus_sessions (id, user_id, task_id, started_at)
         VALUES ($1, $2, $3, now())
         RETURNING {FOCUS_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(task_id)
    .fetch_one(conn)
    .await?;
    Ok(session)
}

/// End the open session for a task and record its duration.
pub async fn end(
    conn: &mut PgConnection,
    user_id: Uuid,
    task_id: Uuid,
) -> StoreResult<FocusSession> {
    sqlx::query_as::<_, FocusSession>(&format!(
        "UPDATE focus_sessions SET
             ended_at = now(),
             duration_seconds = EXTRACT(EPOCH FROM (now() - started_at))::BIGINT
         WHERE user_id = $1 AND task_id = $2 AND ended_at IS NULL
         RETURNING {FOCUS_COLUMNS}"
    ))
    .bind(user_id)
    .bind(task_id)
    .fetch_optional(conn)
    .await?
    .ok_or(StoreError::NotFound)
}
