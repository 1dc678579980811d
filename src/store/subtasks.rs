//! Subtask repository.
//!
//! Subtasks are reached only via their parent task, inheriting its
//! ownership check. Sibling `order_index` values are kept gapless:
//! inserts append at the current count, deletes compact indices above
//! the removed position, and reorders assign `0..N-1` from a full
//! permutation of the sibling set.

use std::collections::HashSet;

use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::{Subtask, SubtaskSource};

use super::{tasks, StoreError, StoreResult};

const SUBTASK_COLUMNS: &str =
    "id, task_id, title, completed, completed_at, order_index, source, created_at, updated_at";

fn validate_title(title: &str) -> StoreResult<()> {
    let len = title.chars().count();
    if len == 0 || len > 200 {
        return Err(StoreError::Validation(
            "subtask title must be 1-200 characters".to_owned(),
        ));
    }
    Ok(())
}

/// List subtasks of a task in order.
pub async fn list(
    conn: &mut PgConnection,
    user_id: Uuid,
    task_id: Uuid,
) -> StoreResult<Vec<Subtask>> {
    // Ownership check via the parent.
    tasks::get(&mut *conn, user_id, task_id).await?;
    list_unchecked(conn, task_id).await
}

/// List subtasks without re-checking the parent (caller already did).
pub async fn list_unchecked(conn: &mut PgConnection, task_id: Uuid) -> StoreResult<Vec<Subtask>> {
    let rows = sqlx::query_as::<_, Subtask>(&format!(
        "SELECT {SUBTASK_COLUMNS} FROM subtasks WHERE task_id = $1 ORDER BY order_index"
    ))
    .bind(task_id)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Append a subtask at `order_index = current count`, enforcing the
/// tier subtask cap.
pub async fn create(
    conn: &mut PgConnection,
    user_id: Uuid,
    task_id: Uuid,
    title: &str,
    source: SubtaskSource,
    max_subtasks: i64,
) -> StoreResult<Subtask> {
    validate_title(title)?;
    let task = tasks::get_for_update(&mut *conn, user_id, task_id).await?;
    if task.archived {
        return Err(StoreError::TaskArchived);
    }

    let (count,): (i64,) = sqlx::query_as("SELECT count(*) FROM subtasks WHERE task_id = $1")
        .bind(task_id)
        .fetch_one(&mut *conn)
        .await?;
    if count >= max_subtasks {
        return Err(StoreError::LimitExceeded {
            what: "subtask",
            limit: max_subtasks,
        });
    }

    let subtask = sqlx::query_as::<_, Subtask>(&format!(
        "INSERT INTO subtasks (id, task_id, title, order_index, source)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING {SUBTASK_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(task_id)
    .bind(title)
    .bind(i32::try_from(count).unwrap_or(i32::MAX))
    .bind(source)
    .fetch_one(conn)
    .await?;

    Ok(subtask)
}

/// Fetch a subtask together with its owning task (ownership enforced).
pub async fn get(
    conn: &mut PgConnection,
    user_id: Uuid,
    subtask_id: Uuid,
) -> StoreResult<Subtask> {
    sqlx::query_as::<_, Subtask>(
        "SELECT s.id, s.task_id, s.title, s.completed, s.completed_at,
                s.order_index, s.source, s.created_at, s.updated_at
         FROM subtasks s
         JOIN task_instances t ON t.id = s.task_id
         WHERE s.id = $1 AND t.user_id = $2 AND t.hidden = FALSE",
    )
    .bind(subtask_id)
    .bind(user_id)
    .fetch_optional(conn)
    .await?
    .ok_or(StoreError::NotFound)
}

/// Rename a subtask.
pub async fn rename(
    conn: &mut PgConnection,
    user_id: Uuid,
    subtask_id: Uuid,
    title: &str,
) -> StoreResult<Subtask> {
    validate_title(title)?;
    let existing = get(&mut *conn, user_id, subtask_id).await?;
    let row = sqlx::query_as::<_, Subtask>(&format!(
        "UPDATE subtasks SET title = $1, updated_at = now()
         WHERE id = $2
         RETURNING {SUBTASK_COLUMNS}"
    ))
    .bind(title)
    .bind(existing.id)
    .fetch_one(conn)
    .await?;
    Ok(row)
}

/// Set a subtask's completion flag. Returns the updated row and whether
/// the flag actually changed.
pub async fn set_completed(
    conn: &mut PgConnection,
    user_id: Uuid,
    subtask_id: Uuid,
    completed: bool,
) -> StoreResult<(Subtask, bool)> {
    let existing = get(&mut *conn, user_id, subtask_id).await?;
    if existing.completed == completed {
        return Ok((existing, false));
    }
    let row = sqlx::query_as::<_, Subtask>(&format!(
        "UPDATE subtasks SET
             completed = $1,
             completed_at = CASE WHEN $1 THEN now() ELSE NULL END,
             updated_at = now()
         WHERE id = $2
         RETURNING {SUBTASK_COLUMNS}"
    ))
    .bind(completed)
    .bind(existing.id)
    .fetch_one(conn)
    .await?;
    Ok((row, true))
}

/// Complete every still-incomplete subtask of a task (force-complete path).
/// Returns the ids that were flipped.
pub async fn complete_all(
    conn: &mut PgConnection,
    task_id: Uuid,
) -> StoreResult<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "UPDATE subtasks SET completed = TRUE, completed_at = now(), updated_at = now()
         WHERE task_id = $1 AND completed = FALSE
         RETURNING id",
    )
    .bind(task_id)
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Delete a subtask and compact sibling indices above it.
pub async fn delete(
    conn: &mut PgConnection,
    user_id: Uuid,
    subtask_id: Uuid,
) -> StoreResult<Subtask> {
    let existing = get(&mut *conn, user_id, subtask_id).await?;

    sqlx::query("DELETE FROM subtasks WHERE id = $1")
        .bind(existing.id)
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        "UPDATE subtasks SET order_index = order_index - 1, updated_at = now()
         WHERE task_id = $1 AND order_index > $2",
    )
    .bind(existing.task_id)
    .bind(existing.order_index)
    .execute(conn)
    .await?;

    Ok(existing)
}

/// Reorder a task's subtasks from a full id permutation.
///
/// The supplied list must contain exactly the current sibling ids;
/// indices `0..N-1` are assigned in list order atomically.
pub async fn reorder(
    conn: &mut PgConnection,
    user_id: Uuid,
    task_id: Uuid,
    ordered_ids: &[Uuid],
) -> StoreResult<Vec<Subtask>> {
    let task = tasks::get_for_update(&mut *conn, user_id, task_id).await?;
    if task.archived {
        return Err(StoreError::TaskArchived);
    }

    let current = list_unchecked(&mut *conn, task_id).await?;
    let current_ids: HashSet<Uuid> = current.iter().map(|s| s.id).collect();
    let supplied_ids: HashSet<Uuid> = ordered_ids.iter().copied().collect();
    if current_ids != supplied_ids || ordered_ids.len() != current.len() {
        return Err(StoreError::InvalidReorder);
    }

    for (index, id) in ordered_ids.iter().enumerate() {
        sqlx::query(
            "UPDATE subtasks SET order_index = $1, updated_at = now() WHERE id = $2",
        )
        .bind(i32::try_from(index).unwrap_or(i32::MAX))
        .bind(id)
        .execute(&mut *conn)
        .await?;
    }

    list_unchecked(conn, task_id).await
}

/// Whether every subtask of the task is complete (and at least one exists).
pub async fn all_completed(conn: &mut PgConnection, task_id: Uuid) -> StoreResult<bool> {
    let (total, done): (i64, i64) = sqlx::query_as(
        "SELECT count(*), count(*) FILTER (WHERE completed)
         FROM subtasks WHERE task_id = $1",
    )
    .bind(task_id)
    .fetch_one(conn)
    .await?;
    Ok(total > 0 && total == done)
}

/// Recreate subtask rows from a tombstone payload (recovery path).
pub async fn insert_with_ids(
    conn: &mut PgConnection,
    subtasks: &[Subtask],
) -> StoreResult<()> {
    for subtask in subtasks {
        sqlx::query(
            "INSERT INTO subtasks
                 (id, task_id, title, completed, completed_at, order_index, source,
                  created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(subtask.id)
        .bind(subtask.task_id)
        .bind(&subtask.title)
        .bind(subtask.completed)
        .bind(subtask.completed_at)
        .bind(subtask.order_index)
        .bind(subtask.source)
        .bind(subtask.created_at)
        .bind(subtask.updated_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}
