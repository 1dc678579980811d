//! Task repository: CRUD with optimistic locking, soft delete, and cascade.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::{CompletedBy, TaskInstance, TaskPriority};

use super::{Page, StoreError, StoreResult};

const TASK_COLUMNS: &str = "id, user_id, title, description, priority, due_date, \
     estimated_minutes, focus_seconds, completed, completed_at, completed_by, \
     hidden, archived, template_id, version, created_at, updated_at";

/// Fields for creating a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Title, 1–200 characters.
    pub title: String,
    /// Optional description; cap depends on tier.
    pub description: Option<String>,
    /// Priority.
    pub priority: TaskPriority,
    /// Optional due date.
    pub due_date: Option<DateTime<Utc>>,
    /// Estimated duration in minutes.
    pub estimated_minutes: Option<i32>,
    /// Generating template, for recurring instances.
    pub template_id: Option<Uuid>,
}

/// Caller-supplied patch for a task update. `None` leaves a field alone;
/// the double-`Option` fields distinguish "unset" from "set to null".
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    /// New title.
    pub title: Option<String>,
    /// New description (`Some(None)` clears it).
    pub description: Option<Option<String>>,
    /// New priority.
    pub priority: Option<TaskPriority>,
    /// New due date (`Some(None)` clears it).
    pub due_date: Option<Option<DateTime<Utc>>>,
    /// New estimate (`Some(None)` clears it).
    pub estimated_minutes: Option<Option<i32>>,
    /// Archive / unarchive.
    pub archived: Option<bool>,
}

/// Validate title/description/due-date/estimate constraints shared by
/// create and update.
fn validate(
    title: Option<&str>,
    description: Option<&str>,
    due_date: Option<DateTime<Utc>>,
    estimated_minutes: Option<i32>,
    max_description: usize,
) -> StoreResult<()> {
    if let Some(title) = title {
        let len = title.chars().count();
        if len == 0 || len > 200 {
            return Err(StoreError::Validation(
                "title must be 1-200 characters".to_owned(),
            ));
        }
    }
    if let Some(description) = description {
        if description.chars().count() > max_description {
            return Err(StoreError::Validation(format!(
                "description must be at most {max_description} characters"
            )));
        }
    }
    if let Some(due) = due_date {
        if due > Utc::now() + Duration::days(365) {
            return Err(StoreError::DueDateExceeded);
        }
    }
    if let Some(minutes) = estimated_minutes {
        if !(1..=720).contains(&minutes) {
            return Err(StoreError::Validation(
                "estimated_minutes must be 1-720".to_owned(),
            ));
        }
    }
    Ok(())
}

/// Count visible (not hidden, not archived) tasks for the cap check.
pub async fn count_active(conn: &mut PgConnection, user_id: Uuid) -> StoreResult<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT count(*) FROM task_instances
         WHERE user_id = $1 AND hidden = FALSE AND archived = FALSE",
    )
    .bind(user_id)
    .fetch_one(conn)
    .await?;
    Ok(count)
}

/// Insert a task, enforcing the effective task cap.
pub async fn create(
    conn: &mut PgConnection,
    user_id: Uuid,
    new: NewTask,
    effective_max: i64,
    max_description: usize,
) -> StoreResult<TaskInstance> {
    validate(
        Some(&new.title),
        new.description.as_deref(),
        new.due_date,
        new.estimated_minutes,
        max_description,
    )?;

    let count = count_active(conn, user_id).await?;
    if count >= effective_max {
        return Err(StoreError::LimitExceeded {
            what: "task",
            limit: effective_max,
        });
    }

    let task = sqlx::query_as::<_, TaskInstance>(&format!(
        "INSERT INTO task_instances
             (id, user_id, title, description, priority, due_date, estimated_minutes, template_id)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING {TASK_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(&new.title)
    .bind(&new.description)
    .bind(new.priority)
    .bind(new.due_date)
    .bind(new.estimated_minutes)
    .bind(new.template_id)
    .fetch_one(conn)
    .await?;

    Ok(task)
}

/// Fetch a visible task owned by `user_id`.
pub async fn get(conn: &mut PgConnection, user_id: Uuid, task_id: Uuid) -> StoreResult<TaskInstance> {
    sqlx::query_as::<_, TaskInstance>(&format!(
        "SELECT {TASK_COLUMNS} FROM task_instances
         WHERE id = $1 AND user_id = $2 AND hidden = FALSE"
    ))
    .bind(task_id)
    .bind(user_id)
    .fetch_optional(conn)
    .await?
    .ok_or(StoreError::NotFound)
}

/// Fetch a visible task and lock its row for the rest of the transaction.
pub async fn get_for_update(
    conn: &mut PgConnection,
    user_id: Uuid,
    task_id: Uuid,
) -> StoreResult<TaskInstance> {
    sqlx::query_as::<_, TaskInstance>(&format!(
        "SELECT {TASK_COLUMNS} FROM task_instances
         WHERE id = $1 AND user_id = $2 AND hidden = FALSE
         FOR UPDATE"
    ))
    .bind(task_id)
    .bind(user_id)
    .fetch_optional(conn)
    .await?
    .ok_or(StoreError::NotFound)
}

/// List visible tasks, newest first.
pub async fn list(
    conn: &mut PgConnection,
    user_id: Uuid,
    include_completed: bool,
    offset: i64,
    limit: i64,
) -> StoreResult<Page<TaskInstance>> {
    let filter = if include_completed {
        ""
    } else {
        " AND completed = FALSE"
    };
    let (total,): (i64,) = sqlx::query_as(&format!(
        "SELECT count(*) FROM task_instances
         WHERE user_id = $1 AND hidden = FALSE AND archived = FALSE{filter}"
    ))
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;

    let items = sqlx::query_as::<_, TaskInstance>(&format!(
        "SELECT {TASK_COLUMNS} FROM task_instances
         WHERE user_id = $1 AND hidden = FALSE AND archived = FALSE{filter}
         ORDER BY created_at DESC
         OFFSET $2 LIMIT $3"
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

/// Update a task under optimistic locking.
///
/// The update succeeds only if the stored version equals `supplied_version`;
/// on success the stored version becomes `supplied_version + 1`. Archived
/// tasks reject every patch except un-archiving.
pub async fn update(
    conn: &mut PgConnection,
    user_id: Uuid,
    task_id: Uuid,
    supplied_version: i32,
    patch: TaskPatch,
    max_description: usize,
) -> StoreResult<TaskInstance> {
    let current = get_for_update(conn, user_id, task_id).await?;

    if current.archived && patch.archived != Some(false) {
        return Err(StoreError::TaskArchived);
    }
    if current.version != supplied_version {
        return Err(StoreError::VersionConflict {
            supplied: supplied_version,
            stored: current.version,
        });
    }

    let title = patch.title.unwrap_or(current.title);
    let description = patch.description.unwrap_or(current.description);
    let priority = patch.priority.unwrap_or(current.priority);
    let due_date = patch.due_date.unwrap_or(current.due_date);
    let estimated_minutes = patch.estimated_minutes.unwrap_or(current.estimated_minutes);
    let archived = patch.archived.unwrap_or(current.archived);

    validate(
        Some(&title),
        description.as_deref(),
        due_date,
        estimated_minutes,
        max_description,
    )?;

    let task = sqlx::query_as::<_, TaskInstance>(&format!(
        "UPDATE task_instances SET
             title = $1, description = $2, priority = $3, due_date = $4,
             estimated_minutes = $5, archived = $6,
             version = version + 1, updated_at = now()
         WHERE id = $7 AND user_id = $8 AND version = $9
         RETURNING {TASK_COLUMNS}"
    ))
    .bind(&title)
    .bind(&description)
    .bind(priority)
    .bind(due_date)
    .bind(estimated_minutes)
    .bind(archived)
    .bind(task_id)
    .bind(user_id)
    .bind(supplied_version)
    .fetch_optional(conn)
    .await?
    // The row is locked, so a miss here can only be a version race that
    // slipped in before our lock; report it as a conflict.
    .ok_or(StoreError::VersionConflict {
        supplied: supplied_version,
        stored: current.version,
    })?;

    Ok(task)
}

/// Mark a task completed and bump its version.
///
/// Returns the updated row. The caller decides `completed_by` (manual,
/// auto from subtask completion, or force).
pub async fn mark_completed(
    conn: &mut PgConnection,
    user_id: Uuid,
    task_id: Uuid,
    completed_by: CompletedBy,
) -> StoreResult<TaskInstance> {
    let current = get_for_update(conn, user_id, task_id).await?;
    if current.archived {
        return Err(StoreError::TaskArchived);
    }
    if current.completed {
        return Ok(current);
    }

    let task = sqlx::query_as::<_, TaskInstance>(&format!(
        "UPDATE task_instances SET
             completed = TRUE, completed_at = now(), completed_by = $1,
             version = version + 1, updated_at = now()
         WHERE id = $2 AND user_id = $3
         RETURNING {TASK_COLUMNS}"
    ))
    .bind(completed_by)
    .bind(task_id)
    .bind(user_id)
    .fetch_one(conn)
    .await?;

    Ok(task)
}

/// Reopen a completed task (clears completion fields, bumps version).
pub async fn mark_uncompleted(
    conn: &mut PgConnection,
    user_id: Uuid,
    task_id: Uuid,
) -> StoreResult<TaskInstance> {
    let current = get_for_update(conn, user_id, task_id).await?;
    if current.archived {
        return Err(StoreError::TaskArchived);
    }
    let task = sqlx::query_as::<_, TaskInstance>(&format!(
        "UPDATE task_instances SET
             completed = FALSE, completed_at = NULL, completed_by = NULL,
             version = version + 1, updated_at = now()
         WHERE id = $1 AND user_id = $2
         RETURNING {TASK_COLUMNS}"
    ))
    .bind(task_id)
    .bind(user_id)
    .fetch_one(conn)
    .await?;
    Ok(task)
}

/// Soft-delete: hide the task. Does not cascade.
pub async fn soft_delete(
    conn: &mut PgConnection,
    user_id: Uuid,
    task_id: Uuid,
) -> StoreResult<()> {
    let result = sqlx::query(
        "UPDATE task_instances SET hidden = TRUE, updated_at = now()
         WHERE id = $1 AND user_id = $2 AND hidden = FALSE",
    )
    .bind(task_id)
    .bind(user_id)
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// Hard-delete the task row. Subtasks and reminders go with it via
/// `ON DELETE CASCADE`; tombstone writing is the caller's concern so the
/// serialized payload can be captured first.
pub async fn hard_delete(
    conn: &mut PgConnection,
    user_id: Uuid,
    task_id: Uuid,
) -> StoreResult<()> {
    let result = sqlx::query("DELETE FROM task_instances WHERE id = $1 AND user_id = $2")
        .bind(task_id)
        .bind(user_id)
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// Add focus seconds to a task's accumulated total.
pub async fn add_focus_seconds(
    conn: &mut PgConnection,
    user_id: Uuid,
    task_id: Uuid,
    seconds: i64,
) -> StoreResult<TaskInstance> {
    sqlx::query_as::<_, TaskInstance>(&format!(
        "UPDATE task_instances SET
             focus_seconds = focus_seconds + $1, updated_at = now()
         WHERE id = $2 AND user_id = $3 AND hidden = FALSE
         RETURNING {TASK_COLUMNS}"
    ))
    .bind(seconds)
    .bind(task_id)
    .bind(user_id)
    .fetch_optional(conn)
    .await?
    .ok_or(StoreError::NotFound)
}

/// Recreate a task row with its original id and timestamps (recovery path).
///
/// Fails with [`StoreError::IdCollision`] if the id is already present.
pub async fn insert_with_id(
    conn: &mut PgConnection,
    task: &TaskInstance,
) -> StoreResult<TaskInstance> {
    let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM task_instances WHERE id = $1")
        .bind(task.id)
        .fetch_optional(&mut *conn)
        .await?;
    if exists.is_some() {
        return Err(StoreError::IdCollision);
    }

    let row = sqlx::query_as::<_, TaskInstance>(&format!(
        "INSERT INTO task_instances
             (id, user_id, title, description, priority, due_date, estimated_minutes,
              focus_seconds, completed, completed_at, completed_by, hidden, archived,
              template_id, version, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
         RETURNING {TASK_COLUMNS}"
    ))
    .bind(task.id)
    .bind(task.user_id)
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.priority)
    .bind(task.due_date)
    .bind(task.estimated_minutes)
    .bind(task.focus_seconds)
    .bind(task.completed)
    .bind(task.completed_at)
    .bind(task.completed_by)
    .bind(task.hidden)
    .bind(task.archived)
    .bind(task.template_id)
    .bind(task.version)
    .bind(task.created_at)
    .bind(task.updated_at)
    .fetch_one(conn)
    .await?;

    Ok(row)
}

/// Whether the user completed at least one task on the given UTC date.
pub async fn completed_on_date(
    conn: &mut PgConnection,
    user_id: Uuid,
    date: chrono::NaiveDate,
) -> StoreResult<bool> {
    let start = date
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .ok_or_else(|| StoreError::Validation("invalid date".to_owned()))?;
    let end = start + Duration::days(1);

    let row: Option<(Uuid,)> = sqlx::query_as(
        "SELECT id FROM task_instances
         WHERE user_id = $1 AND completed = TRUE
           AND completed_at >= $2 AND completed_at < $3
         LIMIT 1",
    )
    .bind(user_id)
    .bind(start)
    .bind(end)
    .fetch_optional(conn)
    .await?;

    Ok(row.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_title_bounds() {
        assert!(validate(Some(""), None, None, None, 1000).is_err());
        assert!(validate(Some(&"x".repeat(201)), None, None, None, 1000).is_err());
        assert!(validate(Some("write report"), None, None, None, 1000).is_ok());
    }

    #[test]
    fn test_validate_description_tier_cap() {
        let body = "d".repeat(1500);
        assert!(validate(None, Some(&body), None, None, 1000).is_err());
        assert!(validate(None, Some(&body), None, None, 2000).is_ok());
    }

    #[test]
    fn test_validate_due_date_one_year_window() {
        let near = Utc::now() + Duration::days(300);
        let far = Utc::now() + Duration::days(400);
        assert!(validate(None, None, Some(near), None, 1000).is_ok());
        assert!(matches!(
            validate(None, None, Some(far), None, 1000),
            Err(StoreError::DueDateExceeded)
        ));
    }

    #[test]
    fn test_validate_estimate_range() {
        assert!(validate(None, None, None, Some(0), 1000).is_err());
        assert!(validate(None, None, None, Some(721), 1000).is_err());
        assert!(validate(None, None, None, Some(720), 1000).is_ok());
    }
}
