//! Recurring task template repository.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::{TaskPriority, TaskTemplate};
use crate::rrule;

use super::{Page, StoreError, StoreResult};

const TEMPLATE_COLUMNS: &str = "id, user_id, title, description, priority, recurrence, \
     next_due, active, created_at, updated_at";

/// Fields for creating a template.
#[derive(Debug, Clone)]
pub struct NewTemplate {
    /// Title applied to generated instances.
    pub title: String,
    /// Description applied to generated instances.
    pub description: Option<String>,
    /// Priority applied to generated instances.
    pub priority: TaskPriority,
    /// RFC 5545 recurrence rule.
    pub recurrence: String,
}

/// Insert a template. The RRULE is validated and `next_due` cached.
pub async fn create(
    conn: &mut PgConnection,
    user_id: Uuid,
    new: NewTemplate,
) -> StoreResult<TaskTemplate> {
    let len = new.title.chars().count();
    if len == 0 || len > 200 {
        return Err(StoreError::Validation(
            "title must be 1-200 characters".to_owned(),
        ));
    }
    let rule = rrule::RecurrenceRule::parse(&new.recurrence)
        .map_err(|e| StoreError::Validation(format!("invalid recurrence rule: {e}")))?;
    let next_due = rule.next_occurrence(Utc::now());

    let template = sqlx::query_as::<_, TaskTemplate>(&format!(
        "INSERT INTO task_templates (id, user_id, title, description, priority, recurrence, next_due)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING {TEMPLATE_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(&new.title)
    .bind(&new.description)
    .bind(new.priority)
    .bind(&new.recurrence)
    .bind(next_due)
    .fetch_one(conn)
    .await?;

    Ok(template)
}

/// Fetch a template owned by `user_id`.
pub async fn get(
    conn: &mut PgConnection,
    user_id: Uuid,
    template_id: Uuid,
) -> StoreResult<TaskTemplate> {
    sqlx::query_as::<_, TaskTemplate>(&format!(
        "SELECT {TEMPLATE_COLUMNS} FROM task_templates WHERE id = $1 AND user_id = $2"
    ))
    .bind(template_id)
    .bind(user_id)
    .fetch_optional(conn)
    .await?
    .ok_or(StoreError::NotFound)
}

/// Fetch a template by bare id (worker path, no user scope).
pub async fn get_by_id(conn: &mut PgConnection, template_id: Uuid) -> StoreResult<TaskTemplate> {
    sqlx::query_as::<_, TaskTemplate>(&format!(
        "SELECT {TEMPLATE_COLUMNS} FROM task_templates WHERE id = $1"
    ))
    .bind(template_id)
    .fetch_optional(conn)
    .await?
    .ok_or(StoreError::NotFound)
}

/// Fetch a template by bare id and lock it for the rest of the
/// transaction, so concurrent generation jobs serialize on the row.
pub async fn get_by_id_for_update(
    conn: &mut PgConnection,
    template_id: Uuid,
) -> StoreResult<TaskTemplate> {
    sqlx::query_as::<_, TaskTemplate>(&format!(
        "SELECT {TEMPLATE_COLUMNS} FROM task_templates WHERE id = $1 FOR UPDATE"
    ))
    .bind(template_id)
    .fetch_optional(conn)
    .await?
    .ok_or(StoreError::NotFound)
}

/// List a user's templates, newest first.
pub async fn list(
    conn: &mut PgConnection,
    user_id: Uuid,
    offset: i64,
    limit: i64,
) -> StoreResult<Page<TaskTemplate>> {
    let (total,): (i64,) =
        sqlx::query_as("SELECT count(*) FROM task_templates WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&mut *conn)
            .await?;

    let items = sqlx::query_as::<_, TaskTemplate>(&format!(
        "SELECT {TEMPLATE_COLUMNS} FROM task_templates
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

/// Activate or deactivate a template.
pub async fn set_active(
    conn: &mut PgConnection,
    user_id: Uuid,
    template_id: Uuid,
    active: bool,
) -> StoreResult<TaskTemplate> {
    sqlx::query_as::<_, TaskTemplate>(&format!(
        "UPDATE task_templates SET active = $1, updated_at = now()
         WHERE id = $2 AND user_id = $3
         RETURNING {TEMPLATE_COLUMNS}"
    ))
    .bind(active)
    .bind(template_id)
    .bind(user_id)
    .fetch_optional(conn)
    .await?
    .ok_or(StoreError::NotFound)
}

/// Update the cached next occurrence (worker path).
pub async fn set_next_due(
    conn: &mut PgConnection,
    template_id: Uuid,
    next_due: Option<DateTime<Utc>>,
) -> StoreResult<()> {
    sqlx::query("UPDATE task_templates SET next_due = $1, updated_at = now() WHERE id = $2")
        .bind(next_due)
        .bind(template_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Delete a template. Existing instances keep running with
/// `template_id = NULL` via the foreign key's `ON DELETE SET NULL`.
pub async fn delete(
    conn: &mut PgConnection,
    user_id: Uuid,
    template_id: Uuid,
) -> StoreResult<()> {
    let result = sqlx::query("DELETE FROM task_templates WHERE id = $1 AND user_id = $2")
        .bind(template_id)
        .bind(user_id)
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// Active templates whose cached `next_due` is at or before `now`
/// (scheduler sweep for instance generation).
pub async fn due_templates(
    conn: &mut PgConnection,
    now: DateTime<Utc>,
) -> StoreResult<Vec<TaskTemplate>> {
    let rows = sqlx::query_as::<_, TaskTemplate>(&format!(
        "SELECT {TEMPLATE_COLUMNS} FROM task_templates
         WHERE active = TRUE AND next_due IS NOT NULL AND next_due <= $1"
    ))
    .bind(now)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}
