//! Reminder repository.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::reminder::relative_schedule;
use crate::domain::{Reminder, ReminderMethod, ReminderType};

use super::{tasks, StoreError, StoreResult};

const REMINDER_COLUMNS: &str = "id, task_id, user_id, reminder_type, offset_minutes, \
     scheduled_at, method, fired, fired_at, created_at, updated_at";

/// Fields for creating a reminder.
#[derive(Debug, Clone)]
pub struct NewReminder {
    /// Scheduling mode.
    pub reminder_type: ReminderType,
    /// Offset in minutes, required for before/after.
    pub offset_minutes: Option<i32>,
    /// Fire time, required for absolute.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Delivery channel.
    pub method: ReminderMethod,
}

/// Attach a reminder to a task, resolving `scheduled_at` from its type.
///
/// Relative reminders require the task to have a due date. At most
/// `max_per_task` reminders per task.
pub async fn create(
    conn: &mut PgConnection,
    user_id: Uuid,
    task_id: Uuid,
    new: NewReminder,
    max_per_task: i64,
) -> StoreResult<Reminder> {
    let task = tasks::get_for_update(&mut *conn, user_id, task_id).await?;

    let scheduled_at = match new.reminder_type {
        ReminderType::Absolute => new.scheduled_at.ok_or_else(|| {
            StoreError::Validation("absolute reminders require scheduled_at".to_owned())
        })?,
        relative => {
            let offset = new.offset_minutes.ok_or_else(|| {
                StoreError::Validation("relative reminders require offset_minutes".to_owned())
            })?;
            if offset < 0 {
                return Err(StoreError::Validation(
                    "offset_minutes must be non-negative".to_owned(),
                ));
            }
            let due = task.due_date.ok_or_else(|| {
                StoreError::Validation("task has no due date to schedule against".to_owned())
            })?;
            relative_schedule(relative, offset, due)
                .ok_or_else(|| StoreError::Validation("unschedulable reminder".to_owned()))?
        }
    };

    let (count,): (i64,) = sqlx::query_as("SELECT count(*) FROM reminders WHERE task_id = $1")
        .bind(task_id)
        .fetch_one(&mut *conn)
        .await?;
    if count >= max_per_task {
        return Err(StoreError::LimitExceeded {
            what: "reminder",
            limit: max_per_task,
        });
    }

    let reminder = sqlx::query_as::<_, Reminder>(&format!(
        "INSERT INTO reminders
             (id, task_id, user_id, reminder_type, offset_minutes, scheduled_at, method)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING {REMINDER_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(task_id)
    .bind(user_id)
    .bind(new.reminder_type)
    .bind(new.offset_minutes)
    .bind(scheduled_at)
    .bind(new.method)
    .fetch_one(conn)
    .await?;

    Ok(reminder)
}

/// Fetch a reminder owned by `user_id`.
pub async fn get(
    conn: &mut PgConnection,
    user_id: Uuid,
    reminder_id: Uuid,
) -> StoreResult<Reminder> {
    sqlx::query_as::<_, Reminder>(&format!(
        "SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = $1 AND user_id = $2"
    ))
    .bind(reminder_id)
    .bind(user_id)
    .fetch_optional(conn)
    .await?
    .ok_or(StoreError::NotFound)
}

/// List reminders for a task.
pub async fn list_for_task(
    conn: &mut PgConnection,
    user_id: Uuid,
    task_id: Uuid,
) -> StoreResult<Vec<Reminder>> {
    tasks::get(&mut *conn, user_id, task_id).await?;
    let rows = sqlx::query_as::<_, Reminder>(&format!(
        "SELECT {REMINDER_COLUMNS} FROM reminders
         WHERE task_id = $1 ORDER BY scheduled_at"
    ))
    .bind(task_id)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Delete a reminder.
pub async fn delete(
    conn: &mut PgConnection,
    user_id: Uuid,
    reminder_id: Uuid,
) -> StoreResult<()> {
    let result = sqlx::query("DELETE FROM reminders WHERE id = $1 AND user_id = $2")
        .bind(reminder_id)
        .bind(user_id)
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// Recompute relative reminders after the owning task's due date changed.
///
/// Each before/after reminder gets a fresh `scheduled_at`; ones whose new
/// time is in the future are reset to unfired so they can fire again.
pub async fn recalculate_for_task(
    conn: &mut PgConnection,
    task_id: Uuid,
    new_due: DateTime<Utc>,
    now: DateTime<Utc>,
) -> StoreResult<u64> {
    let rows = sqlx::query_as::<_, Reminder>(&format!(
        "SELECT {REMINDER_COLUMNS} FROM reminders
         WHERE task_id = $1 AND reminder_type <> 'absolute'"
    ))
    .bind(task_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut updated = 0;
    for reminder in rows {
        let Some(offset) = reminder.offset_minutes else {
            continue;
        };
        let Some(scheduled_at) = relative_schedule(reminder.reminder_type, offset, new_due) else {
            continue;
        };
        let refire = scheduled_at > now;
        sqlx::query(
            "UPDATE reminders SET
                 scheduled_at = $1,
                 fired = CASE WHEN $2 THEN FALSE ELSE fired END,
                 fired_at = CASE WHEN $2 THEN NULL ELSE fired_at END,
                 updated_at = now()
             WHERE id = $3",
        )
        .bind(scheduled_at)
        .bind(refire)
        .bind(reminder.id)
        .execute(&mut *conn)
        .await?;
        updated += 1;
    }
    Ok(updated)
}

/// Pending reminders whose fire time has arrived, row-locked for the
/// firing transaction. Skips rows already claimed by a concurrent drain.
pub async fn due_for_firing(
    conn: &mut PgConnection,
    now: DateTime<Utc>,
    limit: i64,
) -> StoreResult<Vec<Reminder>> {
    let rows = sqlx::query_as::<_, Reminder>(&format!(
        "SELECT {REMINDER_COLUMNS} FROM reminders
         WHERE fired = FALSE AND scheduled_at <= $1
         ORDER BY scheduled_at
         LIMIT $2
         FOR UPDATE SKIP LOCKED"
    ))
    .bind(now)
    .bind(limit)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Mark a reminder fired.
pub async fn mark_fired(conn: &mut PgConnection, reminder_id: Uuid) -> StoreResult<()> {
    sqlx::query(
        "UPDATE reminders SET fired = TRUE, fired_at = now(), updated_at = now() WHERE id = $1",
    )
    .bind(reminder_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Recreate reminder rows from a tombstone payload (recovery path).
pub async fn insert_with_ids(
    conn: &mut PgConnection,
    reminders: &[Reminder],
) -> StoreResult<()> {
    for reminder in reminders {
        sqlx::query(
            "INSERT INTO reminders
                 (id, task_id, user_id, reminder_type, offset_minutes, scheduled_at, method,
                  fired, fired_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(reminder.id)
        .bind(reminder.task_id)
        .bind(reminder.user_id)
        .bind(reminder.reminder_type)
        .bind(reminder.offset_minutes)
        .bind(reminder.scheduled_at)
        .bind(reminder.method)
        .bind(reminder.fired)
        .bind(reminder.fired_at)
        .bind(reminder.created_at)
        .bind(reminder.updated_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}
