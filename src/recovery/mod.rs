//! Task deletion tombstones and recovery.
//!
//! A hard delete serializes the task with its subtasks and pending
//! reminders into a tombstone (3-entry ring buffer per user). Recovery
//! inside the 14-day window recreates the task under its original id and
//! timestamps; the achievement engine ignores the recovery-flagged
//! creation so streaks and milestones are unaffected.

use chrono::Utc;
use sqlx::PgConnection;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::config::TaskwellConfig;
use crate::domain::{
    DeletionTombstone, Reminder, Subtask, TaskInstance, TaskTombstonePayload,
    TOMBSTONE_SCHEMA_VERSION,
};
use crate::events::{DomainEvent, EventBus, EventMeta};
use crate::store::{reminders, subtasks, tasks, tombstones, StoreError};

/// Errors from tombstone recovery.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// Tombstone missing, owned by someone else, or past the window.
    /// All three are indistinguishable to the caller.
    #[error("tombstone not found")]
    NotFound,

    /// A row with the original task id already exists.
    #[error("a task with the original id already exists")]
    IdCollision,

    /// Stored payload failed to round-trip.
    #[error("tombstone payload unreadable: {0}")]
    Payload(String),

    /// Store failure.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for RecoveryError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => RecoveryError::NotFound,
            StoreError::IdCollision => RecoveryError::IdCollision,
            other => RecoveryError::Store(other),
        }
    }
}

/// Serialize a task (with children) into a tombstone. Called inside the
/// delete transaction before the row goes away.
pub async fn tombstone_task(
    conn: &mut PgConnection,
    user_id: Uuid,
    task: &TaskInstance,
    task_subtasks: Vec<Subtask>,
    task_reminders: Vec<Reminder>,
) -> Result<DeletionTombstone, StoreError> {
    let pending_reminders = task_reminders.into_iter().filter(|r| !r.fired).collect();
    let payload = TaskTombstonePayload {
        schema_version: TOMBSTONE_SCHEMA_VERSION,
        task: task.clone(),
        subtasks: task_subtasks,
        pending_reminders,
    };
    let serialized = serde_json::to_value(&payload)
        .map_err(|e| StoreError::Validation(format!("tombstone serialization failed: {e}")))?;
    tombstones::push(conn, user_id, "task", task.id, serialized).await
}

/// Recover a task from a tombstone.
///
/// Restores the task under its original id and timestamps, recreates its
/// subtasks, restores only reminders still scheduled in the future,
/// deletes the tombstone, and emits a recovery-flagged TaskCreated event.
pub async fn recover_task(
    conn: &mut PgConnection,
    config: &TaskwellConfig,
    bus: &EventBus,
    user_id: Uuid,
    tombstone_id: Uuid,
    request_id: Option<Uuid>,
) -> Result<TaskInstance, RecoveryError> {
    let tombstone = tombstones::get(&mut *conn, user_id, tombstone_id).await?;

    let now = Utc::now();
    if !tombstones::within_recovery_window(tombstone.deleted_at, now) {
        // Expired tombstones read as missing.
        return Err(RecoveryError::NotFound);
    }

    let payload: TaskTombstonePayload = serde_json::from_value(tombstone.payload.0.clone())
        .map_err(|e| RecoveryError::Payload(e.to_string()))?;
    if payload.schema_version > TOMBSTONE_SCHEMA_VERSION {
        return Err(RecoveryError::Payload(format!(
            "payload schema {} is newer than supported {}",
            payload.schema_version, TOMBSTONE_SCHEMA_VERSION
        )));
    }

    let task = tasks::insert_with_id(&mut *conn, &payload.task).await?;
    subtasks::insert_with_ids(&mut *conn, &payload.subtasks).await?;

    let future_reminders: Vec<Reminder> = payload
        .pending_reminders
        .into_iter()
        .filter(|r| r.scheduled_at > now)
        .collect();
    reminders::insert_with_ids(&mut *conn, &future_reminders).await?;

    tombstones::delete(&mut *conn, tombstone.id).await?;

    bus.dispatch(
        DomainEvent::TaskCreated {
            meta: EventMeta {
                user_id,
                occurred_at: now,
                source: crate::domain::ActivitySource::User,
                request_id,
            },
            task_id: task.id,
            recovered: true,
        },
        conn,
        config,
    )
    .await;

    info!(
        task_id = %task.id,
        tombstone_id = %tombstone.id,
        reminders_restored = future_reminders.len(),
        "task recovered from tombstone"
    );
    Ok(task)
}
