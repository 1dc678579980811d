//! Deletion tombstones: serialized snapshots kept for recovery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::subtask::Subtask;
use super::task::TaskInstance;

/// Version tag for tombstone payload evolution.
pub const TOMBSTONE_SCHEMA_VERSION: u32 = 1;

/// Ring-buffer entry holding a deleted entity. At most 3 per user; the
/// oldest is dropped on overflow.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DeletionTombstone {
    /// Primary key (the tombstone's own id, not the entity's).
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Entity kind, currently always `task`.
    pub entity_type: String,
    /// Original entity id, reused on recovery.
    pub entity_id: Uuid,
    /// Serialized entity payload including children.
    pub payload: sqlx::types::Json<serde_json::Value>,
    /// When the entity was deleted.
    pub deleted_at: DateTime<Utc>,
}

/// Serialized form of a deleted task, including its children.
///
/// Must round-trip across schema evolution; `schema_version` gates
/// future migrations of old payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTombstonePayload {
    /// Payload format version.
    pub schema_version: u32,
    /// The deleted task with original timestamps.
    pub task: TaskInstance,
    /// Its subtasks in order.
    pub subtasks: Vec<Subtask>,
    /// Reminders that had not fired at deletion time.
    pub pending_reminders: Vec<super::reminder::Reminder>,
}
