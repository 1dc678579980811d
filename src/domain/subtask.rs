//! Subtask entity, reached only through its parent task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Who created the subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "subtask_source", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubtaskSource {
    /// Created by the user.
    #[default]
    User,
    /// Accepted from an AI suggestion.
    Ai,
}

/// A child item of a task.
///
/// Sibling `order_index` values form the gapless sequence `0..N-1` at all
/// times outside a single transaction.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Subtask {
    /// Primary key.
    pub id: Uuid,
    /// Parent task.
    pub task_id: Uuid,
    /// Title, 1–200 characters.
    pub title: String,
    /// Whether the subtask is complete.
    pub completed: bool,
    /// Completion time.
    pub completed_at: Option<DateTime<Utc>>,
    /// Position among siblings, 0-based and gapless.
    pub order_index: i32,
    /// Origin of the subtask.
    pub source: SubtaskSource,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}
