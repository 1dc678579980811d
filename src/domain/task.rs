//! Task entity: the user-owned unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "task_priority", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    /// Low priority.
    Low,
    /// Default priority.
    #[default]
    Medium,
    /// High priority.
    High,
}

/// How a task reached the completed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "completed_by", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CompletedBy {
    /// The user completed the task directly.
    Manual,
    /// The last incomplete subtask was completed.
    Auto,
    /// Force-complete closed the task and all remaining subtasks.
    Force,
}

/// A concrete task instance.
///
/// `version` is the optimistic-locking counter: every successful update
/// increments it, and callers must supply the version they last read.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TaskInstance {
    /// Primary key.
    pub id: Uuid,
    /// Owning user; rows of other users are invisible.
    pub user_id: Uuid,
    /// Title, 1–200 characters.
    pub title: String,
    /// Optional description; length cap depends on tier.
    pub description: Option<String>,
    /// Priority.
    pub priority: TaskPriority,
    /// Optional due date; at most one year out.
    pub due_date: Option<DateTime<Utc>>,
    /// Estimated duration in minutes (1–720).
    pub estimated_minutes: Option<i32>,
    /// Accumulated focus time in seconds.
    pub focus_seconds: i64,
    /// Whether the task is complete.
    pub completed: bool,
    /// Completion time; set exactly when `completed` is true.
    pub completed_at: Option<DateTime<Utc>>,
    /// How the task was completed.
    pub completed_by: Option<CompletedBy>,
    /// Soft-delete flag; hidden tasks are excluded from reads.
    pub hidden: bool,
    /// Archived tasks may not be mutated or completed.
    pub archived: bool,
    /// Generating recurring template, if any. Set at creation, never changed.
    pub template_id: Option<Uuid>,
    /// Optimistic locking counter, starts at 1.
    pub version: i32,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl TaskInstance {
    /// Whether this task can still be mutated or completed.
    pub fn is_mutable(&self) -> bool {
        !self.archived
    }
}
