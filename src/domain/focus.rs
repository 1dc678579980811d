//! Focus session entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A focus session against a task.
///
/// Ending a session adds its elapsed seconds to the task's accumulated
/// focus time. A session counts toward achievements when cumulative focus
/// reaches half of the task's estimated duration.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FocusSession {
    /// Primary key.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Task being focused on.
    pub task_id: Uuid,
    /// When the session started.
    pub started_at: DateTime<Utc>,
    /// When the session ended; open sessions have none.
    pub ended_at: Option<DateTime<Utc>>,
    /// Seconds recorded for this session.
    pub duration_seconds: Option<i64>,
}
