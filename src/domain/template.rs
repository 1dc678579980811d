//! Recurring task template.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::task::TaskPriority;

/// A recurring-task definition.
///
/// `recurrence` is an RFC 5545 RRULE string; `next_due` caches the next
/// occurrence so the scheduler can enqueue generation without re-parsing.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TaskTemplate {
    /// Primary key.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Title applied to generated instances.
    pub title: String,
    /// Description applied to generated instances.
    pub description: Option<String>,
    /// Priority applied to generated instances.
    pub priority: TaskPriority,
    /// RFC 5545 recurrence rule.
    pub recurrence: String,
    /// Cached next occurrence.
    pub next_due: Option<DateTime<Utc>>,
    /// Inactive templates generate no instances.
    pub active: bool,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}
