//! Activity log: the durable audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Who caused a logged action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "activity_source", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ActivitySource {
    /// Direct user action.
    User,
    /// AI-initiated (confirmed) action.
    Ai,
    /// Background job or lifecycle machinery.
    System,
}

/// One audit record. Retained for 30 rolling days.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ActivityLog {
    /// Primary key.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Entity kind, e.g. `task`, `note`, `subscription`.
    pub entity_type: String,
    /// Entity id the action applies to.
    pub entity_id: Option<Uuid>,
    /// Action string, e.g. `task.completed`.
    pub action: String,
    /// Actor category.
    pub source: ActivitySource,
    /// Free-form extra context.
    pub extra: Option<sqlx::types::Json<serde_json::Value>>,
    /// Correlating HTTP request id.
    pub request_id: Option<Uuid>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
}
