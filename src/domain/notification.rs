//! In-app notification entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Notification category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "notification_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// A reminder fired.
    Reminder,
    /// Subscription lifecycle message.
    Subscription,
    /// Achievement unlocked.
    Achievement,
    /// General system message.
    System,
}

/// A user-scoped alert.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Notification {
    /// Primary key.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Category.
    pub notification_type: NotificationType,
    /// Short title.
    pub title: String,
    /// Body text.
    pub body: String,
    /// Optional client navigation target.
    pub action_url: Option<String>,
    /// Whether the user has read it.
    pub read: bool,
    /// When it was read.
    pub read_at: Option<DateTime<Utc>>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
}
