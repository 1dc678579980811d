//! Reminder entity tied to a task.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// How `scheduled_at` is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "reminder_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReminderType {
    /// Fires `offset_minutes` before the task's due date.
    Before,
    /// Fires `offset_minutes` after the task's due date.
    After,
    /// Fires at an explicitly supplied time.
    Absolute,
}

/// Delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "reminder_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReminderMethod {
    /// Browser push via registered endpoints.
    Push,
    /// In-app notification only.
    InApp,
}

/// A reminder attached to a task. At most 5 per task.
///
/// Relative reminders' `scheduled_at` is recomputed whenever the owning
/// task's due date changes.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Reminder {
    /// Primary key.
    pub id: Uuid,
    /// Owning task.
    pub task_id: Uuid,
    /// Owning user (denormalized for firing queries).
    pub user_id: Uuid,
    /// Scheduling mode.
    pub reminder_type: ReminderType,
    /// Offset in minutes for before/after reminders.
    pub offset_minutes: Option<i32>,
    /// Resolved fire time.
    pub scheduled_at: DateTime<Utc>,
    /// Delivery channel.
    pub method: ReminderMethod,
    /// Whether the reminder has fired.
    pub fired: bool,
    /// When it fired.
    pub fired_at: Option<DateTime<Utc>>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

/// Compute `scheduled_at` for a relative reminder against a due date.
///
/// `before` subtracts the offset, `after` adds it. Absolute reminders keep
/// their supplied time and return `None` here.
pub fn relative_schedule(
    reminder_type: ReminderType,
    offset_minutes: i32,
    due_date: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match reminder_type {
        ReminderType::Before => Some(due_date - Duration::minutes(i64::from(offset_minutes))),
        ReminderType::After => Some(due_date + Duration::minutes(i64::from(offset_minutes))),
        ReminderType::Absolute => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_before_subtracts_offset() {
        let due = Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).single().expect("ts");
        let at = relative_schedule(ReminderType::Before, 30, due).expect("scheduled");
        assert_eq!(at, due - Duration::minutes(30));
    }

    #[test]
    fn test_after_adds_offset() {
        let due = Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).single().expect("ts");
        let at = relative_schedule(ReminderType::After, 45, due).expect("scheduled");
        assert_eq!(at, due + Duration::minutes(45));
    }

    #[test]
    fn test_absolute_is_not_derived() {
        let due = Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).single().expect("ts");
        assert!(relative_schedule(ReminderType::Absolute, 10, due).is_none());
    }
}
