//! Background job queue entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Queue entry lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker.
    #[default]
    Pending,
    /// Claimed by a worker.
    Processing,
    /// Finished successfully (or skipped).
    Completed,
    /// Failed this attempt; re-queued with backoff.
    Failed,
    /// Exhausted its retry budget; requires manual reset.
    Dead,
}

/// Known job kinds. The worker maps each to a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Drain due reminders and deliver notifications.
    ReminderFire,
    /// Nightly streak sweep.
    StreakCalculate,
    /// Daily credit expiration, carry-over, and pro daily grants.
    CreditExpire,
    /// Grace-period expirations and warnings.
    SubscriptionCheck,
    /// Generate the next instance of a recurring template.
    RecurringTaskGenerate,
    /// Delete activity rows past retention, plus queue/idempotency cleanup.
    ActivityCleanup,
}

impl JobType {
    /// Stable string form used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReminderFire => "reminder_fire",
            Self::StreakCalculate => "streak_calculate",
            Self::CreditExpire => "credit_expire",
            Self::SubscriptionCheck => "subscription_check",
            Self::RecurringTaskGenerate => "recurring_task_generate",
            Self::ActivityCleanup => "activity_cleanup",
        }
    }
}

/// A durable queue entry.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Job {
    /// Primary key.
    pub id: Uuid,
    /// Job kind.
    pub job_type: JobType,
    /// Handler-specific data.
    pub payload: sqlx::types::Json<serde_json::Value>,
    /// Lifecycle state.
    pub status: JobStatus,
    /// Earliest execution time.
    pub scheduled_at: DateTime<Utc>,
    /// When the current/last attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Attempts made so far.
    pub attempts: i32,
    /// Retry budget.
    pub max_attempts: i32,
    /// Message from the most recent failure.
    pub last_error: Option<String>,
    /// When the current lock was taken.
    pub locked_at: Option<DateTime<Utc>>,
    /// Worker holding the lock.
    pub locked_by: Option<String>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Whether another retry attempt is allowed.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }
}
