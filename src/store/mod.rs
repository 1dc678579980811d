//! Persistence layer: per-entity repositories over Postgres.
//!
//! Every write operation executes inside a caller-supplied transaction
//! (`&mut PgConnection`), so domain changes and their synchronously
//! dispatched event effects commit or roll back atomically.
//!
//! Ownership rule: every read or write of a user-owned entity takes a
//! user id, and rows belonging to other users are reported as
//! [`StoreError::NotFound`] — never as a permission error — so that ids
//! cannot be probed for existence.

pub mod activity;
pub mod focus;
pub mod idempotency;
pub mod notes;
pub mod notifications;
pub mod push;
pub mod refresh_tokens;
pub mod reminders;
pub mod subtasks;
pub mod tasks;
pub mod templates;
pub mod tombstones;
pub mod users;
pub mod webhook_events;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;

use crate::config::DatabaseConfig;

// ── Errors ──────────────────────────────────────────────────────

/// Errors produced by repository operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Row does not exist or belongs to another user.
    #[error("not found")]
    NotFound,

    /// Optimistic version check failed.
    #[error("version conflict: supplied {supplied}, stored {stored}")]
    VersionConflict {
        /// Version the caller last read.
        supplied: i32,
        /// Version currently stored.
        stored: i32,
    },

    /// A tier/achievement cap would be exceeded.
    #[error("{what} limit of {limit} reached")]
    LimitExceeded {
        /// Which cap was hit (e.g. "task", "subtask").
        what: &'static str,
        /// The effective cap.
        limit: i64,
    },

    /// The task is archived and may not be mutated or completed.
    #[error("task is archived")]
    TaskArchived,

    /// Due date more than one year out.
    #[error("due date more than one year in the future")]
    DueDateExceeded,

    /// A field failed a length or range constraint.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Recovery target id already exists.
    #[error("entity id already exists")]
    IdCollision,

    /// Reorder list is not a permutation of the current subtask set.
    #[error("reorder list must be a permutation of the current subtasks")]
    InvalidReorder,

    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Convenience alias for repository results.
pub type StoreResult<T> = Result<T, StoreError>;

// ── Pool ────────────────────────────────────────────────────────

/// Build the shared connection pool from config.
///
/// `test_before_acquire` revalidates recycled connections; `max_lifetime`
/// recycles them hourly.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
        .max_lifetime(Duration::from_secs(config.max_lifetime_seconds))
        .test_before_acquire(true)
        .connect(&config.url)
        .await
}

// ── Pagination ──────────────────────────────────────────────────

/// A page of rows plus the total count for the envelope.
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// Rows in this page.
    pub items: Vec<T>,
    /// Offset the page starts at.
    pub offset: i64,
    /// Requested page size.
    pub limit: i64,
    /// Total matching rows.
    pub total: i64,
}

impl<T> Page<T> {
    /// Whether rows exist past this page.
    pub fn has_more(&self) -> bool {
        self.offset + (self.items.len() as i64) < self.total
    }
}

/// Clamp client-supplied pagination to sane bounds.
pub fn clamp_page(offset: Option<i64>, limit: Option<i64>) -> (i64, i64) {
    let offset = offset.unwrap_or(0).max(0);
    let limit = limit.unwrap_or(20).clamp(1, 100);
    (offset, limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_page_defaults() {
        assert_eq!(clamp_page(None, None), (0, 20));
    }

    #[test]
    fn test_clamp_page_bounds() {
        assert_eq!(clamp_page(Some(-5), Some(0)), (0, 1));
        assert_eq!(clamp_page(Some(10), Some(500)), (10, 100));
    }

    #[test]
    fn test_page_has_more() {
        let page = Page {
            items: vec![1, 2, 3],
            offset: 0,
            limit: 3,
            total: 10,
        };
        assert!(page.has_more());
        let last = Page {
            items: vec![1],
            offset: 9,
            limit: 3,
            total: 10,
        };
        assert!(!last.has_more());
    }
}
