//! Idempotency key records for write deduplication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A stored idempotent response, scoped by (key, user). Expires after 24 h.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct IdempotencyKey {
    /// Primary key.
    pub id: Uuid,
    /// Client-supplied token.
    pub key: String,
    /// Owning user.
    pub user_id: Uuid,
    /// Request path the key was used against.
    pub request_path: String,
    /// Request method (`POST` or `PATCH`).
    pub request_method: String,
    /// SHA-256 hex digest of the request body.
    pub request_hash: String,
    /// Cached response status.
    pub response_status: i32,
    /// Cached response body.
    pub response_body: sqlx::types::Json<serde_json::Value>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// When the key stops replaying.
    pub expires_at: DateTime<Utc>,
}
