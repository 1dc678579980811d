//! Refresh token records. Only the hash of the opaque token is stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A server-side refresh token record.
///
/// Tokens are rotated on every refresh: the presented token's row is
/// marked revoked and a fresh one is issued.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RefreshToken {
    /// Primary key.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// SHA-256 hex digest of the opaque token.
    pub token_hash: String,
    /// Expiry (7 days from issuance).
    pub expires_at: DateTime<Utc>,
    /// Set when rotated out or logged out.
    pub revoked_at: Option<DateTime<Utc>>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
}

impl RefreshToken {
    /// Whether the token can still be exchanged.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && now < self.expires_at
    }
}
