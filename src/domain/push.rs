//! Browser push subscription entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A browser push endpoint registered by a user. Unique by endpoint.
///
/// Permanent delivery failures (endpoint gone, key invalid) deactivate
/// the subscription instead of deleting it.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PushSubscription {
    /// Primary key.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Push service endpoint URL.
    pub endpoint: String,
    /// Client public key (`p256dh`).
    pub p256dh_key: String,
    /// Client auth secret.
    pub auth_key: String,
    /// Inactive endpoints are skipped on delivery.
    pub active: bool,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}
