//! User entity and subscription tier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Subscription tier a user is entitled to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "user_tier", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UserTier {
    /// Default tier for new sign-ins.
    #[default]
    Free,
    /// Paid tier; mutated only by the subscription engine.
    Pro,
}

impl UserTier {
    /// Stable string form used in logs and responses.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
        }
    }
}

/// A registered user, created on first external sign-in.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    /// Primary key.
    pub id: Uuid,
    /// External identity provider subject id (unique).
    pub google_sub: String,
    /// Verified email (unique).
    pub email: String,
    /// Display name from the identity provider, editable afterwards.
    pub display_name: String,
    /// Avatar URL.
    pub avatar_url: Option<String>,
    /// IANA timezone name; defaults to UTC.
    pub timezone: String,
    /// Current subscription tier.
    pub tier: UserTier,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}
