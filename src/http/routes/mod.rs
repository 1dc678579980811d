//! Resource route handlers.

pub mod achievements;
pub mod activity;
pub mod ai;
pub mod auth;
pub mod credits;
pub mod focus;
pub mod health;
pub mod notes;
pub mod notifications;
pub mod recovery;
pub mod reminders;
pub mod subscription;
pub mod subtasks;
pub mod tasks;
pub mod templates;
pub mod users;
pub mod webhooks;

use sqlx::PgConnection;

use crate::billing;
use crate::domain::{User, UserTier};
use crate::http::error::ApiError;

/// Serde helpers shared by patch-shaped request bodies.
pub mod serde_util {
    use serde::{Deserialize, Deserializer};

    /// Distinguish an absent field (`None`) from an explicit null
    /// (`Some(None)`), so PATCH bodies can clear nullable columns.
    pub fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

/// The tier a request is served at: the stored tier cross-checked
/// against the subscription state, so a cancelled-but-paid subscription
/// still reads as pro until its period ends.
pub async fn effective_tier(conn: &mut PgConnection, user: &User) -> Result<UserTier, ApiError> {
    let subscription = billing::get_for_user(conn, user.id).await?;
    Ok(billing::effective_tier(
        user.tier,
        subscription.as_ref(),
        chrono::Utc::now(),
    ))
}
