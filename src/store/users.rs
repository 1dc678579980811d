//! User repository.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::{User, UserTier};

use super::{StoreError, StoreResult};

const USER_COLUMNS: &str =
    "id, google_sub, email, display_name, avatar_url, timezone, tier, created_at, updated_at";

/// Identity-provider profile used for get-or-create on sign-in.
#[derive(Debug, Clone)]
pub struct ExternalProfile {
    /// Provider subject id.
    pub sub: String,
    /// Verified email.
    pub email: String,
    /// Display name.
    pub name: String,
    /// Avatar URL.
    pub picture: Option<String>,
}

/// Fetch a user by id.
pub async fn get(conn: &mut PgConnection, user_id: Uuid) -> StoreResult<User> {
    sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
        .bind(user_id)
        .fetch_optional(conn)
        .await?
        .ok_or(StoreError::NotFound)
}

/// Find a user by the external provider subject, creating one (plus its
/// achievement-state row) on first sign-in. Returns the user and whether
/// it was newly created.
pub async fn get_or_create_by_sub(
    conn: &mut PgConnection,
    profile: &ExternalProfile,
) -> StoreResult<(User, bool)> {
    let existing = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE google_sub = $1"
    ))
    .bind(&profile.sub)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(user) = existing {
        return Ok((user, false));
    }

    let user = sqlx::query_as::<_, User>(&format!(
        "INSERT INTO users (id, google_sub, email, display_name, avatar_url)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING {USER_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(&profile.sub)
    .bind(&profile.email)
    .bind(&profile.name)
    .bind(&profile.picture)
    .fetch_one(&mut *conn)
    .await?;

    sqlx::query("INSERT INTO user_achievement_states (id, user_id) VALUES ($1, $2)")
        .bind(Uuid::new_v4())
        .bind(user.id)
        .execute(conn)
        .await?;

    Ok((user, true))
}

/// Patch for profile updates.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    /// New display name.
    pub display_name: Option<String>,
    /// New avatar URL (`Some(None)` clears it).
    pub avatar_url: Option<Option<String>>,
    /// New IANA timezone.
    pub timezone: Option<String>,
}

/// Update profile fields. Tier is deliberately not patchable here; only
/// the subscription engine mutates it.
pub async fn update_profile(
    conn: &mut PgConnection,
    user_id: Uuid,
    patch: UserPatch,
) -> StoreResult<User> {
    if let Some(name) = &patch.display_name {
        let len = name.chars().count();
        if len == 0 || len > 100 {
            return Err(StoreError::Validation(
                "display_name must be 1-100 characters".to_owned(),
            ));
        }
    }
    if let Some(tz) = &patch.timezone {
        if !looks_like_iana_timezone(tz) {
            return Err(StoreError::Validation(format!("unknown timezone {tz:?}")));
        }
    }

    let current = get(&mut *conn, user_id).await?;
    let display_name = patch.display_name.unwrap_or(current.display_name);
    let avatar_url = patch.avatar_url.unwrap_or(current.avatar_url);
    let timezone = patch.timezone.unwrap_or(current.timezone);

    let user = sqlx::query_as::<_, User>(&format!(
        "UPDATE users SET display_name = $1, avatar_url = $2, timezone = $3, updated_at = now()
         WHERE id = $4
         RETURNING {USER_COLUMNS}"
    ))
    .bind(&display_name)
    .bind(&avatar_url)
    .bind(&timezone)
    .bind(user_id)
    .fetch_one(conn)
    .await?;

    Ok(user)
}

/// Set the user's tier. Only the subscription engine calls this.
pub async fn set_tier(conn: &mut PgConnection, user_id: Uuid, tier: UserTier) -> StoreResult<()> {
    let result = sqlx::query("UPDATE users SET tier = $1, updated_at = now() WHERE id = $2")
        .bind(tier)
        .bind(user_id)
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// Ids of every pro user (daily credit grant sweep).
pub async fn pro_user_ids(conn: &mut PgConnection) -> StoreResult<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE tier = 'pro'")
        .fetch_all(conn)
        .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Shallow shape check for IANA timezone names (`Area/Location` or `UTC`).
///
/// Full zone-database validation lives client-side; the server only
/// rejects obviously malformed values.
fn looks_like_iana_timezone(tz: &str) -> bool {
    if tz == "UTC" {
        return true;
    }
    if tz.is_empty() || tz.len() > 64 {
        return false;
    }
    let mut parts = tz.split('/');
    let area = parts.next().unwrap_or_default();
    let location = parts.next().unwrap_or_default();
    !area.is_empty()
        && !location.is_empty()
        && tz.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '+' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timezone_shape_check() {
        assert!(looks_like_iana_timezone("UTC"));
        assert!(looks_like_iana_timezone("Europe/Berlin"));
        assert!(looks_like_iana_timezone("America/New_York"));
        assert!(!looks_like_iana_timezone(""));
        assert!(!looks_like_iana_timezone("Berlin"));
        assert!(!looks_like_iana_timezone("Europe/Berlin; DROP TABLE"));
    }
}
