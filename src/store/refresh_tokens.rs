//! Refresh token repository. Only token hashes are stored.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::RefreshToken;

use super::StoreResult;

const TOKEN_COLUMNS: &str = "id, user_id, token_hash, expires_at, revoked_at, created_at";

/// Insert a refresh token hash valid for `lifetime_days`.
pub async fn insert(
    conn: &mut PgConnection,
    user_id: Uuid,
    token_hash: &str,
    lifetime_days: i64,
) -> StoreResult<RefreshToken> {
    let row = sqlx::query_as::<_, RefreshToken>(&format!(
        "INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at)
         VALUES ($1, $2, $3, $4)
         RETURNING {TOKEN_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(token_hash)
    .bind(Utc::now() + Duration::days(lifetime_days))
    .fetch_one(conn)
    .await?;
    Ok(row)
}

/// Find a token row by hash.
pub async fn find_by_hash(
    conn: &mut PgConnection,
    token_hash: &str,
) -> StoreResult<Option<RefreshToken>> {
    let row = sqlx::query_as::<_, RefreshToken>(&format!(
        "SELECT {TOKEN_COLUMNS} FROM refresh_tokens WHERE token_hash = $1"
    ))
    .bind(token_hash)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

/// Revoke one token (rotation or logout).
pub async fn revoke(conn: &mut PgConnection, token_id: Uuid) -> StoreResult<()> {
    sqlx::query("UPDATE refresh_tokens SET revoked_at = now() WHERE id = $1 AND revoked_at IS NULL")
        .bind(token_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Revoke every live token for a user (logout-everywhere).
pub async fn revoke_all_for_user(conn: &mut PgConnection, user_id: Uuid) -> StoreResult<u64> {
    let result = sqlx::query(
        "UPDATE refresh_tokens SET revoked_at = now()
         WHERE user_id = $1 AND revoked_at IS NULL",
    )
    .bind(user_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

/// Delete tokens expired before `cutoff` (cleanup sweep).
pub async fn delete_expired(conn: &mut PgConnection, cutoff: DateTime<Utc>) -> StoreResult<u64> {
    let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < $1")
        .bind(cutoff)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}
