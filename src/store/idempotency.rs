//! Idempotency key repository.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::IdempotencyKey;

use super::StoreResult;

const IDEMPOTENCY_COLUMNS: &str = "id, key, user_id, request_path, request_method, \
     request_hash, response_status, response_body, created_at, expires_at";

/// Hours an idempotency key replays before expiring.
pub const TTL_HOURS: i64 = 24;

/// Look up an unexpired record by (key, user).
pub async fn find(
    conn: &mut PgConnection,
    key: &str,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> StoreResult<Option<IdempotencyKey>> {
    let row = sqlx::query_as::<_, IdempotencyKey>(&format!(
        "SELECT {IDEMPOTENCY_COLUMNS} FROM idempotency_keys
         WHERE key = $1 AND user_id = $2 AND expires_at > $3"
    ))
    .bind(key)
    .bind(user_id)
    .bind(now)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

/// Store a response under a key with the standard TTL.
///
/// A concurrent duplicate insert loses to the unique (key, user_id) index;
/// the conflict is ignored so the first stored response wins.
#[allow(clippy::too_many_arguments)]
pub async fn store(
    conn: &mut PgConnection,
    key: &str,
    user_id: Uuid,
    request_path: &str,
    request_method: &str,
    request_hash: &str,
    response_status: i32,
    response_body: serde_json::Value,
) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO idempotency_keys
             (id, key, user_id, request_path, request_method, request_hash,
              response_status, response_body, expires_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         ON CONFLICT (key, user_id) DO NOTHING",
    )
    .bind(Uuid::new_v4())
    .bind(key)
    .bind(user_id)
    .bind(request_path)
    .bind(request_method)
    .bind(request_hash)
    .bind(response_status)
    .bind(sqlx::types::Json(response_body))
    .bind(Utc::now() + Duration::hours(TTL_HOURS))
    .execute(conn)
    .await?;
    Ok(())
}

/// Delete expired keys; returns rows removed.
pub async fn delete_expired(conn: &mut PgConnection, now: DateTime<Utc>) -> StoreResult<u64> {
    let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at < $1")
        .bind(now)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}
