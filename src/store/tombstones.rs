//! Deletion tombstone repository: a 3-entry ring buffer per user.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::DeletionTombstone;

use super::{StoreError, StoreResult};

const TOMBSTONE_COLUMNS: &str = "id, user_id, entity_type, entity_id, payload, deleted_at";

/// Tombstones kept per user; the oldest is dropped on overflow.
pub const MAX_PER_USER: i64 = 3;

/// Days within which a tombstone can be recovered.
pub const RECOVERY_WINDOW_DAYS: i64 = 14;

/// Insert a tombstone, enforcing the per-user ring buffer.
pub async fn push(
    conn: &mut PgConnection,
    user_id: Uuid,
    entity_type: &str,
    entity_id: Uuid,
    payload: serde_json::Value,
) -> StoreResult<DeletionTombstone> {
    let row = sqlx::query_as::<_, DeletionTombstone>(&format!(
        "INSERT INTO deletion_tombstones (id, user_id, entity_type, entity_id, payload)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING {TOMBSTONE_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(entity_type)
    .bind(entity_id)
    .bind(sqlx::types::Json(payload))
    .fetch_one(&mut *conn)
    .await?;

    // Drop the oldest entries beyond the ring size.
    sqlx::query(
        "DELETE FROM deletion_tombstones
         WHERE user_id = $1 AND id NOT IN (
             SELECT id FROM deletion_tombstones
             WHERE user_id = $1
             ORDER BY deleted_at DESC, id DESC
             LIMIT $2
         )",
    )
    .bind(user_id)
    .bind(MAX_PER_USER)
    .execute(conn)
    .await?;

    Ok(row)
}

/// Fetch a tombstone owned by `user_id`.
pub async fn get(
    conn: &mut PgConnection,
    user_id: Uuid,
    tombstone_id: Uuid,
) -> StoreResult<DeletionTombstone> {
    sqlx::query_as::<_, DeletionTombstone>(&format!(
        "SELECT {TOMBSTONE_COLUMNS} FROM deletion_tombstones WHERE id = $1 AND user_id = $2"
    ))
    .bind(tombstone_id)
    .bind(user_id)
    .fetch_optional(conn)
    .await?
    .ok_or(StoreError::NotFound)
}

/// List a user's tombstones, newest first.
pub async fn list(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> StoreResult<Vec<DeletionTombstone>> {
    let rows = sqlx::query_as::<_, DeletionTombstone>(&format!(
        "SELECT {TOMBSTONE_COLUMNS} FROM deletion_tombstones
         WHERE user_id = $1 ORDER BY deleted_at DESC"
    ))
    .bind(user_id)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Delete a tombstone after successful recovery.
pub async fn delete(conn: &mut PgConnection, tombstone_id: Uuid) -> StoreResult<()> {
    sqlx::query("DELETE FROM deletion_tombstones WHERE id = $1")
        .bind(tombstone_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Whether a tombstone is still inside the recovery window.
pub fn within_recovery_window(deleted_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - deleted_at <= Duration::days(RECOVERY_WINDOW_DAYS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_window_boundary() {
        let now = Utc::now();
        assert!(within_recovery_window(now - Duration::days(13), now));
        assert!(within_recovery_window(now - Duration::days(14), now));
        assert!(!within_recovery_window(
            now - Duration::days(14) - Duration::seconds(1),
            now
        ));
    }
}
