//! Push subscription repository.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::PushSubscription;

use super::StoreResult;

const PUSH_COLUMNS: &str =
    "id, user_id, endpoint, p256dh_key, auth_key, active, created_at, updated_at";

/// Register (or re-activate) a push endpoint. Unique by endpoint: a
/// re-registration takes the endpoint over for the current user.
pub async fn upsert(
    conn: &mut PgConnection,
    user_id: Uuid,
    endpoint: &str,
    p256dh_key: &str,
    auth_key: &str,
) -> StoreResult<PushSubscription> {
    let row = sqlx::query_as::<_, PushSubscription>(&format!(
        "INSERT INTO push_subscriptions (id, user_id, endpoint, p256dh_key, auth_key)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (endpoint) DO UPDATE SET
             user_id = EXCLUDED.user_id,
             p256dh_key = EXCLUDED.p256dh_key,
             auth_key = EXCLUDED.auth_key,
             active = TRUE,
             updated_at = now()
         RETURNING {PUSH_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(endpoint)
    .bind(p256dh_key)
    .bind(auth_key)
    .fetch_one(conn)
    .await?;
    Ok(row)
}

/// Active push endpoints for a user.
pub async fn active_for_user(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> StoreResult<Vec<PushSubscription>> {
    let rows = sqlx::query_as::<_, PushSubscription>(&format!(
        "SELECT {PUSH_COLUMNS} FROM push_subscriptions
         WHERE user_id = $1 AND active = TRUE"
    ))
    .bind(user_id)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Deactivate an endpoint after a permanent delivery failure.
pub async fn deactivate(conn: &mut PgConnection, subscription_id: Uuid) -> StoreResult<()> {
    sqlx::query(
        "UPDATE push_subscriptions SET active = FALSE, updated_at = now() WHERE id = $1",
    )
    .bind(subscription_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Remove a user's endpoint registration.
pub async fn delete_for_user(
    conn: &mut PgConnection,
    user_id: Uuid,
    endpoint: &str,
) -> StoreResult<u64> {
    let result =
        sqlx::query("DELETE FROM push_subscriptions WHERE user_id = $1 AND endpoint = $2")
            .bind(user_id)
            .bind(endpoint)
            .execute(conn)
            .await?;
    Ok(result.rows_affected())
}
