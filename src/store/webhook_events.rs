//! Processed-webhook ledger backing idempotent webhook handling.

use sqlx::PgConnection;

use super::StoreResult;

/// Record an event id as processed.
///
/// Returns `true` if this call inserted the row, `false` if the event was
/// already recorded — the caller drops duplicates on `false`.
pub async fn mark_processed(
    conn: &mut PgConnection,
    event_id: &str,
    event_type: &str,
) -> StoreResult<bool> {
    let result = sqlx::query(
        "INSERT INTO webhook_events (event_id, event_type)
         VALUES ($1, $2)
         ON CONFLICT (event_id) DO NOTHING",
    )
    .bind(event_id)
    .bind(event_type)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}
