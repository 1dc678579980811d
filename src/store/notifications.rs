//! Notification repository.

use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::{Notification, NotificationType};

use super::{Page, StoreError, StoreResult};

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, notification_type, title, body, action_url, read, read_at, created_at";

/// Insert a notification.
pub async fn create(
    conn: &mut PgConnection,
    user_id: Uuid,
    notification_type: NotificationType,
    title: &str,
    body: &str,
    action_url: Option<&str>,
) -> StoreResult<Notification> {
    let row = sqlx::query_as::<_, Notification>(&format!(
        "INSERT INTO notifications (id, user_id, notification_type, title, body, action_url)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING {NOTIFICATION_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(notification_type)
    .bind(title)
    .bind(body)
    .bind(action_url)
    .fetch_one(conn)
    .await?;
    Ok(row)
}

/// List notifications, newest first, optionally unread only.
pub async fn list(
    conn: &mut PgConnection,
    user_id: Uuid,
    unread_only: bool,
    offset: i64,
    limit: i64,
) -> StoreResult<Page<Notification>> {
    let filter = if unread_only { " AND read = FALSE" } else { "" };
    let (total,): (i64,) = sqlx::query_as(&format!(
        "SELECT count(*) FROM notifications WHERE user_id = $1{filter}"
    ))
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;

    let items = sqlx::query_as::<_, Notification>(&format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notifications
         WHERE user_id = $1{filter}
         ORDER BY created_at DESC OFFSET $2 LIMIT $3"
    ))
    .bind(user_id)
    .bind(offset)
    .bind(limit)
    .fetch_all(conn)
    .await?;

    Ok(Page {
        items,
        offset,
        limit,
        total,
    })
}

/// Mark one notification read.
pub async fn mark_read(
    conn: &mut PgConnection,
    user_id: Uuid,
    notification_id: Uuid,
) -> StoreResult<Notification> {
    sqlx::query_as::<_, Notification>(&format!(
        "UPDATE notifications SET read = TRUE, read_at = COALESCE(read_at, now())
         WHERE id = $1 AND user_id = $2
         RETURNING {NOTIFICATION_COLUMNS}"
    ))
    .bind(notification_id)
    .bind(user_id)
    .fetch_optional(conn)
    .await?
    .ok_or(StoreError::NotFound)
}

/// Mark all of a user's notifications read; returns the count flipped.
pub async fn mark_all_read(conn: &mut PgConnection, user_id: Uuid) -> StoreResult<u64> {
    let result = sqlx::query(
        "UPDATE notifications SET read = TRUE, read_at = now()
         WHERE user_id = $1 AND read = FALSE",
    )
    .bind(user_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}
