//! Notification creation and push fan-out.

pub mod push;

use sqlx::PgConnection;
use uuid::Uuid;

use crate::domain::{Notification, NotificationType, PushSubscription};
use crate::store::{notifications, push as push_store, StoreResult};

/// Create an in-app notification and return it together with the user's
/// active push endpoints, so the caller can fan out after its
/// transaction commits.
pub async fn create_with_targets(
    conn: &mut PgConnection,
    user_id: Uuid,
    notification_type: NotificationType,
    title: &str,
    body: &str,
    action_url: Option<&str>,
    wants_push: bool,
) -> StoreResult<(Notification, Vec<PushSubscription>)> {
    let notification =
        notifications::create(conn, user_id, notification_type, title, body, action_url).await?;
    let targets = if wants_push {
        push_store::active_for_user(conn, user_id).await?
    } else {
        Vec::new()
    };
    Ok((notification, targets))
}
