//! Notification endpoints.

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::http::error::ApiError;
use crate::http::middleware::CurrentUser;
use crate::http::pagination::{data, paginated};
use crate::http::state::AppState;
use crate::store::{clamp_page, notifications, push};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Only unread notifications.
    #[serde(default)]
    pub unread_only: bool,
    /// Rows to skip.
    pub offset: Option<i64>,
    /// Page size (clamped server-side).
    pub limit: Option<i64>,
}

/// `GET /api/v1/notifications` — newest first.
pub async fn list(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (offset, limit) = clamp_page(query.offset, query.limit);
    let mut conn = state.pool.acquire().await.map_err(sqlx::Error::from)?;
    let page =
        notifications::list(&mut conn, user.id, query.unread_only, offset, limit).await?;
    Ok(paginated(page))
}

/// `POST /api/v1/notifications/{id}/read` — mark one read.
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(notification_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut tx = state.pool.begin().await?;
    let notification = notifications::mark_read(&mut *tx, user.id, notification_id).await?;
    tx.commit().await?;
    Ok(data(notification))
}

/// `POST /api/v1/notifications/read-all` — mark everything read.
pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut tx = state.pool.begin().await?;
    let updated = notifications::mark_all_read(&mut *tx, user.id).await?;
    tx.commit().await?;
    Ok(data(serde_json::json!({ "marked_read": updated })))
}

#[derive(Debug, Deserialize)]
pub struct PushSubscriptionBody {
    /// Push service endpoint URL.
    pub endpoint: String,
    /// Client public key.
    pub p256dh_key: String,
    /// Client auth secret.
    pub auth_key: String,
}

/// `POST /api/v1/notifications/push-subscription` — register (or
/// re-activate) a browser push endpoint.
pub async fn register_push(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(body): Json<PushSubscriptionBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.endpoint.is_empty() || url::Url::parse(&body.endpoint).is_err() {
        return Err(ApiError::validation("endpoint must be a valid URL"));
    }
    let mut tx = state.pool.begin().await?;
    let subscription = push::upsert(
        &mut *tx,
        user.id,
        &body.endpoint,
        &body.p256dh_key,
        &body.auth_key,
    )
    .await?;
    tx.commit().await?;
    Ok(data(subscription))
}

#[derive(Debug, Deserialize)]
pub struct DeletePushBody {
    /// Endpoint to unregister.
    pub endpoint: String,
}

/// `DELETE /api/v1/notifications/push-subscription` — unregister.
pub async fn delete_push(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(body): Json<DeletePushBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut tx = state.pool.begin().await?;
    let removed = push::delete_for_user(&mut *tx, user.id, &body.endpoint).await?;
    tx.commit().await?;
    Ok(data(serde_json::json!({ "removed": removed })))
}
