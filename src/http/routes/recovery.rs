//! Tombstone listing and task recovery endpoints.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde_json::json;
use uuid::Uuid;

use crate::http::error::ApiError;
use crate::http::middleware::{CurrentUser, RequestId};
use crate::http::pagination::data;
use crate::http::state::AppState;
use crate::recovery;
use crate::store::tombstones;

/// `GET /api/v1/tombstones` — the user's tombstones (at most 3).
pub async fn list(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = state.pool.acquire().await.map_err(sqlx::Error::from)?;
    let rows = tombstones::list(&mut conn, user.id).await?;

    let summaries: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|t| {
            json!({
                "id": t.id,
                "entity_type": t.entity_type,
                "entity_id": t.entity_id,
                "deleted_at": t.deleted_at,
                "recoverable": tombstones::within_recovery_window(
                    t.deleted_at,
                    chrono::Utc::now(),
                ),
            })
        })
        .collect();
    Ok(data(summaries))
}

/// `POST /api/v1/tasks/recover/{tombstone_id}` — restore a deleted task
/// under its original id. Works within the 14-day window; afterwards the
/// tombstone reads as missing.
pub async fn recover(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(tombstone_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut tx = state.pool.begin().await?;
    let task = recovery::recover_task(
        &mut *tx,
        &state.config,
        &state.bus,
        user.id,
        tombstone_id,
        Some(request_id),
    )
    .await?;
    tx.commit().await?;
    Ok(data(task))
}
