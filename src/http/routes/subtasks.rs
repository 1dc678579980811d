//! Subtask endpoints, reached through the parent task.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::achievements;
use crate::domain::SubtaskSource;
use crate::events::{DomainEvent, EventMeta};
use crate::http::error::ApiError;
use crate::http::middleware::{CurrentUser, RequestId};
use crate::http::pagination::data;
use crate::http::state::AppState;
use crate::store::subtasks;

use super::effective_tier;

/// `GET /api/v1/tasks/{id}/subtasks` — ordered subtasks of a task.
pub async fn list(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = state.pool.acquire().await.map_err(sqlx::Error::from)?;
    let rows = subtasks::list(&mut conn, user.id, task_id).await?;
    Ok(data(rows))
}

#[derive(Debug, Deserialize)]
pub struct CreateSubtaskBody {
    /// Title, 1–200 characters.
    pub title: String,
}

/// `POST /api/v1/tasks/{id}/subtasks` — append a subtask.
pub async fn create(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(task_id): Path<Uuid>,
    Json(body): Json<CreateSubtaskBody>,
) -> Result<Response, ApiError> {
    let mut tx = state.pool.begin().await?;
    let tier = effective_tier(&mut *tx, &user).await?;
    let limits =
        achievements::effective_limits(&mut *tx, user.id, tier, &state.config.limits).await?;

    let subtask = subtasks::create(
        &mut *tx,
        user.id,
        task_id,
        &body.title,
        SubtaskSource::User,
        limits.max_subtasks,
    )
    .await?;

    state
        .bus
        .dispatch(
            DomainEvent::SubtaskCreated {
                meta: EventMeta::user(user.id, Some(request_id)),
                task_id,
                subtask_id: subtask.id,
            },
            &mut *tx,
            &state.config,
        )
        .await;
    tx.commit().await?;

    Ok((StatusCode::CREATED, data(subtask)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct UpdateSubtaskBody {
    /// New title.
    pub title: Option<String>,
    /// Set the completion flag.
    pub completed: Option<bool>,
}

/// `PATCH /api/v1/subtasks/{id}` — rename or toggle completion.
///
/// Completing the last open subtask auto-completes the parent task (via
/// the bus handler) in the same transaction.
pub async fn update(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(subtask_id): Path<Uuid>,
    Json(body): Json<UpdateSubtaskBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut tx = state.pool.begin().await?;

    let mut subtask = subtasks::get(&mut *tx, user.id, subtask_id).await?;

    if let Some(title) = &body.title {
        subtask = subtasks::rename(&mut *tx, user.id, subtask_id, title).await?;
    }

    if let Some(completed) = body.completed {
        let (updated, changed) =
            subtasks::set_completed(&mut *tx, user.id, subtask_id, completed).await?;
        subtask = updated;
        if changed && completed {
            state
                .bus
                .dispatch(
                    DomainEvent::SubtaskCompleted {
                        meta: EventMeta::user(user.id, Some(request_id)),
                        task_id: subtask.task_id,
                        subtask_id,
                    },
                    &mut *tx,
                    &state.config,
                )
                .await;
        }
    }

    tx.commit().await?;
    Ok(data(subtask))
}

/// `DELETE /api/v1/subtasks/{id}` — delete and compact sibling order.
pub async fn delete(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(subtask_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut tx = state.pool.begin().await?;
    let deleted = subtasks::delete(&mut *tx, user.id, subtask_id).await?;

    state
        .bus
        .dispatch(
            DomainEvent::SubtaskDeleted {
                meta: EventMeta::user(user.id, Some(request_id)),
                task_id: deleted.task_id,
                subtask_id,
            },
            &mut *tx,
            &state.config,
        )
        .await;
    tx.commit().await?;
    Ok(data(serde_json::json!({ "deleted": true })))
}

#[derive(Debug, Deserialize)]
pub struct ReorderBody {
    /// Every current subtask id in the desired order.
    pub subtask_ids: Vec<Uuid>,
}

/// `POST /api/v1/tasks/{id}/subtasks/reorder` — atomically reassign
/// order indices from a full permutation of the sibling set.
pub async fn reorder(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(task_id): Path<Uuid>,
    Json(body): Json<ReorderBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut tx = state.pool.begin().await?;
    let ordered = subtasks::reorder(&mut *tx, user.id, task_id, &body.subtask_ids).await?;
    tx.commit().await?;
    Ok(data(ordered))
}
