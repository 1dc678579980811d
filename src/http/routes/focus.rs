//! Focus session endpoints.

use axum::extract::State;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::events::{DomainEvent, EventMeta};
use crate::http::error::ApiError;
use crate::http::middleware::{CurrentUser, RequestId};
use crate::http::pagination::data;
use crate::http::state::AppState;
use crate::store::{focus, tasks};

#[derive(Debug, Deserialize)]
pub struct FocusBody {
    /// The task being focused on.
    pub task_id: Uuid,
}

/// `POST /api/v1/focus/start` — open a focus session on a task.
pub async fn start(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(body): Json<FocusBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut tx = state.pool.begin().await?;
    let session = focus::start(&mut *tx, user.id, body.task_id).await?;
    tx.commit().await?;
    Ok(data(session))
}

/// `POST /api/v1/focus/end` — close the open session, add its seconds to
/// the task, and emit a focus-completion event once cumulative focus
/// reaches half of the task's estimate.
pub async fn end(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Json(body): Json<FocusBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut tx = state.pool.begin().await?;
    let session = focus::end(&mut *tx, user.id, body.task_id).await?;
    let seconds = session.duration_seconds.unwrap_or(0);
    let task = tasks::add_focus_seconds(&mut *tx, user.id, body.task_id, seconds).await?;

    // Counted once the total crosses half the estimate within this
    // session (it was below before, at-or-above after).
    let mut focus_completed = false;
    if let Some(estimate_minutes) = task.estimated_minutes {
        let half_estimate = i64::from(estimate_minutes) * 60 / 2;
        let before = task.focus_seconds - seconds;
        if before < half_estimate && task.focus_seconds >= half_estimate {
            focus_completed = true;
            state
                .bus
                .dispatch(
                    DomainEvent::FocusCompleted {
                        meta: EventMeta::user(user.id, Some(request_id)),
                        task_id: body.task_id,
                    },
                    &mut *tx,
                    &state.config,
                )
                .await;
        }
    }
    tx.commit().await?;

    Ok(data(json!({
        "session": session,
        "task": task,
        "focus_completed": focus_completed,
    })))
}
