//! AI endpoints: chat, subtask generation, action confirmation, credits.

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use uuid::Uuid;

use crate::ai::ConfirmActionRequest;
use crate::credits;
use crate::http::error::ApiError;
use crate::http::middleware::{CurrentUser, RequestId};
use crate::http::pagination::data;
use crate::http::state::AppState;

use super::effective_tier;

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    /// Message to the agent, 1–2000 characters.
    pub message: String,
    /// Include the user's open tasks as context.
    #[serde(default)]
    pub include_tasks: bool,
}

/// `POST /api/v1/ai/chat` — chat over SSE. Costs 1 credit.
///
/// The reply streams as one `message` event followed by one
/// `suggestions` event and a terminal `done` event. Suggestions are
/// never executed here; the client confirms them via
/// `/ai/confirm-action`.
pub async fn chat(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Json(body): Json<ChatBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>, ApiError> {
    let outcome = state
        .ai
        .chat(&user, &body.message, body.include_tasks, Some(request_id))
        .await?;

    let (tx, rx) = tokio::sync::mpsc::channel(4);
    tokio::spawn(async move {
        let _ = tx
            .send(Ok(Event::default()
                .event("message")
                .data(outcome.message.clone())))
            .await;
        if let Ok(payload) = serde_json::to_string(&outcome.suggestions) {
            let _ = tx
                .send(Ok(Event::default().event("suggestions").data(payload)))
                .await;
        }
        let _ = tx
            .send(Ok(Event::default().event("done").data(
                json!({ "credits_remaining": outcome.credits_remaining }).to_string(),
            )))
            .await;
    });

    Ok(Sse::new(ReceiverStream::new(rx)))
}

/// `POST /api/v1/ai/confirm-action` — execute a previously suggested
/// action after validating ownership and achievability.
pub async fn confirm_action(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Json(body): Json<ConfirmActionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = state.pool.acquire().await.map_err(sqlx::Error::from)?;
    let tier = effective_tier(&mut conn, &user).await?;
    drop(conn);

    let outcome = state
        .ai
        .confirm_action(&user, tier, body, Some(request_id))
        .await?;
    Ok(data(outcome))
}

/// `POST /api/v1/tasks/{id}/subtasks/generate` — AI subtask suggestions.
/// Costs 1 credit; capped by remaining subtask room.
pub async fn generate_subtasks(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = state.pool.acquire().await.map_err(sqlx::Error::from)?;
    let tier = effective_tier(&mut conn, &user).await?;
    drop(conn);

    let outcome = state
        .ai
        .generate_subtasks(&user, tier, task_id, Some(request_id))
        .await?;
    Ok(data(outcome))
}

/// `GET /api/v1/ai/credits` — per-class balance and recent ledger rows.
pub async fn ai_credits(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = state.pool.acquire().await.map_err(sqlx::Error::from)?;
    let balance = credits::balance(&mut conn, user.id, chrono::Utc::now()).await?;
    Ok(data(json!({
        "balance": balance,
        "total": balance.total(),
    })))
}
