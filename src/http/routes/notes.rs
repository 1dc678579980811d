//! Note endpoints, including conversion and transcription.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::achievements;
use crate::domain::UserTier;
use crate::events::{DomainEvent, EventMeta};
use crate::http::error::{ApiError, ErrorCode};
use crate::http::middleware::{CurrentUser, RequestId};
use crate::http::pagination::{data, paginated, PageQuery};
use crate::http::state::AppState;
use crate::store::{clamp_page, notes};

use super::effective_tier;

/// `GET /api/v1/notes` — unarchived notes, newest first.
pub async fn list(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(query): Query<PageQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (offset, limit) = clamp_page(query.offset, query.limit);
    let mut conn = state.pool.acquire().await.map_err(sqlx::Error::from)?;
    let page = notes::list(&mut conn, user.id, offset, limit).await?;
    Ok(paginated(page))
}

#[derive(Debug, Deserialize)]
pub struct CreateNoteBody {
    /// Text content, 1–2000 characters.
    pub content: String,
    /// Voice attachment URL (pro only).
    pub voice_url: Option<String>,
    /// Voice duration in seconds (1–300).
    pub voice_duration_seconds: Option<i32>,
}

/// `POST /api/v1/notes` — create a note. Voice attachments require pro.
pub async fn create(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Json(body): Json<CreateNoteBody>,
) -> Result<Response, ApiError> {
    let mut tx = state.pool.begin().await?;
    let tier = effective_tier(&mut *tx, &user).await?;

    if body.voice_url.is_some() && tier != UserTier::Pro {
        return Err(ApiError::new(
            ErrorCode::TierRequired,
            StatusCode::FORBIDDEN,
            "voice notes require the pro tier",
        ));
    }

    let limits =
        achievements::effective_limits(&mut *tx, user.id, tier, &state.config.limits).await?;
    let note = notes::create(
        &mut *tx,
        user.id,
        &body.content,
        body.voice_url.as_deref(),
        body.voice_duration_seconds,
        limits.max_notes,
    )
    .await?;

    state
        .bus
        .dispatch(
            DomainEvent::NoteCreated {
                meta: EventMeta::user(user.id, Some(request_id)),
                note_id: note.id,
            },
            &mut *tx,
            &state.config,
        )
        .await;
    tx.commit().await?;

    Ok((StatusCode::CREATED, data(note)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct UpdateNoteBody {
    /// New text content.
    pub content: String,
}

/// `PATCH /api/v1/notes/{id}` — edit the text content.
pub async fn update(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(note_id): Path<Uuid>,
    Json(body): Json<UpdateNoteBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut tx = state.pool.begin().await?;
    let note = notes::update_content(&mut *tx, user.id, note_id, &body.content).await?;
    tx.commit().await?;
    Ok(data(note))
}

/// `DELETE /api/v1/notes/{id}` — delete a note.
pub async fn delete(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(note_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut tx = state.pool.begin().await?;
    notes::delete(&mut *tx, user.id, note_id).await?;
    state
        .bus
        .dispatch(
            DomainEvent::NoteDeleted {
                meta: EventMeta::user(user.id, Some(request_id)),
                note_id,
            },
            &mut *tx,
            &state.config,
        )
        .await;
    tx.commit().await?;
    Ok(data(serde_json::json!({ "deleted": true })))
}

/// `POST /api/v1/notes/{id}/convert` — AI-assisted conversion to a task.
/// Costs 1 credit; the note is archived, not deleted.
pub async fn convert(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(note_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = state.pool.acquire().await.map_err(sqlx::Error::from)?;
    let tier = effective_tier(&mut conn, &user).await?;
    drop(conn);

    let outcome = state
        .ai
        .convert_note(&user, tier, note_id, Some(request_id))
        .await?;
    Ok(data(outcome))
}

/// `POST /api/v1/notes/{id}/transcribe` — transcribe a voice note
/// (pro only, 5 credits per started minute, 300-second cutoff).
pub async fn transcribe(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(note_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = state.pool.acquire().await.map_err(sqlx::Error::from)?;
    let tier = effective_tier(&mut conn, &user).await?;
    drop(conn);

    let outcome = state.ai.transcribe_note(&user, tier, note_id).await?;
    Ok(data(outcome))
}
