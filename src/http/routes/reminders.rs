//! Reminder endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::{ReminderMethod, ReminderType};
use crate::http::error::ApiError;
use crate::http::middleware::CurrentUser;
use crate::http::pagination::data;
use crate::http::state::AppState;
use crate::store::reminders;

/// `GET /api/v1/tasks/{id}/reminders` — reminders of a task.
pub async fn list(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = state.pool.acquire().await.map_err(sqlx::Error::from)?;
    let rows = reminders::list_for_task(&mut conn, user.id, task_id).await?;
    Ok(data(rows))
}

#[derive(Debug, Deserialize)]
pub struct CreateReminderBody {
    /// Scheduling mode.
    pub reminder_type: ReminderType,
    /// Offset in minutes for before/after reminders.
    pub offset_minutes: Option<i32>,
    /// Fire time for absolute reminders.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Delivery channel.
    pub method: ReminderMethod,
}

/// `POST /api/v1/tasks/{id}/reminders` — attach a reminder (max 5 per
/// task; relative types require the task to have a due date).
pub async fn create(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(task_id): Path<Uuid>,
    Json(body): Json<CreateReminderBody>,
) -> Result<Response, ApiError> {
    let mut tx = state.pool.begin().await?;
    let reminder = reminders::create(
        &mut *tx,
        user.id,
        task_id,
        reminders::NewReminder {
            reminder_type: body.reminder_type,
            offset_minutes: body.offset_minutes,
            scheduled_at: body.scheduled_at,
            method: body.method,
        },
        state.config.limits.max_reminders_per_task,
    )
    .await?;
    tx.commit().await?;
    Ok((StatusCode::CREATED, data(reminder)).into_response())
}

/// `DELETE /api/v1/reminders/{id}` — remove a reminder.
pub async fn delete(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(reminder_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut tx = state.pool.begin().await?;
    reminders::delete(&mut *tx, user.id, reminder_id).await?;
    tx.commit().await?;
    Ok(data(serde_json::json!({ "deleted": true })))
}
