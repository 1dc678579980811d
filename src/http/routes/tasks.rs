//! Task CRUD, completion, and deletion endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::achievements;
use crate::domain::{CompletedBy, TaskPriority};
use crate::events::{DomainEvent, EventMeta};
use crate::http::error::ApiError;
use crate::http::middleware::{CurrentUser, RequestId};
use crate::http::pagination::{data, paginated};
use crate::http::state::AppState;
use crate::recovery;
use crate::store::{clamp_page, reminders, subtasks, tasks, StoreError};

use super::effective_tier;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Include completed tasks (default false).
    #[serde(default)]
    pub include_completed: bool,
    /// Rows to skip.
    pub offset: Option<i64>,
    /// Page size (clamped server-side).
    pub limit: Option<i64>,
}

/// `GET /api/v1/tasks` — list visible tasks, newest first.
pub async fn list(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (offset, limit) = clamp_page(query.offset, query.limit);
    let mut conn = state.pool.acquire().await.map_err(sqlx::Error::from)?;
    let page = tasks::list(&mut conn, user.id, query.include_completed, offset, limit).await?;
    Ok(paginated(page))
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskBody {
    /// Title, 1–200 characters.
    pub title: String,
    /// Optional description.
    pub description: Option<String>,
    /// Priority (defaults to medium).
    #[serde(default)]
    pub priority: TaskPriority,
    /// Optional due date, at most one year out.
    pub due_date: Option<DateTime<Utc>>,
    /// Estimated duration in minutes (1–720).
    pub estimated_minutes: Option<i32>,
}

/// `POST /api/v1/tasks` — create a task.
pub async fn create(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Json(body): Json<CreateTaskBody>,
) -> Result<Response, ApiError> {
    let mut tx = state.pool.begin().await?;
    let tier = effective_tier(&mut *tx, &user).await?;
    let limits =
        achievements::effective_limits(&mut *tx, user.id, tier, &state.config.limits).await?;

    let task = tasks::create(
        &mut *tx,
        user.id,
        tasks::NewTask {
            title: body.title,
            description: body.description,
            priority: body.priority,
            due_date: body.due_date,
            estimated_minutes: body.estimated_minutes,
            template_id: None,
        },
        limits.max_tasks,
        limits.max_description,
    )
    .await?;

    state
        .bus
        .dispatch(
            DomainEvent::TaskCreated {
                meta: EventMeta::user(user.id, Some(request_id)),
                task_id: task.id,
                recovered: false,
            },
            &mut *tx,
            &state.config,
        )
        .await;
    tx.commit().await?;

    Ok((StatusCode::CREATED, data(task)).into_response())
}

/// `GET /api/v1/tasks/{id}` — one task with its subtasks.
pub async fn get(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = state.pool.acquire().await.map_err(sqlx::Error::from)?;
    let task = tasks::get(&mut conn, user.id, task_id).await?;
    let task_subtasks = subtasks::list_unchecked(&mut conn, task_id).await?;
    Ok(data(serde_json::json!({
        "task": task,
        "subtasks": task_subtasks,
    })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateTaskBody {
    /// The version the client last read; mismatch is a conflict.
    pub version: i32,
    /// New title.
    pub title: Option<String>,
    /// New description (null clears).
    #[serde(default, deserialize_with = "super::serde_util::double_option")]
    pub description: Option<Option<String>>,
    /// New priority.
    pub priority: Option<TaskPriority>,
    /// New due date (null clears).
    #[serde(default, deserialize_with = "super::serde_util::double_option")]
    pub due_date: Option<Option<DateTime<Utc>>>,
    /// New estimate (null clears).
    #[serde(default, deserialize_with = "super::serde_util::double_option")]
    pub estimated_minutes: Option<Option<i32>>,
    /// Archive or unarchive.
    pub archived: Option<bool>,
}

/// `PATCH /api/v1/tasks/{id}` — optimistic-locked update. A due-date
/// change recomputes the task's relative reminders.
pub async fn update(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(task_id): Path<Uuid>,
    Json(body): Json<UpdateTaskBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut tx = state.pool.begin().await?;
    let tier = effective_tier(&mut *tx, &user).await?;
    let limits =
        achievements::effective_limits(&mut *tx, user.id, tier, &state.config.limits).await?;

    let before = tasks::get(&mut *tx, user.id, task_id).await?;
    let due_date_patch = body.due_date;

    let result = tasks::update(
        &mut *tx,
        user.id,
        task_id,
        body.version,
        tasks::TaskPatch {
            title: body.title,
            description: body.description,
            priority: body.priority,
            due_date: body.due_date,
            estimated_minutes: body.estimated_minutes,
            archived: body.archived,
        },
        limits.max_description,
    )
    .await;

    let task = match result {
        Ok(task) => task,
        Err(e @ StoreError::VersionConflict { .. }) => {
            state.metrics.version_conflicts.inc();
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    // A changed due date resets the relative reminders.
    if let Some(new_due) = due_date_patch {
        if new_due != before.due_date {
            if let Some(due) = task.due_date {
                reminders::recalculate_for_task(&mut *tx, task_id, due, Utc::now()).await?;
            }
        }
    }

    state
        .bus
        .dispatch(
            DomainEvent::TaskUpdated {
                meta: EventMeta::user(user.id, Some(request_id)),
                task_id,
            },
            &mut *tx,
            &state.config,
        )
        .await;
    tx.commit().await?;

    Ok(data(task))
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    /// Soft-delete (hide) instead of hard-deleting with a tombstone.
    #[serde(default)]
    pub soft: bool,
}

/// `DELETE /api/v1/tasks/{id}` — hard delete with a tombstone (default)
/// or soft delete with `?soft=true`.
pub async fn delete(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(task_id): Path<Uuid>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut tx = state.pool.begin().await?;

    if query.soft {
        tasks::soft_delete(&mut *tx, user.id, task_id).await?;
        tx.commit().await?;
        return Ok(data(serde_json::json!({ "deleted": true, "soft": true })));
    }

    let task = tasks::get_for_update(&mut *tx, user.id, task_id).await?;
    let task_subtasks = subtasks::list_unchecked(&mut *tx, task_id).await?;
    let task_reminders = reminders::list_for_task(&mut *tx, user.id, task_id).await?;

    let tombstone =
        recovery::tombstone_task(&mut *tx, user.id, &task, task_subtasks, task_reminders)
            .await?;
    tasks::hard_delete(&mut *tx, user.id, task_id).await?;

    state
        .bus
        .dispatch(
            DomainEvent::TaskDeleted {
                meta: EventMeta::user(user.id, Some(request_id)),
                task_id,
            },
            &mut *tx,
            &state.config,
        )
        .await;
    tx.commit().await?;

    Ok(data(serde_json::json!({
        "deleted": true,
        "tombstone_id": tombstone.id,
    })))
}

/// `POST /api/v1/tasks/{id}/complete` — manual completion.
pub async fn complete(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut tx = state.pool.begin().await?;
    let before = tasks::get(&mut *tx, user.id, task_id).await?;
    let task = tasks::mark_completed(&mut *tx, user.id, task_id, CompletedBy::Manual).await?;

    if !before.completed {
        state
            .bus
            .dispatch(
                DomainEvent::TaskCompleted {
                    meta: EventMeta::user(user.id, Some(request_id)),
                    task_id,
                    template_id: task.template_id,
                    completed_by: CompletedBy::Manual,
                    recovered: false,
                },
                &mut *tx,
                &state.config,
            )
            .await;
    }
    tx.commit().await?;
    Ok(data(task))
}

/// `POST /api/v1/tasks/{id}/uncomplete` — reopen a completed task.
pub async fn uncomplete(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut tx = state.pool.begin().await?;
    let task = tasks::mark_uncompleted(&mut *tx, user.id, task_id).await?;
    state
        .bus
        .dispatch(
            DomainEvent::TaskUpdated {
                meta: EventMeta::user(user.id, Some(request_id)),
                task_id,
            },
            &mut *tx,
            &state.config,
        )
        .await;
    tx.commit().await?;
    Ok(data(task))
}

/// `POST /api/v1/tasks/{id}/force-complete` — complete the task and all
/// of its incomplete subtasks in one transaction.
pub async fn force_complete(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut tx = state.pool.begin().await?;
    let before = tasks::get_for_update(&mut *tx, user.id, task_id).await?;
    if before.archived {
        return Err(StoreError::TaskArchived.into());
    }

    let flipped = subtasks::complete_all(&mut *tx, task_id).await?;
    let task = tasks::mark_completed(&mut *tx, user.id, task_id, CompletedBy::Force).await?;

    if !before.completed {
        state
            .bus
            .dispatch(
                DomainEvent::TaskCompleted {
                    meta: EventMeta::user(user.id, Some(request_id)),
                    task_id,
                    template_id: task.template_id,
                    completed_by: CompletedBy::Force,
                    recovered: false,
                },
                &mut *tx,
                &state.config,
            )
            .await;
    }
    tx.commit().await?;

    Ok(data(serde_json::json!({
        "task": task,
        "subtasks_completed": flipped.len(),
    })))
}
