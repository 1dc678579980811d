//! Recurring task template endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::{JobType, TaskPriority};
use crate::http::error::ApiError;
use crate::http::middleware::CurrentUser;
use crate::http::pagination::{data, paginated, PageQuery};
use crate::http::state::AppState;
use crate::jobs;
use crate::rrule::RecurrenceRule;
use crate::store::{clamp_page, templates};

/// `GET /api/v1/templates` — list the user's templates.
pub async fn list(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(query): Query<PageQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (offset, limit) = clamp_page(query.offset, query.limit);
    let mut conn = state.pool.acquire().await.map_err(sqlx::Error::from)?;
    let page = templates::list(&mut conn, user.id, offset, limit).await?;
    Ok(paginated(page))
}

#[derive(Debug, Deserialize)]
pub struct CreateTemplateBody {
    /// Title applied to generated instances.
    pub title: String,
    /// Description applied to generated instances.
    pub description: Option<String>,
    /// Priority applied to generated instances.
    #[serde(default)]
    pub priority: TaskPriority,
    /// RFC 5545 recurrence rule, e.g. `FREQ=WEEKLY;BYDAY=MO`.
    pub recurrence: String,
}

/// `POST /api/v1/templates` — create a recurring template and start its
/// generation chain: the first instance job is scheduled at the cached
/// `next_due`.
pub async fn create(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(body): Json<CreateTemplateBody>,
) -> Result<Response, ApiError> {
    let mut tx = state.pool.begin().await?;
    let template = templates::create(
        &mut *tx,
        user.id,
        templates::NewTemplate {
            title: body.title,
            description: body.description,
            priority: body.priority,
            recurrence: body.recurrence,
        },
    )
    .await?;
    if let Some(next_due) = template.next_due {
        jobs::enqueue(
            &mut *tx,
            JobType::RecurringTaskGenerate,
            serde_json::json!({ "template_id": template.id }),
            Some(next_due),
        )
        .await?;
    }
    tx.commit().await?;
    Ok((StatusCode::CREATED, data(template)).into_response())
}

/// `GET /api/v1/templates/{id}` — one template.
pub async fn get(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(template_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = state.pool.acquire().await.map_err(sqlx::Error::from)?;
    let template = templates::get(&mut conn, user.id, template_id).await?;
    Ok(data(template))
}

#[derive(Debug, Deserialize)]
pub struct UpdateTemplateBody {
    /// Activate or deactivate instance generation.
    pub active: bool,
}

/// `PATCH /api/v1/templates/{id}` — toggle activation. Re-activating
/// recomputes `next_due` from now and re-arms the generation chain.
pub async fn update(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(template_id): Path<Uuid>,
    Json(body): Json<UpdateTemplateBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut tx = state.pool.begin().await?;
    let mut template =
        templates::set_active(&mut *tx, user.id, template_id, body.active).await?;

    if body.active {
        let rule = RecurrenceRule::parse(&template.recurrence)
            .map_err(|e| ApiError::validation(format!("stored recurrence unparseable: {e}")))?;
        let next_due = rule.next_occurrence(chrono::Utc::now());
        templates::set_next_due(&mut *tx, template.id, next_due).await?;
        template.next_due = next_due;
        if let Some(next_due) = next_due {
            jobs::enqueue(
                &mut *tx,
                JobType::RecurringTaskGenerate,
                serde_json::json!({ "template_id": template.id }),
                Some(next_due),
            )
            .await?;
        }
    }
    tx.commit().await?;
    Ok(data(template))
}

/// `DELETE /api/v1/templates/{id}` — delete; existing instances keep
/// running with their template reference cleared.
pub async fn delete(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(template_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut tx = state.pool.begin().await?;
    templates::delete(&mut *tx, user.id, template_id).await?;
    tx.commit().await?;
    Ok(data(serde_json::json!({ "deleted": true })))
}
