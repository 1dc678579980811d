//! Activity feed endpoint.

use axum::extract::{Query, State};
use axum::{Extension, Json};

use crate::http::error::ApiError;
use crate::http::middleware::CurrentUser;
use crate::http::pagination::{paginated, PageQuery};
use crate::http::state::AppState;
use crate::store::{activity, clamp_page};

/// `GET /api/v1/activity` — the user's audit trail, newest first.
pub async fn list(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(query): Query<PageQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (offset, limit) = clamp_page(query.offset, query.limit);
    let mut conn = state.pool.acquire().await.map_err(sqlx::Error::from)?;
    let page = activity::list(&mut conn, user.id, offset, limit).await?;
    Ok(paginated(page))
}
