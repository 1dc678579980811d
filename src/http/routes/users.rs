//! Current-user profile endpoints.

use axum::extract::State;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use crate::http::error::ApiError;
use crate::http::middleware::CurrentUser;
use crate::http::pagination::data;
use crate::http::state::AppState;
use crate::store::users;

use super::effective_tier;

/// `GET /api/v1/users/me` — profile plus the read-time effective tier.
pub async fn me(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = state.pool.acquire().await.map_err(sqlx::Error::from)?;
    let tier = effective_tier(&mut conn, &user).await?;
    Ok(data(json!({
        "user": user,
        "effective_tier": tier,
    })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateMeBody {
    /// New display name.
    pub display_name: Option<String>,
    /// New avatar URL (null clears it).
    #[serde(default, deserialize_with = "super::serde_util::double_option")]
    pub avatar_url: Option<Option<String>>,
    /// New IANA timezone.
    pub timezone: Option<String>,
}

/// `PATCH /api/v1/users/me` — update profile fields.
pub async fn update_me(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(body): Json<UpdateMeBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut tx = state.pool.begin().await?;
    let updated = users::update_profile(
        &mut *tx,
        user.id,
        users::UserPatch {
            display_name: body.display_name,
            avatar_url: body.avatar_url,
            timezone: body.timezone,
        },
    )
    .await?;
    tx.commit().await?;
    Ok(data(updated))
}
