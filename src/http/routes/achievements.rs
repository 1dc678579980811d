//! Achievement, stats, and effective-limits endpoints.

use axum::extract::State;
use axum::{Extension, Json};
use serde_json::json;

use crate::achievements;
use crate::http::error::ApiError;
use crate::http::middleware::CurrentUser;
use crate::http::pagination::data;
use crate::http::state::AppState;

use super::effective_tier;

/// `GET /api/v1/achievements` — all definitions with the user's unlock
/// state.
pub async fn list(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = state.pool.acquire().await.map_err(sqlx::Error::from)?;
    let definitions = achievements::definitions(&mut conn).await?;
    let achievement_state = achievements::state(&mut conn, user.id).await?;

    let rows: Vec<serde_json::Value> = definitions
        .into_iter()
        .map(|definition| {
            let unlocked = achievement_state
                .as_ref()
                .map(|s| s.has_achievement(&definition.id))
                .unwrap_or(false);
            let progress = achievement_state
                .as_ref()
                .map(|s| s.stat_for(definition.category))
                .unwrap_or(0);
            json!({
                "definition": definition,
                "unlocked": unlocked,
                "progress": progress,
            })
        })
        .collect();
    Ok(data(rows))
}

/// `GET /api/v1/achievements/stats` — the user's streak and counters.
pub async fn stats(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = state.pool.acquire().await.map_err(sqlx::Error::from)?;
    let achievement_state = achievements::state(&mut conn, user.id).await?;
    Ok(data(achievement_state))
}

/// `GET /api/v1/achievements/limits` — effective caps: tier base plus
/// unlocked perks.
pub async fn limits(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = state.pool.acquire().await.map_err(sqlx::Error::from)?;
    let tier = effective_tier(&mut conn, &user).await?;
    let limits =
        achievements::effective_limits(&mut conn, user.id, tier, &state.config.limits).await?;
    Ok(data(json!({
        "tier": tier,
        "limits": limits,
    })))
}
