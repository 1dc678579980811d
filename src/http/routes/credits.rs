//! Credit balance, history, and purchase endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::credits;
use crate::domain::UserTier;
use crate::http::error::{ApiError, ErrorCode};
use crate::http::middleware::CurrentUser;
use crate::http::pagination::data;
use crate::http::state::AppState;

use super::effective_tier;

/// Ledger rows returned by the history endpoint.
const HISTORY_LIMIT: i64 = 50;

/// `GET /api/v1/credits` — per-class balance plus recent ledger rows.
pub async fn get(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = state.pool.acquire().await.map_err(sqlx::Error::from)?;
    let now = chrono::Utc::now();
    let balance = credits::balance(&mut conn, user.id, now).await?;
    let history = credits::history(&mut conn, user.id, HISTORY_LIMIT).await?;
    let purchased_this_month = credits::purchased_this_month(&mut conn, user.id, now).await?;
    Ok(data(json!({
        "balance": balance,
        "total": balance.total(),
        "history": history,
        "purchased_this_month": purchased_this_month,
        "monthly_purchase_limit": state.config.credits.monthly_purchase_limit,
    })))
}

#[derive(Debug, Deserialize)]
pub struct PurchaseBody {
    /// Units to purchase.
    pub amount: i64,
}

/// `POST /api/v1/credits/purchase` — grant purchased credits (pro only,
/// 500/month cap). Payment capture happens upstream at the vendor.
pub async fn purchase(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(body): Json<PurchaseBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut tx = state.pool.begin().await?;
    let tier = effective_tier(&mut *tx, &user).await?;
    if tier != UserTier::Pro {
        return Err(ApiError::new(
            ErrorCode::TierRequired,
            StatusCode::FORBIDDEN,
            "credit purchase requires the pro tier",
        ));
    }

    let reference = format!("purchase_{}", &Uuid::new_v4().simple().to_string()[..8]);
    let entry = credits::grant_purchased(
        &mut *tx,
        user.id,
        body.amount,
        &reference,
        state.config.credits.monthly_purchase_limit,
        chrono::Utc::now(),
    )
    .await?;
    let balance = credits::balance(&mut *tx, user.id, chrono::Utc::now()).await?;
    tx.commit().await?;

    Ok(data(json!({
        "credits_added": entry.amount,
        "total": balance.total(),
        "reference": reference,
    })))
}
