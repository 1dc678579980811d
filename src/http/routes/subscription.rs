//! Subscription endpoints (user-facing side of billing).

use axum::extract::State;
use axum::{Extension, Json};
use serde_json::json;

use crate::billing;
use crate::events::{DomainEvent, EventMeta};
use crate::http::error::ApiError;
use crate::http::middleware::{CurrentUser, RequestId};
use crate::http::pagination::data;
use crate::http::state::AppState;

use super::effective_tier;

/// `GET /api/v1/subscription` — the user's subscription and effective
/// tier.
pub async fn get(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = state.pool.acquire().await.map_err(sqlx::Error::from)?;
    let subscription = billing::get_for_user(&mut conn, user.id).await?;
    let tier = effective_tier(&mut conn, &user).await?;
    Ok(data(json!({
        "subscription": subscription,
        "effective_tier": tier,
    })))
}

/// `POST /api/v1/subscription/checkout` — hand the client the vendor
/// checkout context. Payment capture itself arrives via webhook.
pub async fn checkout(
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(data(json!({
        "checkout_reference": user.id,
        "plan": "pro_monthly",
    })))
}

/// `POST /api/v1/subscription/cancel` — user-initiated cancellation;
/// access is retained until the period end.
pub async fn cancel(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Extension(RequestId(request_id)): Extension<RequestId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut tx = state.pool.begin().await?;
    let subscription = billing::cancel_for_user(&mut *tx, user.id).await?;
    state
        .bus
        .dispatch(
            DomainEvent::SubscriptionCancelled {
                meta: EventMeta::user(user.id, Some(request_id)),
                subscription_id: subscription.id,
            },
            &mut *tx,
            &state.config,
        )
        .await;
    tx.commit().await?;
    Ok(data(subscription))
}
