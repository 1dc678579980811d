//! Payment vendor webhook endpoint.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use crate::billing::{self, signature, WebhookOutcome};
use crate::http::error::ApiError;
use crate::http::state::AppState;

/// `POST /api/v1/webhooks/checkout` — signed payment events.
///
/// The `Cko-Signature` header carries hex(HMAC-SHA256(secret, body));
/// verification is constant-time and happens on the raw bytes before
/// any parsing. Duplicate `event_id`s are acknowledged with 200 and
/// change nothing.
pub async fn checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let presented = headers
        .get("cko-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !signature::verify(&state.config.checkout.webhook_secret, &body, presented) {
        warn!("webhook signature verification failed");
        state
            .metrics
            .webhook_events
            .with_label_values(&["bad_signature"])
            .inc();
        return Err(ApiError::unauthorized("invalid webhook signature"));
    }

    let event: billing::WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::validation(format!("malformed webhook payload: {e}")))?;

    let mut tx = state.pool.begin().await?;
    let outcome =
        billing::process_webhook(&mut *tx, &state.config, &state.bus, &event).await?;
    tx.commit().await?;

    let label = match outcome {
        WebhookOutcome::Processed => "processed",
        WebhookOutcome::Duplicate => "duplicate",
        WebhookOutcome::Ignored => "ignored",
    };
    state
        .metrics
        .webhook_events
        .with_label_values(&[label])
        .inc();

    Ok((StatusCode::OK, Json(json!({ "received": true, "outcome": label }))).into_response())
}
