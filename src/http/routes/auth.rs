//! Sign-in, token refresh, logout, and the JWKS endpoint.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::credits;
use crate::http::error::ApiError;
use crate::http::pagination::data;
use crate::http::state::AppState;
use crate::store::users;

#[derive(Debug, Deserialize)]
pub struct GoogleCallbackBody {
    /// The Google id token from the client-side sign-in flow.
    pub id_token: String,
}

/// `POST /api/v1/auth/google/callback` — verify a Google id token,
/// get-or-create the user, grant the one-time kickstart credits, and
/// issue a token pair.
pub async fn google_callback(
    State(state): State<AppState>,
    Json(body): Json<GoogleCallbackBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let profile = state.auth.verify_google_id_token(&body.id_token).await?;

    let mut tx = state.pool.begin().await?;
    let (user, created) = users::get_or_create_by_sub(&mut *tx, &profile).await?;
    if created {
        credits::grant_kickstart(&mut *tx, user.id, state.config.credits.kickstart_amount)
            .await?;
    }
    let pair = state.auth.issue_pair(&mut *tx, user.id, &user.email).await?;
    tx.commit().await?;

    Ok(data(json!({
        "user": user,
        "access_token": pair.access_token,
        "refresh_token": pair.refresh_token,
        "expires_in": pair.expires_in,
        "new_user": created,
    })))
}

#[derive(Debug, Deserialize)]
pub struct RefreshBody {
    /// The opaque refresh token.
    pub refresh_token: String,
}

/// `POST /api/v1/auth/refresh` — rotate the refresh token and issue a
/// fresh pair.
pub async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut tx = state.pool.begin().await?;

    // Two-step: resolve the token row, then look up the email for the
    // new access token within the same transaction.
    let record = crate::store::refresh_tokens::find_by_hash(
        &mut *tx,
        &sha256_hex(&body.refresh_token),
    )
    .await?
    .ok_or_else(|| ApiError::unauthorized("invalid credentials"))?;
    let user = users::get(&mut *tx, record.user_id).await?;

    let (_user_id, pair) = state
        .auth
        .refresh(&mut *tx, &body.refresh_token, |_| user.email.clone())
        .await?;
    tx.commit().await?;

    Ok(data(json!({
        "access_token": pair.access_token,
        "refresh_token": pair.refresh_token,
        "expires_in": pair.expires_in,
    })))
}

/// `POST /api/v1/auth/logout` — revoke the presented refresh token.
pub async fn logout(
    State(state): State<AppState>,
    Json(body): Json<RefreshBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut tx = state.pool.begin().await?;
    state.auth.logout(&mut *tx, &body.refresh_token).await?;
    tx.commit().await?;
    Ok(data(json!({ "logged_out": true })))
}

/// `GET /api/v1/.well-known/jwks.json` — our signing keys.
pub async fn jwks(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.auth.jwks_document().clone())
}

fn sha256_hex(input: &str) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(input.as_bytes()))
}
