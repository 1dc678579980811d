//! Request pipeline middleware.
//!
//! Ordered chain around every request: request-id, security headers,
//! structured logging, metrics, auth, idempotency, and rate limiting.
//! CORS is applied as a tower-http layer in the router assembly.

use std::net::SocketAddr;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::User;
use crate::ratelimit::{Bucket, Decision};
use crate::store::{idempotency as idempotency_store, users};

use super::error::{ApiError, ErrorCode};
use super::state::AppState;

/// Request body cap for idempotency hashing (also the practical request
/// size limit for POST/PATCH bodies).
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Per-request id stored in request extensions.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

/// The authenticated user stored in request extensions.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

// ── Request id ──────────────────────────────────────────────────

/// Generate or propagate `X-Request-Id` and attach it to the request
/// extensions and the response.
pub async fn request_id(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .unwrap_or_else(Uuid::new_v4);

    request.extensions_mut().insert(RequestId(id));
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static("x-request-id"), value);
    }
    response
}

// ── Security headers ────────────────────────────────────────────

/// Add standard hardening headers and strip the server banner.
pub async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        HeaderName::from_static("cache-control"),
        HeaderValue::from_static("no-store"),
    );
    headers.remove("server");
    response
}

// ── Logging ─────────────────────────────────────────────────────

/// One start line, one end line with status and duration.
pub async fn logging(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|r| r.0)
        .unwrap_or_default();

    debug!(%method, %path, request_id = %request_id, "request start");
    let started = Instant::now();
    let response = next.run(request).await;
    let duration_ms = started.elapsed().as_millis();
    let user_id = response
        .extensions()
        .get::<CurrentUser>()
        .map(|u| u.0.id.to_string());

    info!(
        %method,
        %path,
        status = response.status().as_u16(),
        duration_ms,
        request_id = %request_id,
        user_id = user_id.as_deref().unwrap_or("-"),
        "request end"
    );
    response
}

// ── Metrics ─────────────────────────────────────────────────────

/// Count requests per route/status and observe latency.
pub async fn metrics(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let route = normalize_route(request.uri().path());
    state.metrics.http_in_flight.inc();
    let started = Instant::now();

    let response = next.run(request).await;

    state.metrics.http_in_flight.dec();
    state
        .metrics
        .http_duration
        .with_label_values(&[route.as_str()])
        .observe(started.elapsed().as_secs_f64());
    state
        .metrics
        .http_requests
        .with_label_values(&[route.as_str(), method.as_str(), response.status().as_str()])
        .inc();
    response
}

/// Collapse path parameters so metric cardinality stays bounded.
fn normalize_route(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if Uuid::parse_str(segment).is_ok() {
                ":id"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

// ── Auth ────────────────────────────────────────────────────────

/// Paths served without a bearer token.
fn is_auth_exempt(path: &str) -> bool {
    path.starts_with("/health")
        || path == "/metrics"
        || path.starts_with("/api/v1/auth/")
        || path.starts_with("/api/v1/.well-known/")
        || path.starts_with("/api/v1/webhooks/")
        || path.starts_with("/docs")
}

/// Parse the bearer token, verify it, and attach the user to the request.
///
/// Expired tokens get the distinct TOKEN_EXPIRED code so clients know to
/// refresh rather than re-authenticate.
pub async fn auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    if is_auth_exempt(request.uri().path()) {
        return next.run(request).await;
    }

    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let Some(token) = token else {
        return ApiError::unauthorized("missing bearer token").into_response();
    };

    let claims = match state.auth.verify_access_token(token) {
        Ok(claims) => claims,
        Err(e) => return ApiError::from(e).into_response(),
    };

    let mut conn = match state.pool.acquire().await {
        Ok(conn) => conn,
        Err(e) => return ApiError::from(sqlx::Error::from(e)).into_response(),
    };
    let user = match users::get(&mut conn, claims.sub).await {
        Ok(user) => user,
        Err(_) => return ApiError::unauthorized("unknown user").into_response(),
    };

    let current = CurrentUser(user);
    request.extensions_mut().insert(current.clone());
    let mut response = next.run(request).await;
    // Echo the user into response extensions for the logging layer.
    response.extensions_mut().insert(current);
    response
}

// ── Rate limiting ───────────────────────────────────────────────

fn bucket_for(path: &str) -> Bucket {
    if path.starts_with("/api/v1/ai") {
        Bucket::Ai
    } else if path.starts_with("/api/v1/auth") {
        Bucket::Auth
    } else {
        Bucket::General
    }
}

fn client_ip(request: &Request) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_owned())
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_owned())
}

/// Enforce the per-minute buckets: by user for authenticated traffic,
/// by client IP otherwise (always by IP for the auth bucket).
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path();
    if path.starts_with("/health") || path == "/metrics" {
        return next.run(request).await;
    }

    let bucket = bucket_for(path);
    let key = match bucket {
        Bucket::Auth => client_ip(&request),
        _ => request
            .extensions()
            .get::<CurrentUser>()
            .map(|u| u.0.id.to_string())
            .unwrap_or_else(|| client_ip(&request)),
    };

    match state.limiter.check(bucket, &key) {
        Decision::Allowed => next.run(request).await,
        Decision::Limited { retry_after } => {
            warn!(bucket = ?bucket, "rate limit exceeded");
            ApiError::rate_limited(retry_after).into_response()
        }
    }
}

// ── Idempotency ─────────────────────────────────────────────────

/// Header-keyed deduplication of non-idempotent writes.
///
/// Applies to authenticated POST/PATCH requests carrying
/// `Idempotency-Key`. A replay with the same body returns the stored
/// response with `X-Idempotent-Replayed: true`; the same key with a
/// different body is a conflict. Responses in the 2xx/4xx range are
/// stored for 24 hours.
pub async fn idempotency(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    if method != axum::http::Method::POST && method != axum::http::Method::PATCH {
        return next.run(request).await;
    }
    let Some(key) = request
        .headers()
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
    else {
        return next.run(request).await;
    };
    let Some(user) = request.extensions().get::<CurrentUser>().cloned() else {
        // Idempotency only applies to authenticated requests.
        return next.run(request).await;
    };

    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return ApiError::validation("request body too large").into_response();
        }
    };
    let request_hash = hex::encode(Sha256::digest(&bytes));
    let path = parts.uri.path().to_owned();

    let mut conn = match state.pool.acquire().await {
        Ok(conn) => conn,
        Err(e) => return ApiError::from(sqlx::Error::from(e)).into_response(),
    };
    let existing =
        match idempotency_store::find(&mut conn, &key, user.0.id, chrono::Utc::now()).await {
            Ok(existing) => existing,
            Err(e) => return ApiError::from(e).into_response(),
        };

    if let Some(record) = existing {
        if record.request_hash != request_hash {
            return ApiError::new(
                ErrorCode::IdempotencyConflict,
                StatusCode::CONFLICT,
                "idempotency key already used with a different request body",
            )
            .into_response();
        }
        info!(key = %key, "replaying idempotent response");
        let status = StatusCode::from_u16(u16::try_from(record.response_status).unwrap_or(500))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response =
            (status, axum::Json(record.response_body.0.clone())).into_response();
        response.headers_mut().insert(
            HeaderName::from_static("x-idempotent-replayed"),
            HeaderValue::from_static("true"),
        );
        return response;
    }
    drop(conn);

    let request = Request::from_parts(parts, Body::from(bytes));
    let response = next.run(request).await;

    let status = response.status();
    let storable = matches!(status.as_u16(), 200..=299 | 400..=499);
    if !storable {
        return response;
    }

    // Buffer the response body so it can be stored and replayed.
    let (parts, body) = response.into_parts();
    let response_bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return ApiError::internal().into_response(),
    };
    let response_json: serde_json::Value = serde_json::from_slice(&response_bytes)
        .unwrap_or_else(|_| {
            serde_json::json!({ "raw": String::from_utf8_lossy(&response_bytes) })
        });

    let mut conn = match state.pool.acquire().await {
        Ok(conn) => conn,
        Err(e) => return ApiError::from(sqlx::Error::from(e)).into_response(),
    };
    if let Err(e) = idempotency_store::store(
        &mut conn,
        &key,
        user.0.id,
        &path,
        method.as_str(),
        &request_hash,
        i32::from(status.as_u16()),
        response_json,
    )
    .await
    {
        // Storage failure must not fail the request itself.
        warn!(key = %key, error = %e, "failed to store idempotency record");
    }

    Response::from_parts(parts, Body::from(response_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_route_collapses_uuids() {
        let id = Uuid::new_v4();
        assert_eq!(
            normalize_route(&format!("/api/v1/tasks/{id}/subtasks")),
            "/api/v1/tasks/:id/subtasks"
        );
    }

    #[test]
    fn test_auth_exempt_paths() {
        assert!(is_auth_exempt("/health/live"));
        assert!(is_auth_exempt("/health/ready"));
        assert!(is_auth_exempt("/metrics"));
        assert!(is_auth_exempt("/api/v1/auth/google/callback"));
        assert!(is_auth_exempt("/api/v1/auth/refresh"));
        assert!(is_auth_exempt("/api/v1/.well-known/jwks.json"));
        assert!(is_auth_exempt("/api/v1/webhooks/checkout"));
        assert!(!is_auth_exempt("/api/v1/tasks"));
        assert!(!is_auth_exempt("/api/v1/users/me"));
    }

    #[test]
    fn test_bucket_selection() {
        assert_eq!(bucket_for("/api/v1/ai/chat"), Bucket::Ai);
        assert_eq!(bucket_for("/api/v1/auth/refresh"), Bucket::Auth);
        assert_eq!(bucket_for("/api/v1/tasks"), Bucket::General);
    }
}
