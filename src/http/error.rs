//! API error type and the uniform error envelope.
//!
//! Domain services raise typed errors; this module translates each into
//! a stable machine-readable code, an HTTP status, and the
//! `{"error": {...}}` envelope. Cross-user access always reads as
//! NOT_FOUND so ids cannot be probed.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::ai::AiError;
use crate::auth::AuthError;
use crate::billing::BillingError;
use crate::credits::CreditError;
use crate::recovery::RecoveryError;
use crate::store::StoreError;

/// Machine-readable error codes exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Request failed schema or constraint validation.
    ValidationError,
    /// Missing or invalid credentials.
    Unauthorized,
    /// Token valid but expired; client should refresh.
    TokenExpired,
    /// Authenticated but not allowed.
    Forbidden,
    /// Feature requires the pro tier.
    TierRequired,
    /// Unknown id or cross-user access.
    NotFound,
    /// Generic state conflict.
    Conflict,
    /// Optimistic version check failed.
    VersionConflict,
    /// A tier/achievement cap was reached.
    LimitExceeded,
    /// The task is archived.
    TaskArchived,
    /// Due date more than a year out.
    DueDateExceeded,
    /// Credit balance too low.
    InsufficientCredits,
    /// Too many requests.
    RateLimitExceeded,
    /// AI vendor failed or timed out.
    AiServiceUnavailable,
    /// Per-task AI request cap reached.
    AiLimitExceeded,
    /// Idempotency key reused with a different body.
    IdempotencyConflict,
    /// Anything unhandled.
    InternalError,
}

/// An API-facing error.
#[derive(Debug)]
pub struct ApiError {
    /// Machine-readable code.
    pub code: ErrorCode,
    /// HTTP status.
    pub status: StatusCode,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    pub details: Option<serde_json::Value>,
    /// Seconds to wait, for rate-limit errors.
    pub retry_after: Option<u64>,
}

impl ApiError {
    /// Build an error with just code, status, and message.
    pub fn new(code: ErrorCode, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            status,
            message: message.into(),
            details: None,
            retry_after: None,
        }
    }

    /// 400 validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, StatusCode::BAD_REQUEST, message)
    }

    /// 401 unauthorized.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, StatusCode::UNAUTHORIZED, message)
    }

    /// 404 not found.
    pub fn not_found() -> Self {
        Self::new(ErrorCode::NotFound, StatusCode::NOT_FOUND, "not found")
    }

    /// 429 with a retry hint.
    pub fn rate_limited(retry_after: u64) -> Self {
        Self {
            code: ErrorCode::RateLimitExceeded,
            status: StatusCode::TOO_MANY_REQUESTS,
            message: "rate limit exceeded".to_owned(),
            details: None,
            retry_after: Some(retry_after),
        }
    }

    /// 500 with a generic message (the cause goes to the log, not the
    /// client).
    pub fn internal() -> Self {
        Self::new(
            ErrorCode::InternalError,
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal error",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut error = json!({
            "code": self.code,
            "message": self.message,
        });
        if let Some(details) = self.details {
            error["details"] = details;
        }
        if let Some(retry_after) = self.retry_after {
            error["retry_after"] = json!(retry_after);
        }

        let mut response = (self.status, Json(json!({ "error": error }))).into_response();
        if let Some(retry_after) = self.retry_after {
            if let Ok(value) = retry_after.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::not_found(),
            StoreError::VersionConflict { supplied, stored } => Self {
                code: ErrorCode::VersionConflict,
                status: StatusCode::CONFLICT,
                message: "the task was modified by another request".to_owned(),
                details: Some(json!({ "supplied": supplied, "stored": stored })),
                retry_after: None,
            },
            StoreError::LimitExceeded { what, limit } => Self {
                code: ErrorCode::LimitExceeded,
                status: StatusCode::CONFLICT,
                message: format!("{what} limit reached"),
                details: Some(json!({ "limit": limit })),
                retry_after: None,
            },
            StoreError::TaskArchived => ApiError::new(
                ErrorCode::TaskArchived,
                StatusCode::CONFLICT,
                "archived tasks cannot be modified",
            ),
            StoreError::DueDateExceeded => ApiError::new(
                ErrorCode::DueDateExceeded,
                StatusCode::BAD_REQUEST,
                "due date must be within one year",
            ),
            StoreError::Validation(message) => ApiError::validation(message),
            StoreError::IdCollision => ApiError::new(
                ErrorCode::Conflict,
                StatusCode::CONFLICT,
                "an entity with that id already exists",
            ),
            StoreError::InvalidReorder => ApiError::validation(
                "reorder list must be a permutation of the current subtasks",
            ),
            StoreError::Database(e) => {
                tracing::error!(error = %e, "database error");
                ApiError::internal()
            }
        }
    }
}

impl From<CreditError> for ApiError {
    fn from(e: CreditError) -> Self {
        match e {
            CreditError::InsufficientCredits {
                available,
                requested,
            } => Self {
                code: ErrorCode::InsufficientCredits,
                status: StatusCode::PAYMENT_REQUIRED,
                message: "not enough credits".to_owned(),
                details: Some(json!({ "available": available, "requested": requested })),
                retry_after: None,
            },
            CreditError::PurchaseLimitExceeded {
                purchased, limit, ..
            } => Self {
                code: ErrorCode::LimitExceeded,
                status: StatusCode::CONFLICT,
                message: "monthly credit purchase limit exceeded".to_owned(),
                details: Some(json!({ "purchased": purchased, "limit": limit })),
                retry_after: None,
            },
            CreditError::NonPositiveAmount(_) => {
                ApiError::validation("amount must be positive")
            }
            CreditError::Database(e) => {
                tracing::error!(error = %e, "database error");
                ApiError::internal()
            }
        }
    }
}

impl From<AiError> for ApiError {
    fn from(e: AiError) -> Self {
        match e {
            AiError::Credit(e) => e.into(),
            AiError::TaskRequestCapExceeded => ApiError::new(
                ErrorCode::AiLimitExceeded,
                StatusCode::CONFLICT,
                "AI request limit reached for this task",
            ),
            AiError::TierRequired => ApiError::new(
                ErrorCode::TierRequired,
                StatusCode::FORBIDDEN,
                "this feature requires the pro tier",
            ),
            AiError::ServiceUnavailable(message) => ApiError::new(
                ErrorCode::AiServiceUnavailable,
                StatusCode::SERVICE_UNAVAILABLE,
                message,
            ),
            AiError::Validation(message) => ApiError::validation(message),
            AiError::Store(e) => e.into(),
            AiError::Database(e) => {
                tracing::error!(error = %e, "database error");
                ApiError::internal()
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::TokenExpired => ApiError::new(
                ErrorCode::TokenExpired,
                StatusCode::UNAUTHORIZED,
                "access token expired",
            ),
            AuthError::InvalidToken | AuthError::RefreshRejected => {
                ApiError::unauthorized("invalid credentials")
            }
            AuthError::Identity(message) => ApiError::unauthorized(message),
            AuthError::EmailNotVerified => {
                ApiError::unauthorized("email address is not verified")
            }
            AuthError::ProviderUnreachable(message) => ApiError::new(
                ErrorCode::InternalError,
                StatusCode::SERVICE_UNAVAILABLE,
                message,
            ),
            AuthError::Store(e) => e.into(),
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(e: BillingError) -> Self {
        match e {
            BillingError::SubscriptionNotFound => ApiError::not_found(),
            BillingError::AlreadyTerminal(status) => ApiError::new(
                ErrorCode::Conflict,
                StatusCode::CONFLICT,
                format!("subscription is already {status:?}"),
            ),
            BillingError::InvalidPayload(message) => ApiError::validation(message),
            BillingError::Store(e) => e.into(),
            BillingError::Credit(e) => e.into(),
            BillingError::Database(e) => {
                tracing::error!(error = %e, "database error");
                ApiError::internal()
            }
        }
    }
}

impl From<RecoveryError> for ApiError {
    fn from(e: RecoveryError) -> Self {
        match e {
            RecoveryError::NotFound => ApiError::not_found(),
            RecoveryError::IdCollision => ApiError::new(
                ErrorCode::Conflict,
                StatusCode::CONFLICT,
                "a task with the original id already exists",
            ),
            RecoveryError::Payload(message) => {
                tracing::error!(error = %message, "unreadable tombstone payload");
                ApiError::internal()
            }
            RecoveryError::Store(e) => e.into(),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!(error = %e, "database error");
        ApiError::internal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_not_found_maps_to_404() {
        let err: ApiError = StoreError::NotFound.into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[test]
    fn test_version_conflict_maps_to_409() {
        let err: ApiError = StoreError::VersionConflict {
            supplied: 1,
            stored: 2,
        }
        .into();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.code, ErrorCode::VersionConflict);
    }

    #[test]
    fn test_insufficient_credits_maps_to_402() {
        let err: ApiError = CreditError::InsufficientCredits {
            available: 3,
            requested: 5,
        }
        .into();
        assert_eq!(err.status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(err.code, ErrorCode::InsufficientCredits);
    }

    #[test]
    fn test_expired_token_has_distinct_code() {
        let err: ApiError = AuthError::TokenExpired.into();
        assert_eq!(err.code, ErrorCode::TokenExpired);
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_error_code_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::VersionConflict).expect("json"),
            "\"VERSION_CONFLICT\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::AiServiceUnavailable).expect("json"),
            "\"AI_SERVICE_UNAVAILABLE\""
        );
    }
}
