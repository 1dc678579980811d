//! HTTP API: router assembly and the serve loop.

pub mod error;
pub mod middleware;
pub mod pagination;
pub mod routes;
pub mod state;

use std::time::Duration;

use axum::http::{HeaderValue, Method};
use axum::middleware as axum_middleware;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::info;

use state::AppState;

/// Build the application router with the full middleware pipeline.
///
/// Pipeline order (outermost first): request-id, security headers,
/// logging, metrics, CORS, auth, idempotency, rate limit.
pub fn app_router(state: AppState) -> Router {
    let api = Router::new()
        // Auth
        .route("/auth/google/callback", post(routes::auth::google_callback))
        .route("/auth/refresh", post(routes::auth::refresh))
        .route("/auth/logout", post(routes::auth::logout))
        .route("/.well-known/jwks.json", get(routes::auth::jwks))
        // Users
        .route(
            "/users/me",
            get(routes::users::me).patch(routes::users::update_me),
        )
        // Tasks
        .route(
            "/tasks",
            get(routes::tasks::list).post(routes::tasks::create),
        )
        .route(
            "/tasks/:id",
            get(routes::tasks::get)
                .patch(routes::tasks::update)
                .delete(routes::tasks::delete),
        )
        .route("/tasks/:id/complete", post(routes::tasks::complete))
        .route("/tasks/:id/uncomplete", post(routes::tasks::uncomplete))
        .route(
            "/tasks/:id/force-complete",
            post(routes::tasks::force_complete),
        )
        // Subtasks
        .route(
            "/tasks/:id/subtasks",
            get(routes::subtasks::list).post(routes::subtasks::create),
        )
        .route(
            "/tasks/:id/subtasks/reorder",
            post(routes::subtasks::reorder),
        )
        .route(
            "/tasks/:id/subtasks/generate",
            post(routes::ai::generate_subtasks),
        )
        .route(
            "/subtasks/:id",
            patch(routes::subtasks::update).delete(routes::subtasks::delete),
        )
        // Templates
        .route(
            "/templates",
            get(routes::templates::list).post(routes::templates::create),
        )
        .route(
            "/templates/:id",
            get(routes::templates::get)
                .patch(routes::templates::update)
                .delete(routes::templates::delete),
        )
        // Notes
        .route(
            "/notes",
            get(routes::notes::list).post(routes::notes::create),
        )
        .route(
            "/notes/:id",
            patch(routes::notes::update).delete(routes::notes::delete),
        )
        .route("/notes/:id/convert", post(routes::notes::convert))
        .route("/notes/:id/transcribe", post(routes::notes::transcribe))
        // Reminders
        .route(
            "/tasks/:id/reminders",
            get(routes::reminders::list).post(routes::reminders::create),
        )
        .route("/reminders/:id", delete(routes::reminders::delete))
        // AI
        .route("/ai/chat", post(routes::ai::chat))
        .route("/ai/confirm-action", post(routes::ai::confirm_action))
        .route("/ai/credits", get(routes::ai::ai_credits))
        // Credits
        .route("/credits", get(routes::credits::get))
        .route("/credits/purchase", post(routes::credits::purchase))
        // Achievements
        .route("/achievements", get(routes::achievements::list))
        .route("/achievements/stats", get(routes::achievements::stats))
        .route("/achievements/limits", get(routes::achievements::limits))
        // Focus
        .route("/focus/start", post(routes::focus::start))
        .route("/focus/end", post(routes::focus::end))
        // Subscription
        .route("/subscription", get(routes::subscription::get))
        .route(
            "/subscription/checkout",
            post(routes::subscription::checkout),
        )
        .route("/subscription/cancel", post(routes::subscription::cancel))
        // Notifications
        .route("/notifications", get(routes::notifications::list))
        .route(
            "/notifications/read-all",
            post(routes::notifications::mark_all_read),
        )
        .route(
            "/notifications/:id/read",
            post(routes::notifications::mark_read),
        )
        .route(
            "/notifications/push-subscription",
            post(routes::notifications::register_push)
                .delete(routes::notifications::delete_push),
        )
        // Activity & recovery
        .route("/activity", get(routes::activity::list))
        .route("/tombstones", get(routes::recovery::list))
        .route("/tasks/recover/:tombstone_id", post(routes::recovery::recover))
        // Webhooks
        .route("/webhooks/checkout", post(routes::webhooks::checkout));

    let cors = cors_layer(&state);

    Router::new()
        .route("/health/live", get(routes::health::live))
        .route("/health/ready", get(routes::health::ready))
        .route("/metrics", get(routes::health::metrics))
        .nest("/api/v1", api)
        .layer(TimeoutLayer::new(Duration::from_secs(
            state.config.server.request_timeout_seconds,
        )))
        // Innermost → outermost from here down.
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::idempotency,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth,
        ))
        .layer(cors)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::metrics,
        ))
        .layer(axum_middleware::from_fn(middleware::logging))
        .layer(axum_middleware::from_fn(middleware::security_headers))
        .layer(axum_middleware::from_fn(middleware::request_id))
        .with_state(state)
}

/// CORS: configured origin allow-list, credentials allowed.
fn cors_layer(state: &AppState) -> CorsLayer {
    let origins: Vec<HeaderValue> = state
        .config
        .server
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderName::from_static("idempotency-key"),
            axum::http::HeaderName::from_static("x-request-id"),
        ])
        .expose_headers([
            axum::http::HeaderName::from_static("x-request-id"),
            axum::http::HeaderName::from_static("x-idempotent-replayed"),
            axum::http::HeaderName::from_static("retry-after"),
        ])
        .allow_credentials(true)
}

/// Bind and serve until shutdown.
pub async fn serve(state: AppState, shutdown: impl std::future::Future<Output = ()> + Send + 'static)
    -> anyhow::Result<()> {
    let addr = state.config.server.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "API listening");
    axum::serve(
        listener,
        app_router(state).into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}
