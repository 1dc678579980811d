//! Shared application state injected into every handler.
//!
//! One explicit value constructed in `main` — no globals. Everything a
//! handler or middleware needs hangs off this struct.

use std::sync::Arc;

use sqlx::PgPool;

use crate::ai::AiService;
use crate::auth::AuthService;
use crate::config::TaskwellConfig;
use crate::events::EventBus;
use crate::metrics::Metrics;
use crate::notify::push::PushClient;
use crate::ratelimit::RateLimiter;

/// Application state for the API process.
#[derive(Clone)]
pub struct AppState {
    /// Database pool.
    pub pool: PgPool,
    /// Configuration.
    pub config: Arc<TaskwellConfig>,
    /// Domain event bus with the standard handlers registered.
    pub bus: Arc<EventBus>,
    /// Prometheus metrics.
    pub metrics: Metrics,
    /// Request rate limiter.
    pub limiter: Arc<RateLimiter>,
    /// Token issuance and verification.
    pub auth: Arc<AuthService>,
    /// AI orchestration.
    pub ai: Arc<AiService>,
    /// Push delivery client.
    pub push: Arc<PushClient>,
}

impl AppState {
    /// Assemble state from already-constructed parts.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        config: Arc<TaskwellConfig>,
        bus: Arc<EventBus>,
        metrics: Metrics,
        auth: Arc<AuthService>,
        ai: Arc<AiService>,
        push: Arc<PushClient>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        Self {
            pool,
            config,
            bus,
            metrics,
            limiter,
            auth,
            ai,
            push,
        }
    }
}
