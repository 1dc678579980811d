//! Browser push delivery.
//!
//! Delivery POSTs the notification payload to each registered endpoint.
//! Errors split into transient (worth retrying later) and permanent
//! (endpoint gone or keys invalid); permanent failures deactivate the
//! subscription so dead endpoints stop accumulating traffic.

use std::time::Duration;

use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::PushConfig;
use crate::domain::{Notification, PushSubscription};
use crate::store::push as push_store;

/// Push delivery failure classification.
#[derive(Debug, Error)]
pub enum PushError {
    /// Worth retrying: timeout, 429, 5xx.
    #[error("transient push failure: {0}")]
    Transient(String),
    /// Endpoint gone or keys rejected; the subscription is dead.
    #[error("permanent push failure: {0}")]
    Permanent(String),
}

/// Body POSTed to push endpoints.
#[derive(Debug, Serialize)]
struct PushPayload<'a> {
    title: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    action_url: Option<&'a str>,
}

/// HTTP client for push endpoints.
#[derive(Debug, Clone)]
pub struct PushClient {
    http: reqwest::Client,
    contact: String,
}

impl PushClient {
    /// Build the client from config.
    pub fn new(config: &PushConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .unwrap_or_default();
        Self {
            http,
            contact: config.contact.clone(),
        }
    }

    /// POST one notification to one endpoint.
    pub async fn deliver(
        &self,
        subscription: &PushSubscription,
        notification: &Notification,
    ) -> Result<(), PushError> {
        let payload = PushPayload {
            title: &notification.title,
            body: &notification.body,
            action_url: notification.action_url.as_deref(),
        };

        let response = self
            .http
            .post(&subscription.endpoint)
            .header("TTL", "86400")
            .header("Urgency", "normal")
            .header("Authorization", format!("vapid contact={}", self.contact))
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    PushError::Transient(e.to_string())
                } else {
                    PushError::Permanent(e.to_string())
                }
            })?;

        match response.status().as_u16() {
            200..=299 => Ok(()),
            404 | 410 => Err(PushError::Permanent("endpoint gone".to_owned())),
            400 | 401 | 403 => Err(PushError::Permanent("keys rejected".to_owned())),
            429 => Err(PushError::Transient("rate limited by push service".to_owned())),
            status if status >= 500 => {
                Err(PushError::Transient(format!("push service error {status}")))
            }
            status => Err(PushError::Permanent(format!("unexpected status {status}"))),
        }
    }

    /// Fire-and-forget fan-out to a set of endpoints.
    ///
    /// Permanent failures deactivate the subscription; transient ones are
    /// logged and dropped (the next reminder retries naturally).
    pub async fn fan_out(
        &self,
        pool: &PgPool,
        targets: &[PushSubscription],
        notification: &Notification,
    ) {
        for subscription in targets {
            match self.deliver(subscription, notification).await {
                Ok(()) => {
                    debug!(endpoint = %subscription.endpoint, "push delivered");
                }
                Err(PushError::Permanent(reason)) => {
                    info!(
                        endpoint = %subscription.endpoint,
                        reason = %reason,
                        "deactivating dead push endpoint"
                    );
                    if let Ok(mut conn) = pool.acquire().await {
                        if let Err(e) = push_store::deactivate(&mut conn, subscription.id).await {
                            warn!(error = %e, "failed to deactivate push subscription");
                        }
                    }
                }
                Err(PushError::Transient(reason)) => {
                    warn!(
                        endpoint = %subscription.endpoint,
                        reason = %reason,
                        "transient push failure"
                    );
                }
            }
        }
    }
}
