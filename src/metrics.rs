//! Prometheus metrics registry.

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Application metrics, registered once at startup and shared.
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    /// Requests by route, method, and status.
    pub http_requests: IntCounterVec,
    /// Request latency by route.
    pub http_duration: HistogramVec,
    /// Requests currently being served.
    pub http_in_flight: IntGauge,
    /// Optimistic-lock conflicts observed on task updates.
    pub version_conflicts: IntCounter,
    /// Payment webhook events by outcome.
    pub webhook_events: IntCounterVec,
}

impl Metrics {
    /// Build and register the metric families.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests = IntCounterVec::new(
            Opts::new("http_requests_total", "HTTP requests served"),
            &["route", "method", "status"],
        )?;
        let http_duration = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "HTTP request latency")
                .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["route"],
        )?;
        let http_in_flight = IntGauge::new(
            "http_requests_in_flight",
            "Requests currently being served",
        )?;
        let version_conflicts = IntCounter::new(
            "task_version_conflicts_total",
            "Optimistic-lock conflicts on task updates",
        )?;
        let webhook_events = IntCounterVec::new(
            Opts::new("webhook_events_total", "Payment webhook events"),
            &["outcome"],
        )?;

        registry.register(Box::new(http_requests.clone()))?;
        registry.register(Box::new(http_duration.clone()))?;
        registry.register(Box::new(http_in_flight.clone()))?;
        registry.register(Box::new(version_conflicts.clone()))?;
        registry.register(Box::new(webhook_events.clone()))?;

        Ok(Self {
            registry,
            http_requests,
            http_duration,
            http_in_flight,
            version_conflicts,
            webhook_events,
        })
    }

    /// Render the registry in Prometheus exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        encoder
            .encode_to_string(&self.registry.gather())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_render() {
        let metrics = Metrics::new().expect("metrics");
        metrics
            .http_requests
            .with_label_values(&["/api/v1/tasks", "GET", "200"])
            .inc();
        metrics.version_conflicts.inc();
        let body = metrics.render();
        assert!(body.contains("http_requests_total"));
        assert!(body.contains("task_version_conflicts_total"));
    }

    #[test]
    fn test_registries_are_independent() {
        let first = Metrics::new().expect("first");
        let second = Metrics::new().expect("second");
        first.http_in_flight.inc();
        assert_eq!(second.http_in_flight.get(), 0);
    }
}
