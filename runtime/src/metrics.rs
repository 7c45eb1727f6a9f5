//! Prometheus metrics for claim runs.
//!
//! Claim attempts, their outcomes and latencies are recorded through the
//! `metrics` facade. Without an installed recorder the calls are no-ops, so
//! library users only pay for metrics when they start a [`MetricsServer`].
//!
//! # Example
//!
//! ```rust,no_run
//! use seatclaim_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new();
//! server.start()?;
//!
//! // ... run claims ...
//!
//! if let Some(text) = server.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use seatclaim_core::{RejectReason, StrategyKind};
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder holder.
///
/// Installs the global recorder and renders the text exposition format on
/// demand (the demo prints it after a run).
#[derive(Default)]
pub struct MetricsServer {
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a server that has not installed its recorder yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g. by another test), this logs a
    /// warning and returns `Ok(())` without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!(
        "claims_attempted_total",
        "Total number of claim attempts started"
    );
    describe_counter!(
        "claims_bound_total",
        "Total number of claim attempts that bound a seat"
    );
    describe_counter!(
        "claims_rejected_total",
        "Total number of rejected claim attempts, by reason"
    );
    describe_counter!(
        "claims_retried_total",
        "Total number of retried claim attempts"
    );
    describe_histogram!(
        "claim_duration_seconds",
        "Time taken by one claim attempt, including pool wait"
    );
    describe_gauge!(
        "claim_run_busy_seats",
        "Bound seats observed in the store after the last run"
    );
}

/// Claim metrics recorder.
pub struct ClaimMetrics;

impl ClaimMetrics {
    /// Record an attempt being started.
    pub fn record_attempt(strategy: StrategyKind) {
        counter!("claims_attempted_total", "strategy" => strategy.as_str()).increment(1);
    }

    /// Record a bound seat.
    pub fn record_bound(strategy: StrategyKind, duration: Duration) {
        counter!("claims_bound_total", "strategy" => strategy.as_str()).increment(1);
        histogram!("claim_duration_seconds", "strategy" => strategy.as_str())
            .record(duration.as_secs_f64());
    }

    /// Record a rejection.
    pub fn record_rejected(strategy: StrategyKind, reason: &RejectReason, duration: Duration) {
        counter!(
            "claims_rejected_total",
            "strategy" => strategy.as_str(),
            "reason" => reason.label()
        )
        .increment(1);
        histogram!("claim_duration_seconds", "strategy" => strategy.as_str())
            .record(duration.as_secs_f64());
    }

    /// Record a retry after a lost race.
    pub fn record_retry(strategy: StrategyKind) {
        counter!("claims_retried_total", "strategy" => strategy.as_str()).increment(1);
    }

    /// Record the post-run busy seat count.
    #[allow(clippy::cast_precision_loss)] // Seat counts are far below f64 precision limits
    pub fn record_busy(strategy: StrategyKind, busy: u64) {
        gauge!("claim_run_busy_seats", "strategy" => strategy.as_str()).set(busy as f64);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn test_metrics_server_creation() {
        let server = MetricsServer::new();
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[test]
    fn test_claim_metrics_render() {
        let mut server = MetricsServer::new();
        server.start().unwrap();

        ClaimMetrics::record_attempt(StrategyKind::Pessimistic);
        ClaimMetrics::record_bound(StrategyKind::Pessimistic, Duration::from_millis(3));
        ClaimMetrics::record_rejected(
            StrategyKind::Pessimistic,
            &RejectReason::NoSeatAvailable,
            Duration::from_millis(1),
        );

        // Another test may have installed the recorder first; metrics are
        // still recorded, there is just no handle to render here.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("claims_bound_total"));
            assert!(rendered.contains("claims_rejected_total"));
            assert!(rendered.contains("no_seat_available"));
        }
    }
}
