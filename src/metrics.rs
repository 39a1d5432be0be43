//! Prometheus metrics.
//!
//! Recording goes through the `metrics` facade and is a no-op until
//! [`MetricsService`] installs the Prometheus recorder.

use std::time::Duration;

use ::metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

pub const REQUESTS_TOTAL: &str = "biosearch_requests_total";
pub const DIMENSION_MISMATCH_TOTAL: &str = "biosearch_dimension_mismatch_total";
pub const SEARCH_DURATION_SECONDS: &str = "biosearch_search_duration_seconds";
pub const LAST_CANDIDATE_COUNT: &str = "biosearch_last_candidate_count";

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder and serve `/metrics`
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Owns the Prometheus handle used to render `/metrics`.
pub struct MetricsService {
    handle: Option<PrometheusHandle>,
}

impl MetricsService {
    /// Install the global recorder if enabled.
    ///
    /// Only one recorder can exist per process; a second install is logged and
    /// leaves this service without a handle.
    pub fn new(config: MetricsConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }

        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => Self {
                handle: Some(handle),
            },
            Err(e) => {
                warn!("Failed to install metrics recorder: {}", e);
                Self::disabled()
            }
        }
    }

    pub fn disabled() -> Self {
        Self { handle: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.handle.is_some()
    }

    /// Render metrics in Prometheus text format.
    pub fn render(&self) -> Result<String> {
        self.handle
            .as_ref()
            .map(|h| h.render())
            .ok_or_else(|| Error::Api("Metrics are disabled".to_string()))
    }
}

/// `outcome` label for a finished pipeline run.
pub fn outcome_label<T>(result: &Result<T>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(Error::InvalidInput(_)) => "invalid_input",
        Err(Error::EmbeddingUnavailable(_)) => "embedding_unavailable",
        Err(Error::UpstreamContractViolation(_)) => "contract_violation",
        Err(Error::Store(_)) => "store_error",
        Err(Error::Timeout(_)) => "timeout",
        Err(_) => "error",
    }
}

/// Record the outcome and latency of one pipeline run.
pub fn record_search<T>(result: &Result<T>, elapsed: Duration) {
    counter!(REQUESTS_TOTAL, "outcome" => outcome_label(result)).increment(1);
    histogram!(SEARCH_DURATION_SECONDS).record(elapsed.as_secs_f64());
}

pub fn record_candidate_count(count: usize) {
    gauge!(LAST_CANDIDATE_COUNT).set(count as f64);
}

pub fn record_dimension_mismatches(count: usize) {
    if count > 0 {
        counter!(DIMENSION_MISMATCH_TOTAL).increment(count as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_service_does_not_render() {
        let service = MetricsService::new(MetricsConfig { enabled: false });
        assert!(!service.is_enabled());
        assert!(service.render().is_err());
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(outcome_label(&Ok::<(), Error>(())), "ok");
        assert_eq!(
            outcome_label::<()>(&Err(Error::InvalidInput("Missing query parameter".into()))),
            "invalid_input"
        );
        assert_eq!(outcome_label::<()>(&Err(Error::Timeout(20))), "timeout");
        assert_eq!(outcome_label::<()>(&Err(Error::Api("x".into()))), "error");
    }

    #[test]
    fn test_timeout_is_counted_and_timed() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        ::metrics::with_local_recorder(&recorder, || {
            record_search::<()>(&Err(Error::Timeout(20)), Duration::from_millis(21));
        });

        let rendered = handle.render();
        assert!(rendered.contains(REQUESTS_TOTAL));
        assert!(rendered.contains("outcome=\"timeout\""));
        assert!(rendered.contains(SEARCH_DURATION_SECONDS));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let ok: Result<()> = Ok(());
        record_search(&ok, Duration::from_millis(3));
        record_candidate_count(12);
        record_dimension_mismatches(2);
    }
}
