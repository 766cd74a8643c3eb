//! Prometheus metrics for the pruner.
//!
//! Provides metrics for:
//! - Revision deletions by outcome and path (cleanup run or queue)
//! - Queue operations and enqueue volume
//! - Cleanup errors
//!
//! Every recording function compiles to a no-op without the `prometheus`
//! feature.

#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;

#[cfg(feature = "prometheus")]
static INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the Prometheus recorder and start its scrape listener.
///
/// Must be called from within a tokio runtime.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    INSTALLED
        .set(())
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;

    PrometheusBuilder::new()
        .with_http_listener(config.listen)
        .install()
        .map_err(MetricsError::Install)?;

    tracing::info!(listen = %config.listen, "Prometheus metrics listener started");
    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record the outcome of a single revision deletion attempt.
///
/// # Arguments
/// * `source` - Which path attempted the deletion ("cleanup" or "queue")
/// * `outcome` - "deleted", "not_found", "failed", "conflict" or "dry_run"
pub fn record_revision_deletion(source: &str, outcome: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "revision_deletions_total",
            "source" => source.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (source, outcome);
    }
}

/// Record a work queue operation ("claim", "complete", "release", "drop", "skip").
pub fn record_queue_operation(operation: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("revision_queue_operations_total", "operation" => operation.to_string())
            .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = operation;
    }
}

/// Record items pushed onto the deletion queue.
///
/// # Arguments
/// * `scope` - "entity" for per-entity enqueue, "all" for a full rescan
/// * `count` - Number of items enqueued
pub fn record_enqueue(scope: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("revision_queue_enqueued_total", "scope" => scope.to_string()).increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (scope, count);
    }
}

/// Record an error that interrupted part of a cleanup job.
pub fn record_cleanup_error(job: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("revision_cleanup_errors_total", "job" => job.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = job;
    }
}

/// Record how long a cleanup run or queue tick took.
pub fn record_run_duration(job: &str, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        histogram!("revision_run_duration_seconds", "job" => job.to_string())
            .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (job, duration_secs);
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_metrics_is_noop() {
        let config = MetricsConfig::default();
        assert!(init_metrics(&config).is_ok());
    }

    #[test]
    fn test_recording_without_recorder() {
        // No recorder installed: calls must not panic
        record_revision_deletion("cleanup", "deleted");
        record_queue_operation("claim");
        record_enqueue("all", 3);
        record_cleanup_error("select");
        record_run_duration("cleanup", 0.5);
    }
}
