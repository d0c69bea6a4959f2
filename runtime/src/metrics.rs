//! Metrics for the Store, the effect executor and the Cancellation Registry.
//!
//! Everything is recorded through the `metrics` facade, so nothing is
//! collected until a recorder is installed. [`MetricsRecorder`] installs an
//! in-process Prometheus recorder whose output can be rendered on demand.
//!
//! # Example
//!
//! ```rust,no_run
//! use ripple_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut recorder = MetricsRecorder::new();
//! recorder.install()?;
//!
//! // ... run stores ...
//!
//! if let Some(text) = recorder.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

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

/// In-process Prometheus recorder.
#[derive(Default)]
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl MetricsRecorder {
    /// Create a recorder that is not yet installed.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe all metrics and install the Prometheus recorder globally.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// Only one global recorder can exist per process. If one is already
    /// installed (e.g., by another test) this logs a warning and succeeds
    /// without a handle.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!(
                        "Metrics recorder already initialized, skipping re-initialization"
                    );
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this recorder was not the one installed.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    // Store
    describe_counter!("store.actions.total", "Total number of actions reduced by stores");
    describe_histogram!(
        "store.reducer.duration_seconds",
        "Time taken by a single reducer invocation"
    );
    describe_counter!("store.effects.started", "Total number of effects started");
    describe_counter!(
        "store.effects.failed",
        "Total number of effects that ended in an unhandled failure"
    );
    describe_counter!(
        "store.reentrant_sends",
        "Actions sent from within a reducer's synchronous extent"
    );
    describe_counter!("store.actions.rejected", "Actions rejected after shutdown");

    // Cancellation Registry
    describe_counter!(
        "registry.cancellations",
        "Total number of running effects cancelled by identifier"
    );
}

/// Store metrics recorder.
pub struct StoreMetrics;

impl StoreMetrics {
    /// Record one reducer invocation.
    pub fn record_action(duration: Duration) {
        counter!("store.actions.total").increment(1);
        histogram!("store.reducer.duration_seconds").record(duration.as_secs_f64());
    }

    /// Record an effect being started.
    pub fn record_effect_started() {
        counter!("store.effects.started").increment(1);
    }

    /// Record an unhandled effect failure.
    pub fn record_effect_failed() {
        counter!("store.effects.failed").increment(1);
    }

    /// Record a send issued while the reducer was running.
    pub fn record_reentrant_send() {
        counter!("store.reentrant_sends").increment(1);
    }

    /// Record a send rejected after shutdown.
    pub fn record_rejected() {
        counter!("store.actions.rejected").increment(1);
    }
}

/// Cancellation Registry metrics recorder.
pub struct RegistryMetrics;

impl RegistryMetrics {
    /// Record `count` effects cancelled by identifier.
    pub fn record_cancellations(count: usize) {
        counter!("registry.cancellations").increment(count as u64);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_recorder_creation() {
        let recorder = MetricsRecorder::new();
        assert!(recorder.handle().is_none());
        assert!(recorder.render().is_none());
    }

    #[test]
    fn test_recorder_install_and_render() {
        let mut recorder = MetricsRecorder::new();
        recorder.install().unwrap();

        StoreMetrics::record_action(Duration::from_micros(20));
        StoreMetrics::record_effect_started();
        RegistryMetrics::record_cancellations(2);

        // Another test in this process may have installed the recorder first
        if let Some(rendered) = recorder.render() {
            assert!(rendered.contains("store_actions_total"));
            assert!(rendered.contains("registry_cancellations"));
        }
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        StoreMetrics::record_reentrant_send();
        StoreMetrics::record_effect_failed();
        StoreMetrics::record_rejected();
    }
}
