//! Run tracker that reports through `tracing`.

use tracing::info;

use super::domain::RunTracker;

/// Emits every metric and artefact as a structured `info` event.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingTracker;

impl RunTracker for TracingTracker {
    fn record_metric(&self, model: &str, name: &str, value: f64) {
        info!(target: "csat::tracking", model, metric = name, value, "metric");
    }

    fn record_artifact(&self, name: &str, location: &str) {
        info!(target: "csat::tracking", artifact = name, location, "artifact");
    }
}
