//! [`Recorder`] backed by the `metrics` facade
//!
//! Whatever exporter the application installs (Prometheus, StatsD, ...)
//! receives these series; with no exporter installed they are dropped.

use super::Recorder;
use crate::circuit::CircuitState;
use std::sync::Arc;
use tokio::time::Instant;

const EXECUTION_DURATION: &str = "resilience_command_execution_duration_seconds";
const RETRIES: &str = "resilience_retries_total";
const TIMEOUTS: &str = "resilience_timeouts_total";
const BULKHEAD_QUEUED: &str = "resilience_bulkhead_queued_total";
const BULKHEAD_PROCESSED: &str = "resilience_bulkhead_processed_total";
const BULKHEAD_REJECTIONS: &str = "resilience_bulkhead_rejections_total";
const CIRCUIT_STATE_CHANGES: &str = "resilience_circuit_breaker_state_changes_total";
const CHAOS_FAILURES: &str = "resilience_chaos_injected_failures_total";

#[derive(Debug, Clone, Default)]
pub struct MetricsRecorder {
    id: String,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Recorder for MetricsRecorder {
    fn with_id(&self, id: &str) -> Arc<dyn Recorder> {
        Arc::new(Self { id: id.to_string() })
    }

    fn observe_command_execution(&self, started: Instant, success: bool) {
        ::metrics::histogram!(
            EXECUTION_DURATION,
            "id" => self.id.clone(),
            "success" => if success { "true" } else { "false" }
        )
        .record(started.elapsed().as_secs_f64());
    }

    fn inc_retry(&self) {
        ::metrics::counter!(RETRIES, "id" => self.id.clone()).increment(1);
    }

    fn inc_timeout(&self) {
        ::metrics::counter!(TIMEOUTS, "id" => self.id.clone()).increment(1);
    }

    fn inc_bulkhead_queued(&self) {
        ::metrics::counter!(BULKHEAD_QUEUED, "id" => self.id.clone()).increment(1);
    }

    fn inc_bulkhead_processed(&self) {
        ::metrics::counter!(BULKHEAD_PROCESSED, "id" => self.id.clone()).increment(1);
    }

    fn inc_bulkhead_rejection(&self) {
        ::metrics::counter!(BULKHEAD_REJECTIONS, "id" => self.id.clone()).increment(1);
    }

    fn inc_circuit_breaker_state(&self, state: CircuitState) {
        ::metrics::counter!(
            CIRCUIT_STATE_CHANGES,
            "id" => self.id.clone(),
            "state" => state.as_str()
        )
        .increment(1);
    }

    fn inc_chaos_injected_failure(&self, kind: &str) {
        ::metrics::counter!(
            CHAOS_FAILURES,
            "id" => self.id.clone(),
            "kind" => kind.to_string()
        )
        .increment(1);
    }
}
