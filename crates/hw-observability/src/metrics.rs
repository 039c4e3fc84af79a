//! Metrics collection for Hitwarden.
//!
//! Metrics are recorded through the `metrics` facade. Installing an exporter
//! is left to the process entry point; without one every call is a no-op.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::sync::Once;

static REGISTER: Once = Once::new();

/// Records triage metrics for transitions, operations and correlation runs.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Creates a collector, registering metric descriptions on first use.
    pub fn new() -> Self {
        REGISTER.call_once(Self::register_metrics);
        Self
    }

    fn register_metrics() {
        describe_counter!(
            "hw_transitions_total",
            "Hit workflow transitions attempted, by outcome"
        );
        describe_counter!(
            "hw_operations_executed_total",
            "Operations executed through the registry, by operation and outcome"
        );
        describe_histogram!(
            "hw_operation_duration_seconds",
            "Duration of a single operation execution"
        );
        describe_counter!(
            "hw_automation_dispatches_total",
            "Automation trigger events dispatched, by trigger"
        );
        describe_counter!(
            "hw_rule_runs_total",
            "Correlation rule executions, by outcome"
        );
        describe_counter!("hw_bundles_created_total", "Bundles created by correlation");
        describe_counter!(
            "hw_bulk_retries_total",
            "Store submissions retried after a transient failure"
        );
    }

    /// Records the outcome of one hit transition.
    pub fn record_transition(&self, transition: &str, success: bool) {
        let outcome = if success { "success" } else { "error" };
        counter!("hw_transitions_total", "transition" => transition.to_string(), "outcome" => outcome)
            .increment(1);
    }

    /// Records an operation execution and its duration.
    pub fn record_operation(&self, operation_id: &str, outcome: &str, duration_secs: f64) {
        counter!(
            "hw_operations_executed_total",
            "operation" => operation_id.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
        histogram!("hw_operation_duration_seconds", "operation" => operation_id.to_string())
            .record(duration_secs);
    }

    /// Records a dispatched automation trigger.
    pub fn record_dispatch(&self, trigger: &str) {
        counter!("hw_automation_dispatches_total", "trigger" => trigger.to_string()).increment(1);
    }

    /// Records a correlation rule run.
    pub fn record_rule_run(&self, success: bool) {
        let outcome = if success { "success" } else { "error" };
        counter!("hw_rule_runs_total", "outcome" => outcome).increment(1);
    }

    /// Records a newly created bundle.
    pub fn record_bundle_created(&self) {
        counter!("hw_bundles_created_total").increment(1);
    }

    /// Records a retried store submission.
    pub fn record_bulk_retry(&self, operation: &str) {
        counter!("hw_bulk_retries_total", "operation" => operation.to_string()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_exporter_is_noop() {
        let metrics = MetricsCollector::new();
        metrics.record_transition("assess", true);
        metrics.record_operation("add_label", "success", 0.01);
        metrics.record_rule_run(false);
        metrics.record_bulk_retry("update_by_query");
    }
}
