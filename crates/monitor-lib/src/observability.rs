//! Observability infrastructure for the status monitor
//!
//! Provides:
//! - Prometheus metrics (evaluation latency, run outcomes, skips, timeouts, alerts)
//! - Structured JSON logging with tracing

use crate::models::{CheckId, EffectiveStatus, OverallStatus, ServiceId};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for evaluation latency (in seconds); checks talk to remote backends
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

struct MonitorMetricsInner {
    evaluation_latency_seconds: Histogram,
    check_runs: IntCounterVec,
    overlap_skips: IntCounter,
    evaluation_timeouts: IntCounter,
    checks_scheduled: IntGauge,
    services_failing: IntGauge,
    alerts_dispatched: IntCounter,
    dispatch_errors: IntCounter,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            evaluation_latency_seconds: register_histogram!(
                "status_monitor_evaluation_latency_seconds",
                "Time spent evaluating a single status check",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register evaluation_latency_seconds"),

            check_runs: register_int_counter_vec!(
                "status_monitor_check_runs_total",
                "Completed check evaluations by kind and result",
                &["kind", "result"]
            )
            .expect("Failed to register check_runs_total"),

            overlap_skips: register_int_counter!(
                "status_monitor_overlap_skips_total",
                "Due runs skipped because the previous run was still executing"
            )
            .expect("Failed to register overlap_skips_total"),

            evaluation_timeouts: register_int_counter!(
                "status_monitor_evaluation_timeouts_total",
                "Evaluations abandoned after exceeding their timeout"
            )
            .expect("Failed to register evaluation_timeouts_total"),

            checks_scheduled: register_int_gauge!(
                "status_monitor_checks_scheduled",
                "Number of active checks with a scheduling slot"
            )
            .expect("Failed to register checks_scheduled"),

            services_failing: register_int_gauge!(
                "status_monitor_services_failing",
                "Number of services whose overall status is not passing"
            )
            .expect("Failed to register services_failing"),

            alerts_dispatched: register_int_counter!(
                "status_monitor_alerts_dispatched_total",
                "Alert deliveries that reached a sink"
            )
            .expect("Failed to register alerts_dispatched_total"),

            dispatch_errors: register_int_counter!(
                "status_monitor_dispatch_errors_total",
                "Alert deliveries that failed or timed out"
            )
            .expect("Failed to register dispatch_errors_total"),
        }
    }
}

/// Lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new)
    }

    pub fn observe_evaluation(&self, kind: &str, succeeded: bool, duration_secs: f64) {
        let inner = self.inner();
        inner.evaluation_latency_seconds.observe(duration_secs);
        let result = if succeeded { "success" } else { "failure" };
        inner.check_runs.with_label_values(&[kind, result]).inc();
    }

    pub fn inc_overlap_skips(&self) {
        self.inner().overlap_skips.inc();
    }

    pub fn inc_evaluation_timeouts(&self) {
        self.inner().evaluation_timeouts.inc();
    }

    pub fn set_checks_scheduled(&self, count: i64) {
        self.inner().checks_scheduled.set(count);
    }

    pub fn set_services_failing(&self, count: i64) {
        self.inner().services_failing.set(count);
    }

    pub fn inc_alerts_dispatched(&self) {
        self.inner().alerts_dispatched.inc();
    }

    pub fn inc_dispatch_errors(&self) {
        self.inner().dispatch_errors.inc();
    }
}

/// Structured logger for monitor events
///
/// Every record carries an `event` field so log pipelines can filter
/// state transitions without parsing messages.
#[derive(Clone)]
pub struct StructuredLogger {
    instance_name: String,
}

impl StructuredLogger {
    pub fn new(instance_name: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, checks: usize, services: usize) {
        info!(
            event = "monitor_started",
            instance = %self.instance_name,
            version = %version,
            checks = checks,
            services = services,
            "Status monitor started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "monitor_shutdown",
            instance = %self.instance_name,
            reason = %reason,
            "Status monitor shutting down"
        );
    }

    pub fn log_check_evaluated(
        &self,
        check_id: CheckId,
        check_name: &str,
        kind: &str,
        succeeded: bool,
        duration_ms: u64,
        message: &str,
    ) {
        info!(
            event = "check_evaluated",
            instance = %self.instance_name,
            check_id = check_id,
            check_name = %check_name,
            kind = %kind,
            succeeded = succeeded,
            duration_ms = duration_ms,
            message = %message,
            "Check evaluated"
        );
    }

    pub fn log_check_status_changed(
        &self,
        check_id: CheckId,
        check_name: &str,
        old: EffectiveStatus,
        new: EffectiveStatus,
    ) {
        if new == EffectiveStatus::Failing {
            warn!(
                event = "check_status_changed",
                instance = %self.instance_name,
                check_id = check_id,
                check_name = %check_name,
                old = ?old,
                new = ?new,
                "Check started failing"
            );
        } else {
            info!(
                event = "check_status_changed",
                instance = %self.instance_name,
                check_id = check_id,
                check_name = %check_name,
                old = ?old,
                new = ?new,
                "Check recovered"
            );
        }
    }

    pub fn log_service_status_changed(
        &self,
        service_id: ServiceId,
        service_name: &str,
        old: OverallStatus,
        new: OverallStatus,
        failing_checks: usize,
    ) {
        match new {
            OverallStatus::Passing => {
                info!(
                    event = "service_status_changed",
                    instance = %self.instance_name,
                    service_id = service_id,
                    service_name = %service_name,
                    old = %old,
                    new = %new,
                    failing_checks = failing_checks,
                    "Service back to passing"
                );
            }
            _ => {
                warn!(
                    event = "service_status_changed",
                    instance = %self.instance_name,
                    service_id = service_id,
                    service_name = %service_name,
                    old = %old,
                    new = %new,
                    failing_checks = failing_checks,
                    "Service status changed"
                );
            }
        }
    }

    pub fn log_alert_dispatched(&self, service_id: ServiceId, sink: &str) {
        info!(
            event = "alert_dispatched",
            instance = %self.instance_name,
            service_id = service_id,
            sink = %sink,
            "Alert delivered"
        );
    }

    pub fn log_alert_dispatch_failed(&self, service_id: ServiceId, sink: &str, error: &str) {
        warn!(
            event = "alert_dispatch_failed",
            instance = %self.instance_name,
            service_id = service_id,
            sink = %sink,
            error = %error,
            "Alert delivery failed, continuing with other sinks"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_metrics_creation() {
        let metrics = MonitorMetrics::new();
        let other = MonitorMetrics::new();

        metrics.observe_evaluation("http", true, 0.12);
        metrics.observe_evaluation("influxdb", false, 2.5);
        other.inc_overlap_skips();
        other.inc_evaluation_timeouts();
        metrics.set_checks_scheduled(4);
        metrics.set_services_failing(1);
        metrics.inc_alerts_dispatched();
        metrics.inc_dispatch_errors();
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("monitor-1");
        assert_eq!(logger.instance_name, "monitor-1");
        logger.log_check_status_changed(
            1,
            "ping",
            EffectiveStatus::Passing,
            EffectiveStatus::Failing,
        );
    }
}
