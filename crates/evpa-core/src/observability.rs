//! Observability infrastructure for the controller
//!
//! Provides:
//! - Prometheus metrics (recommendations, scale gaps, estimator errors, reconcile latency)
//! - Structured JSON logging of scaling decisions with tracing

use crate::decision::ScaleDirection;
use crate::models::WorkloadScalingObject;
use crate::resource::{ResourceList, ResourceListExt, ResourceName};
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    Encoder, GaugeVec, Histogram, IntCounter, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for reconcile latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

const WORKLOAD_LABELS: &[&str] = &["namespace", "owner_kind", "owner_name", "container", "resource"];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ControllerMetricsInner> = OnceLock::new();

struct ControllerMetricsInner {
    resource_recommendation: GaugeVec,
    cpu_scale_up: GaugeVec,
    cpu_scale_down: GaugeVec,
    memory_scale_up: GaugeVec,
    memory_scale_down: GaugeVec,
    estimator_errors: IntCounterVec,
    reconcile_latency_seconds: Histogram,
    reconcile_errors: IntCounter,
}

impl ControllerMetricsInner {
    fn new() -> Self {
        Self {
            resource_recommendation: register_gauge_vec!(
                "evpa_resource_recommendation",
                "Recommended resources per container, cores for cpu and bytes for memory",
                WORKLOAD_LABELS
            )
            .expect("Failed to register resource_recommendation"),

            cpu_scale_up: register_gauge_vec!(
                "evpa_cpu_scale_up",
                "Cores the recommendation adds over the current cpu request",
                WORKLOAD_LABELS
            )
            .expect("Failed to register cpu_scale_up"),

            cpu_scale_down: register_gauge_vec!(
                "evpa_cpu_scale_down",
                "Cores the recommendation removes from the current cpu request",
                WORKLOAD_LABELS
            )
            .expect("Failed to register cpu_scale_down"),

            memory_scale_up: register_gauge_vec!(
                "evpa_memory_scale_up",
                "Bytes the recommendation adds over the current memory request",
                WORKLOAD_LABELS
            )
            .expect("Failed to register memory_scale_up"),

            memory_scale_down: register_gauge_vec!(
                "evpa_memory_scale_down",
                "Bytes the recommendation removes from the current memory request",
                WORKLOAD_LABELS
            )
            .expect("Failed to register memory_scale_down"),

            estimator_errors: register_int_counter_vec!(
                "evpa_estimator_errors_total",
                "Total number of failed estimations",
                &["estimator"]
            )
            .expect("Failed to register estimator_errors"),

            reconcile_latency_seconds: register_histogram!(
                "evpa_reconcile_latency_seconds",
                "Time spent in one reconciliation pass",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register reconcile_latency_seconds"),

            reconcile_errors: register_int_counter!(
                "evpa_reconcile_errors_total",
                "Total number of failed reconciliation passes"
            )
            .expect("Failed to register reconcile_errors"),
        }
    }
}

/// Controller metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ControllerMetrics {
    _private: (),
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn labels<'a>(
    obj: &'a WorkloadScalingObject,
    container: &'a str,
    resource: &'a str,
) -> [&'a str; 5] {
    [
        obj.namespace(),
        obj.spec.target_ref.kind.as_str(),
        obj.target_name(),
        container,
        resource,
    ]
}

impl ControllerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ControllerMetricsInner {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new)
    }

    /// Prometheus text exposition of the default registry
    pub fn encode_text(&self) -> prometheus::Result<Vec<u8>> {
        self.inner();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(buffer)
    }

    /// Publish the recommended cpu (cores) and memory (bytes) of a container
    pub fn record_recommendation(
        &self,
        obj: &WorkloadScalingObject,
        container: &str,
        target: &ResourceList,
    ) {
        for (resource, quantity) in target {
            let value = match resource {
                ResourceName::Cpu => quantity.milli_value() as f64 / 1000.0,
                ResourceName::Memory => quantity.value() as f64,
                ResourceName::Other(_) => continue,
            };
            self.inner()
                .resource_recommendation
                .with_label_values(&labels(obj, container, resource.as_str()))
                .set(value);
        }
    }

    /// Publish how far the recommendation is from the current requests
    pub fn record_scale_gap(
        &self,
        obj: &WorkloadScalingObject,
        container: &str,
        requests: &ResourceList,
        target: &ResourceList,
    ) {
        let inner = self.inner();

        let (current, recommended) = (requests.cpu(), target.cpu());
        let cpu_labels = labels(obj, container, "cpu");
        if current > recommended {
            let gap = current.milli_value() - recommended.milli_value();
            inner
                .cpu_scale_down
                .with_label_values(&cpu_labels)
                .set(gap as f64 / 1000.0);
        } else if current < recommended {
            let gap = recommended.milli_value() - current.milli_value();
            inner
                .cpu_scale_up
                .with_label_values(&cpu_labels)
                .set(gap as f64 / 1000.0);
        }

        let (current, recommended) = (requests.memory(), target.memory());
        let memory_labels = labels(obj, container, "memory");
        if current > recommended {
            inner
                .memory_scale_down
                .with_label_values(&memory_labels)
                .set((current.value() - recommended.value()) as f64);
        } else if current < recommended {
            inner
                .memory_scale_up
                .with_label_values(&memory_labels)
                .set((recommended.value() - current.value()) as f64);
        }
    }

    pub fn inc_estimator_errors(&self, estimator_type: &str) {
        self.inner()
            .estimator_errors
            .with_label_values(&[estimator_type])
            .inc();
    }

    pub fn observe_reconcile_latency(&self, duration_secs: f64) {
        self.inner().reconcile_latency_seconds.observe(duration_secs);
    }

    pub fn inc_reconcile_errors(&self) {
        self.inner().reconcile_errors.inc();
    }
}

/// Structured logger for controller events
///
/// Provides consistent JSON-formatted logging for scaling decisions and
/// the controller lifecycle.
#[derive(Clone)]
pub struct StructuredLogger {
    controller_name: String,
}

impl StructuredLogger {
    pub fn new(controller_name: impl Into<String>) -> Self {
        Self {
            controller_name: controller_name.into(),
        }
    }

    pub fn controller_name(&self) -> &str {
        &self.controller_name
    }

    /// Log an applied scaling decision
    pub fn log_scaling_applied(
        &self,
        obj: &WorkloadScalingObject,
        container: &str,
        direction: ScaleDirection,
        target: &ResourceList,
    ) {
        info!(
            event = "scaling_applied",
            controller = %self.controller_name,
            workload = %obj.key(),
            target = %obj.target_name(),
            container = %container,
            direction = %direction,
            cpu_millicores = target.cpu().milli_value(),
            memory_bytes = target.memory().value(),
            "Applied resource recommendation"
        );
    }

    /// Log a direction that was not applied
    pub fn log_scaling_suppressed(
        &self,
        obj: &WorkloadScalingObject,
        container: &str,
        direction: ScaleDirection,
        reason: &str,
    ) {
        info!(
            event = "scaling_suppressed",
            controller = %self.controller_name,
            workload = %obj.key(),
            container = %container,
            direction = %direction,
            reason = %reason,
            "Should not scale container"
        );
    }

    /// Log a failed reconciliation pass
    pub fn log_reconcile_failure(&self, obj: &WorkloadScalingObject, reason: &str, error: &str) {
        warn!(
            event = "reconcile_failed",
            controller = %self.controller_name,
            workload = %obj.key(),
            reason = %reason,
            error = %error,
            "Reconciliation failed"
        );
    }

    /// Log controller startup
    pub fn log_startup(&self, version: &str, workloads: usize) {
        info!(
            event = "controller_started",
            controller = %self.controller_name,
            version = %version,
            workloads = workloads,
            "EVPA controller started"
        );
    }

    /// Log controller shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "controller_shutdown",
            controller = %self.controller_name,
            reason = %reason,
            "EVPA controller shutting down"
        );
    }
}
