//! Health check infrastructure for the controller
//!
//! Tracks the estimators, the object store and the reconciliation loop for
//! the Kubernetes liveness and readiness checks. A component that keeps failing
//! goes from degraded to unhealthy. The outcome of the last pass of every
//! workload is kept alongside and reported with readiness.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Consecutive failures after which a component is reported unhealthy
pub const UNHEALTHY_AFTER_FAILURES: u32 = 3;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is functioning normally
    Healthy,
    /// Component failed recently but is still operational
    Degraded,
    /// Component keeps failing
    Unhealthy,
}

impl ComponentStatus {
    /// Returns true if the component is at least partially operational
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

/// Information about a component's health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub consecutive_failures: u32,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            consecutive_failures: 0,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    /// Health after one more failure on top of `previous_failures`
    pub fn failing(message: impl Into<String>, previous_failures: u32) -> Self {
        let consecutive_failures = previous_failures.saturating_add(1);
        let status = if consecutive_failures >= UNHEALTHY_AFTER_FAILURES {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Degraded
        };
        Self {
            status,
            message: Some(message.into()),
            consecutive_failures,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Unhealthy,
            message: Some(message.into()),
            consecutive_failures: UNHEALTHY_AFTER_FAILURES,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across components
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        let mut has_degraded = false;

        for health in components.values() {
            match health.status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => has_degraded = true,
                ComponentStatus::Healthy => {}
            }
        }

        if has_degraded {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }
}

/// Outcome of the last reconciliation pass of one workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadHealth {
    pub reconciled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub estimator_failures: usize,
    pub last_reconcile_timestamp: i64,
}

impl WorkloadHealth {
    pub fn reconciled(estimator_failures: usize) -> Self {
        Self {
            reconciled: true,
            message: None,
            estimator_failures,
            last_reconcile_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            reconciled: false,
            message: Some(message.into()),
            estimator_failures: 0,
            last_reconcile_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Last pass of every workload, keyed by `namespace/name`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub workloads: BTreeMap<String, WorkloadHealth>,
}

/// Component names for health tracking
pub mod components {
    pub const ESTIMATORS: &str = "estimators";
    pub const OBJECT_STORE: &str = "object_store";
    pub const RECONCILER: &str = "reconciler";

    pub const ALL: [&str; 3] = [ESTIMATORS, OBJECT_STORE, RECONCILER];
}

/// Health registry for tracking component health
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    workloads: Arc<RwLock<BTreeMap<String, WorkloadHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every controller component as healthy
    pub async fn register_all(&self) {
        let mut components = self.components.write().await;
        for name in components::ALL {
            components.insert(name.to_string(), ComponentHealth::healthy());
        }
    }

    /// Record the outcome of one operation of a component.
    ///
    /// Success resets the failure count; each failure moves the component
    /// towards unhealthy.
    pub async fn report(&self, name: &str, outcome: Result<(), String>) {
        let mut components = self.components.write().await;
        let health = match outcome {
            Ok(()) => ComponentHealth::healthy(),
            Err(message) => {
                let previous = components
                    .get(name)
                    .map(|h| h.consecutive_failures)
                    .unwrap_or(0);
                ComponentHealth::failing(message, previous)
            }
        };
        components.insert(name.to_string(), health);
    }

    /// Mark component as unhealthy regardless of its history
    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), ComponentHealth::unhealthy(message));
    }

    /// Record the last pass of a workload
    pub async fn record_workload(&self, key: impl Into<String>, health: WorkloadHealth) {
        self.workloads.write().await.insert(key.into(), health);
    }

    /// Drop a workload that no longer exists
    pub async fn forget_workload(&self, key: &str) {
        self.workloads.write().await.remove(key);
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Readiness plus the last pass of every workload. Failing workloads
    /// do not make the controller unready on their own.
    pub async fn readiness(&self) -> ReadinessResponse {
        let ready = *self.ready.read().await;
        let health = self.health().await;
        let workloads = self.workloads.read().await.clone();

        let (ready, reason) = if !ready {
            (false, Some("Controller not yet initialized".to_string()))
        } else if health.status == ComponentStatus::Unhealthy {
            (false, Some("Component unhealthy".to_string()))
        } else {
            (true, None)
        };

        ReadinessResponse {
            ready,
            reason,
            workloads,
        }
    }
}
