//! Kubernetes object store seam
//!
//! The core never watches or lists objects. It reads the live pod template
//! of the target workload, writes back the status subresource and emits
//! events through this trait.

use crate::models::{WorkloadScalingObject, WorkloadScalingStatus};
use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Normal => write!(f, "Normal"),
            EventType::Warning => write!(f, "Warning"),
        }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Pod template of the workload referenced by `obj.spec.target_ref`
    async fn pod_template(&self, obj: &WorkloadScalingObject) -> Result<PodTemplateSpec>;

    /// Persist a new status for the object
    async fn update_status(
        &self,
        obj: &WorkloadScalingObject,
        status: &WorkloadScalingStatus,
    ) -> Result<()>;

    /// Emit an event against the object
    async fn record_event(
        &self,
        obj: &WorkloadScalingObject,
        event_type: EventType,
        reason: &str,
        message: &str,
    );
}
