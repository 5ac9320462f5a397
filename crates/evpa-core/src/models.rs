//! Core data models for the workload scaling object
//!
//! Metadata, conditions, the target reference and pod templates reuse the
//! Kubernetes API types from `k8s-openapi`.

use crate::error::Result;
use crate::resource::{requests_of, ResourceList, ResourceName};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use k8s_openapi::api::autoscaling::v1::CrossVersionObjectReference;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, ObjectMeta, Time};

/// The workload scaling custom resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadScalingObject {
    pub metadata: ObjectMeta,
    pub spec: WorkloadScalingSpec,
    #[serde(default)]
    pub status: WorkloadScalingStatus,
}

impl WorkloadScalingObject {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn uid(&self) -> &str {
        self.metadata.uid.as_deref().unwrap_or_default()
    }

    pub fn target_name(&self) -> &str {
        &self.spec.target_ref.name
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// `namespace/name` key used in log fields
    pub fn key(&self) -> ObjectKey<'_> {
        ObjectKey {
            namespace: self.namespace(),
            name: self.name(),
        }
    }

    pub fn container_policies(&self) -> &[ContainerPolicy] {
        self.spec
            .resource_policy
            .as_ref()
            .map(|p| p.container_policies.as_slice())
            .unwrap_or_default()
    }
}

/// Display helper rendering `namespace/name`
#[derive(Debug, Clone, Copy)]
pub struct ObjectKey<'a> {
    pub namespace: &'a str,
    pub name: &'a str,
}

impl fmt::Display for ObjectKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadScalingSpec {
    pub target_ref: CrossVersionObjectReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_estimators: Option<Vec<EstimatorSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_policy: Option<PodResourcePolicy>,
}

/// One requested estimator with its priority and free-form config
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EstimatorSpec {
    #[serde(rename = "type")]
    pub estimator_type: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

impl EstimatorSpec {
    pub fn new(estimator_type: impl Into<String>, priority: i32) -> Self {
        Self {
            estimator_type: estimator_type.into(),
            priority,
            config: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodResourcePolicy {
    #[serde(default)]
    pub container_policies: Vec<ContainerPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPolicy {
    pub container_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_up_policy: Option<ScalingPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_down_policy: Option<ScalingPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controlled_resources: Option<Vec<ResourceName>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleMode {
    #[default]
    Auto,
    Off,
}

/// Direction-specific scaling sub-policy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_mode: Option<ScaleMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stabilization_window_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_thresholds: Option<BTreeMap<ResourceName, ResourceMetric>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetric {
    /// Utilization percentage threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utilization: Option<i32>,
}

impl ResourceMetric {
    pub fn utilization(percent: i32) -> Self {
        Self {
            utilization: Some(percent),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadScalingStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<RecommendedPodResources>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub current_estimators: Vec<EstimatorStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedPodResources {
    #[serde(default)]
    pub container_recommendations: Vec<ContainerRecommendation>,
}

impl RecommendedPodResources {
    pub fn target_for(&self, container_name: &str) -> Option<&ResourceList> {
        self.container_recommendations
            .iter()
            .find(|r| r.container_name == container_name)
            .map(|r| &r.target)
    }

    /// Replace the target for a container, appending when absent
    pub fn upsert(&mut self, container_name: &str, target: ResourceList) {
        match self
            .container_recommendations
            .iter_mut()
            .find(|r| r.container_name == container_name)
        {
            Some(existing) => existing.target = target,
            None => self.container_recommendations.push(ContainerRecommendation {
                container_name: container_name.to_string(),
                target,
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecommendation {
    pub container_name: String,
    #[serde(default)]
    pub target: ResourceList,
}

/// Last output of one estimator type, read back by external estimators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimatorStatus {
    #[serde(rename = "type")]
    pub estimator_type: String,
    pub last_update_time: Time,
    #[serde(default)]
    pub recommendation: RecommendedPodResources,
}

/// Value of `Condition::status`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed requests of one container of a pod template.
///
/// `None` when the template has no container of that name.
pub fn container_requests(
    template: &PodTemplateSpec,
    container_name: &str,
) -> Option<Result<ResourceList>> {
    let container = template
        .spec
        .as_ref()?
        .containers
        .iter()
        .find(|c| c.name == container_name)?;
    Some(requests_of(container.resources.as_ref()))
}
