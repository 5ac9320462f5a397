//! Scaling decisions
//!
//! A candidate recommendation is applied in at most one direction per pass.
//! Each direction is gated by its own mode, a cool-down window tracked per
//! (namespace, workload, container, direction), and utilization thresholds.

use crate::defaults::{
    DEFAULT_CPU_TOLERANCE_MILLI_CORES, DEFAULT_MEMORY_TOLERANCE_BYTES, DEFAULT_STAB_WINDOW_SECONDS,
};
use crate::error::{Error, Result};
use crate::models::{ContainerPolicy, ScaleMode, ScalingPolicy, WorkloadScalingObject};
use crate::resource::{is_resource_equal, ResourceList, ResourceListExt, ResourceName};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScaleDirection {
    ScaleUp,
    ScaleDown,
}

impl ScaleDirection {
    /// Evaluation order within one pass
    pub const ALL: [ScaleDirection; 2] = [ScaleDirection::ScaleUp, ScaleDirection::ScaleDown];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScaleDirection::ScaleUp => "ScaleUp",
            ScaleDirection::ScaleDown => "ScaleDown",
        }
    }

    /// The sub-policy of `policy` that governs this direction
    pub fn policy<'a>(&self, policy: &'a ContainerPolicy) -> Option<&'a ScalingPolicy> {
        match self {
            ScaleDirection::ScaleUp => policy.scale_up_policy.as_ref(),
            ScaleDirection::ScaleDown => policy.scale_down_policy.as_ref(),
        }
    }
}

impl fmt::Display for ScaleDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScaleEventKey {
    pub namespace: String,
    pub workload: String,
    pub container: String,
    pub direction: ScaleDirection,
}

impl ScaleEventKey {
    pub fn new(obj: &WorkloadScalingObject, container: &str, direction: ScaleDirection) -> Self {
        Self {
            namespace: obj.namespace().to_string(),
            workload: obj.target_name().to_string(),
            container: container.to_string(),
            direction,
        }
    }
}

impl fmt::Display for ScaleEventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.namespace, self.workload, self.container, self.direction
        )
    }
}

/// Last applied scale time per key.
///
/// Process-local: a restart resets every cool-down.
#[derive(Debug, Default)]
pub struct ScaleEventTable {
    events: Mutex<HashMap<ScaleEventKey, DateTime<Utc>>>,
}

impl ScaleEventTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_scale_time(&self, key: &ScaleEventKey) -> Option<DateTime<Utc>> {
        self.events.lock().unwrap().get(key).copied()
    }

    pub fn record(&self, key: ScaleEventKey, at: DateTime<Utc>) {
        self.events.lock().unwrap().insert(key, at);
    }

    /// Drop both directions of every container policy of the workload
    pub fn purge(&self, obj: &WorkloadScalingObject) {
        let mut events = self.events.lock().unwrap();
        for policy in obj.container_policies() {
            for direction in ScaleDirection::ALL {
                events.remove(&ScaleEventKey::new(obj, &policy.container_name, direction));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Why a direction was not applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Suppression {
    Unchanged,
    ScalingDisabled,
    InStabilizationWindow,
    Ratio(String),
    Threshold {
        resource: ResourceName,
        threshold: i32,
        usage: i64,
    },
}

impl fmt::Display for Suppression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Suppression::Unchanged => f.write_str("Container resource has not changed"),
            Suppression::ScalingDisabled => f.write_str("Scaling disabled"),
            Suppression::InStabilizationWindow => f.write_str("In stabilization window"),
            Suppression::Ratio(reason) => f.write_str(reason),
            Suppression::Threshold {
                resource,
                threshold,
                usage,
            } => write!(
                f,
                "Resource {} not reach Thresholds {}, usage {}",
                resource, threshold, usage
            ),
        }
    }
}

/// `candidate * 100 / current` on milli values
pub fn resource_used_ratio(
    current: &ResourceList,
    candidate: &ResourceList,
    resource: &ResourceName,
) -> Result<i64> {
    let old = current.quantity(resource).milli_value();
    let new = candidate.quantity(resource).milli_value();
    if old == 0 || new == 0 {
        return Err(Error::ZeroResource(resource.clone()));
    }
    Ok((i128::from(new) * 100 / i128::from(old)) as i64)
}

/// Gate one direction for one container.
///
/// An absent sub-policy behaves like an empty one: mode `Auto`, default
/// window, no thresholds.
pub fn check_scaling_condition(
    policy: Option<&ScalingPolicy>,
    direction: ScaleDirection,
    current: &ResourceList,
    candidate: &ResourceList,
    last_scale_time: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> std::result::Result<(), Suppression> {
    if is_resource_equal(current, candidate) {
        return Err(Suppression::Unchanged);
    }

    let default_policy = ScalingPolicy::default();
    let policy = policy.unwrap_or(&default_policy);

    if policy.scale_mode == Some(ScaleMode::Off) {
        return Err(Suppression::ScalingDisabled);
    }

    let window = policy
        .stabilization_window_seconds
        .unwrap_or(DEFAULT_STAB_WINDOW_SECONDS);
    if let Some(last) = last_scale_time {
        if now - last <= Duration::seconds(i64::from(window)) {
            return Err(Suppression::InStabilizationWindow);
        }
    }

    for (resource, metric) in policy.metric_thresholds.iter().flatten() {
        let Some(threshold) = metric.utilization else {
            continue;
        };
        let usage = resource_used_ratio(current, candidate, resource)
            .map_err(|e| Suppression::Ratio(e.to_string()))?;

        let blocked = match direction {
            ScaleDirection::ScaleUp => usage <= i64::from(threshold),
            ScaleDirection::ScaleDown => usage >= i64::from(threshold),
        };
        if blocked {
            return Err(Suppression::Threshold {
                resource: resource.clone(),
                threshold,
                usage,
            });
        }
    }

    Ok(())
}

/// Smoothing margin in milli-units; unknown resources must match exactly
pub fn tolerance(resource: &ResourceName) -> u64 {
    match resource {
        ResourceName::Cpu => DEFAULT_CPU_TOLERANCE_MILLI_CORES as u64,
        ResourceName::Memory => DEFAULT_MEMORY_TOLERANCE_BYTES as u64 * 1000,
        ResourceName::Other(_) => 0,
    }
}

/// Merge an applied candidate into the stored target.
///
/// A resource within tolerance of the stored value keeps the stored value.
/// Stored resources the candidate is silent on are kept.
pub fn merge_with_tolerance(stored: Option<&ResourceList>, candidate: &ResourceList) -> ResourceList {
    let mut merged = stored.cloned().unwrap_or_default();
    for (resource, quantity) in candidate {
        match merged.get(resource) {
            Some(previous) if previous.abs_diff(quantity) <= tolerance(resource) => {}
            _ => {
                merged.insert(resource.clone(), *quantity);
            }
        }
    }
    merged
}
