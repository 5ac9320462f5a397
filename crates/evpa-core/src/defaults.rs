//! Defaulting and validation of workload scaling objects

use crate::error::{Error, Result};
use crate::models::{
    EstimatorSpec, ResourceMetric, ScaleMode, ScalingPolicy, WorkloadScalingObject,
};
use crate::resource::{ResourceName, MIB};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

pub const DEFAULT_SCALE_UP_STAB_WINDOW_SECONDS: i32 = 150;
pub const DEFAULT_SCALE_DOWN_STAB_WINDOW_SECONDS: i32 = 43200;

/// Scale up when the recommended request exceeds this share of the current one
pub const DEFAULT_SCALE_UP_CPU_UTIL_PERCENTAGE: i32 = 95;
pub const DEFAULT_SCALE_UP_MEMORY_UTIL_PERCENTAGE: i32 = 95;

/// Scale down when the recommended request is below this share of the current one
pub const DEFAULT_SCALE_DOWN_CPU_UTIL_PERCENTAGE: i32 = 35;
pub const DEFAULT_SCALE_DOWN_MEMORY_UTIL_PERCENTAGE: i32 = 40;

/// Cool-down used when a policy carries no window of its own
pub const DEFAULT_STAB_WINDOW_SECONDS: i32 = 120;

/// CPU change (milli-cores) absorbed by tolerance smoothing
pub const DEFAULT_CPU_TOLERANCE_MILLI_CORES: i64 = 100;

/// Memory change (bytes) absorbed by tolerance smoothing
pub const DEFAULT_MEMORY_TOLERANCE_BYTES: i64 = 100 * MIB;

pub const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(60);

pub const CONDITION_TYPE_READY: &str = "Ready";

pub const PERCENTILE_ESTIMATOR: &str = "Percentile";
pub const OOM_ESTIMATOR: &str = "OOM";
pub const PROPORTIONAL_ESTIMATOR: &str = "Proportional";

pub fn default_controlled_resources() -> Vec<ResourceName> {
    vec![ResourceName::Cpu, ResourceName::Memory]
}

pub fn default_estimators() -> Vec<EstimatorSpec> {
    vec![
        EstimatorSpec::new(PERCENTILE_ESTIMATOR, 0),
        EstimatorSpec::new(OOM_ESTIMATOR, 0),
    ]
}

fn thresholds(cpu: i32, memory: i32) -> BTreeMap<ResourceName, ResourceMetric> {
    BTreeMap::from([
        (ResourceName::Cpu, ResourceMetric::utilization(cpu)),
        (ResourceName::Memory, ResourceMetric::utilization(memory)),
    ])
}

fn fill_policy(
    policy: &mut Option<ScalingPolicy>,
    window_seconds: i32,
    cpu_threshold: i32,
    memory_threshold: i32,
) {
    let policy = policy.get_or_insert_with(ScalingPolicy::default);
    policy.scale_mode.get_or_insert(ScaleMode::Auto);
    policy.stabilization_window_seconds.get_or_insert(window_seconds);
    policy
        .metric_thresholds
        .get_or_insert_with(|| thresholds(cpu_threshold, memory_threshold));
}

/// Inject default estimators, validate the spec and fill absent policy fields.
///
/// Estimator types must be unique once defaults are in. A returned error is
/// fatal to the reconciliation pass.
pub fn default_workload(obj: &mut WorkloadScalingObject) -> Result<()> {
    let estimators = obj
        .spec
        .resource_estimators
        .get_or_insert_with(Vec::new);
    for default in default_estimators() {
        if !estimators
            .iter()
            .any(|e| e.estimator_type == default.estimator_type)
        {
            estimators.push(default);
        }
    }

    if estimators.iter().any(|e| e.estimator_type.is_empty()) {
        return Err(Error::Validation(
            "estimator type cannot be empty".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    if let Some(duplicate) = estimators
        .iter()
        .find(|e| !seen.insert(e.estimator_type.as_str()))
    {
        return Err(Error::Validation(format!(
            "estimator type {:?} is listed more than once",
            duplicate.estimator_type
        )));
    }

    let policies = match obj.spec.resource_policy.as_mut() {
        Some(policy) if !policy.container_policies.is_empty() => &mut policy.container_policies,
        _ => {
            return Err(Error::Validation(
                "resource policy or container policy cannot be empty".to_string(),
            ))
        }
    };

    for policy in policies.iter_mut() {
        if policy.container_name.is_empty() {
            return Err(Error::Validation(
                "container name cannot be empty".to_string(),
            ));
        }

        fill_policy(
            &mut policy.scale_up_policy,
            DEFAULT_SCALE_UP_STAB_WINDOW_SECONDS,
            DEFAULT_SCALE_UP_CPU_UTIL_PERCENTAGE,
            DEFAULT_SCALE_UP_MEMORY_UTIL_PERCENTAGE,
        );
        fill_policy(
            &mut policy.scale_down_policy,
            DEFAULT_SCALE_DOWN_STAB_WINDOW_SECONDS,
            DEFAULT_SCALE_DOWN_CPU_UTIL_PERCENTAGE,
            DEFAULT_SCALE_DOWN_MEMORY_UTIL_PERCENTAGE,
        );
        policy
            .controlled_resources
            .get_or_insert_with(default_controlled_resources);
    }

    Ok(())
}
