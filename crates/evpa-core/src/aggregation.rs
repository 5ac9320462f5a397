//! Ranking and aggregation of estimator outputs
//!
//! Estimators sharing a priority form a tier whose outputs are combined by
//! taking the larger quantity per resource. Tiers are then folded in
//! ascending priority, a later tier's non-zero value overriding earlier ones.

use crate::estimator::EstimatorInstance;
use crate::models::{EstimatorStatus, RecommendedPodResources, Time, WorkloadScalingObject};
use crate::observability::ControllerMetrics;
use crate::resource::{is_resource_list_empty, ResourceList};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Estimators sharing one priority value
#[derive(Debug, Clone)]
pub struct EstimatorTier {
    pub priority: i32,
    pub estimators: Vec<EstimatorInstance>,
}

/// Stable sort by ascending priority, then group equal priorities into tiers
pub fn rank_estimators(mut instances: Vec<EstimatorInstance>) -> Vec<EstimatorTier> {
    instances.sort_by_key(EstimatorInstance::priority);

    let mut tiers: Vec<EstimatorTier> = Vec::new();
    for instance in instances {
        match tiers.last_mut() {
            Some(tier) if tier.priority == instance.priority() => tier.estimators.push(instance),
            _ => tiers.push(EstimatorTier {
                priority: instance.priority(),
                estimators: vec![instance],
            }),
        }
    }
    tiers
}

/// Merge `estimated` into `combined`, keeping the larger quantity per resource
pub fn calculate_resource_by_value(combined: &mut ResourceList, estimated: &ResourceList) {
    for (name, quantity) in estimated {
        combined
            .entry(name.clone())
            .and_modify(|current| {
                if quantity > current {
                    *current = *quantity;
                }
            })
            .or_insert(*quantity);
    }
}

/// Fold tier results in order; a later non-zero value overwrites an earlier one
pub fn calculate_resource_by_priority(tiers: &[ResourceList]) -> ResourceList {
    let mut result = ResourceList::new();
    for tier in tiers {
        for (name, quantity) in tier {
            if !quantity.is_zero() {
                result.insert(name.clone(), *quantity);
            }
        }
    }
    result
}

/// Replace the entry for the estimator type, creating it when absent
pub fn update_estimator_status(
    statuses: &mut Vec<EstimatorStatus>,
    estimator_type: &str,
    container_name: &str,
    target: ResourceList,
    now: DateTime<Utc>,
) {
    match statuses
        .iter_mut()
        .find(|s| s.estimator_type == estimator_type)
    {
        Some(status) => {
            status.last_update_time = Time(now);
            status.recommendation.upsert(container_name, target);
        }
        None => {
            let mut recommendation = RecommendedPodResources::default();
            recommendation.upsert(container_name, target);
            statuses.push(EstimatorStatus {
                estimator_type: estimator_type.to_string(),
                last_update_time: Time(now),
                recommendation,
            });
        }
    }
}

/// Aggregated candidate for one container
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerEstimate {
    pub resources: ResourceList,
    /// Estimators that returned an error for this container
    pub failures: usize,
}

/// Run every tier against one container and aggregate the results.
///
/// Failing or silent estimators are skipped. Each non-empty output is
/// recorded into `statuses` whether or not it wins the aggregation.
pub async fn estimate_container(
    obj: &WorkloadScalingObject,
    tiers: &[EstimatorTier],
    container_name: &str,
    requests: &ResourceList,
    now: DateTime<Utc>,
    statuses: &mut Vec<EstimatorStatus>,
    metrics: &ControllerMetrics,
) -> ContainerEstimate {
    let mut by_priority = Vec::with_capacity(tiers.len());
    let mut failures = 0;

    for tier in tiers {
        let mut combined = ResourceList::new();
        for instance in &tier.estimators {
            let estimator_type = &instance.spec().estimator_type;
            let estimated = match instance.estimate(obj, container_name, requests).await {
                Ok(estimated) => estimated,
                Err(e) => {
                    warn!(
                        workload = %obj.key(),
                        container = %container_name,
                        estimator = %estimator_type,
                        config = ?instance.spec().config,
                        error = %e,
                        "Estimator failed"
                    );
                    metrics.inc_estimator_errors(estimator_type);
                    failures += 1;
                    continue;
                }
            };

            if is_resource_list_empty(&estimated) {
                debug!(
                    container = %container_name,
                    estimator = %estimator_type,
                    "Estimator returned no recommendation"
                );
                continue;
            }

            debug!(
                container = %container_name,
                estimator = %estimator_type,
                priority = tier.priority,
                estimated = ?estimated,
                "Estimated resources"
            );
            calculate_resource_by_value(&mut combined, &estimated);
            update_estimator_status(statuses, estimator_type, container_name, estimated, now);
        }

        if !is_resource_list_empty(&combined) {
            by_priority.push(combined);
        }
    }

    ContainerEstimate {
        resources: calculate_resource_by_priority(&by_priority),
        failures,
    }
}
