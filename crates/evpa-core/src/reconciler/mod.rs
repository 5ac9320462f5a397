//! Reconciliation pass for one workload scaling object
//!
//! The [`Reconciler`] is the context object shared by every pass: it owns
//! the estimator registry and the scale-event table. A pass defaults and
//! validates the object, runs estimators for every container policy, gates
//! each candidate through the decision engine and writes back the status.

use crate::aggregation::{estimate_container, rank_estimators, EstimatorTier};
use crate::decision::{
    check_scaling_condition, merge_with_tolerance, ScaleDirection, ScaleEventKey, ScaleEventTable,
};
use crate::defaults::{default_workload, CONDITION_TYPE_READY, DEFAULT_RESYNC_PERIOD};
use crate::error::{Error, Result};
use crate::estimator::{EstimatorInstance, EstimatorRegistry};
use crate::models::{
    container_requests, Condition, ConditionStatus, ContainerPolicy, EstimatorStatus,
    RecommendedPodResources, Time, WorkloadScalingObject, WorkloadScalingStatus,
};
use crate::observability::{ControllerMetrics, StructuredLogger};
use crate::resource::{is_resource_list_empty, ResourceList};
use crate::store::{EventType, ObjectStore};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[cfg(test)]
mod tests;

pub const REASON_FAILED_VALIDATION: &str = "FailedValidation";
pub const REASON_FAILED_GET_POD_TEMPLATE: &str = "FailedGetPodTemplate";
pub const REASON_FAILED_UPDATE_STATUS: &str = "FailedUpdateStatus";
pub const REASON_READY: &str = "EffectiveVerticalPodAutoscaler";

/// What the driver should do after a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The object is being deleted and its state was released
    Deleted,
    /// Run again after `after`. Estimator failures do not fail the pass and
    /// are only counted here.
    Requeue {
        after: Duration,
        estimator_failures: usize,
    },
}

/// Everything one run over the container policies produced
#[derive(Debug, Clone, Default)]
pub struct PolicyOutcome {
    pub current_estimators: Vec<EstimatorStatus>,
    pub recommendation: RecommendedPodResources,
    pub estimator_failures: usize,
}

/// Update the condition of the given type in place, or append it.
///
/// The transition time only moves when the condition status changes.
pub fn set_condition(
    status: &mut WorkloadScalingStatus,
    condition_type: &str,
    condition_status: ConditionStatus,
    reason: &str,
    message: &str,
    now: DateTime<Utc>,
) {
    match status
        .conditions
        .iter_mut()
        .find(|c| c.type_ == condition_type)
    {
        Some(condition) => {
            if condition.status != condition_status.as_str() {
                condition.last_transition_time = Time(now);
            }
            condition.status = condition_status.to_string();
            condition.reason = reason.to_string();
            condition.message = message.to_string();
        }
        None => status.conditions.push(Condition {
            type_: condition_type.to_string(),
            status: condition_status.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: Time(now),
            observed_generation: None,
        }),
    }
}

pub struct Reconciler {
    registry: EstimatorRegistry,
    scale_events: ScaleEventTable,
    metrics: ControllerMetrics,
    logger: StructuredLogger,
    resync_period: Duration,
}

impl Reconciler {
    pub fn new(registry: EstimatorRegistry, logger: StructuredLogger) -> Self {
        Self {
            registry,
            scale_events: ScaleEventTable::new(),
            metrics: ControllerMetrics::new(),
            logger,
            resync_period: DEFAULT_RESYNC_PERIOD,
        }
    }

    pub fn with_resync_period(mut self, resync_period: Duration) -> Self {
        self.resync_period = resync_period;
        self
    }

    pub fn registry(&self) -> &EstimatorRegistry {
        &self.registry
    }

    pub fn scale_events(&self) -> &ScaleEventTable {
        &self.scale_events
    }

    /// Run one pass. `obj` is defaulted in place and carries the written
    /// status afterwards.
    pub async fn reconcile(
        &self,
        obj: &mut WorkloadScalingObject,
        store: &dyn ObjectStore,
    ) -> Result<ReconcileOutcome> {
        let started = Instant::now();
        let result = self.reconcile_inner(obj, store).await;
        self.metrics
            .observe_reconcile_latency(started.elapsed().as_secs_f64());
        if result.is_err() {
            self.metrics.inc_reconcile_errors();
        }
        result
    }

    async fn reconcile_inner(
        &self,
        obj: &mut WorkloadScalingObject,
        store: &dyn ObjectStore,
    ) -> Result<ReconcileOutcome> {
        debug!(workload = %obj.key(), "Reconciling workload");
        let mut new_status = obj.status.clone();

        if let Err(e) = default_workload(obj) {
            let message = format!("Validation failed for {}: {}", obj.key(), e);
            self.fail(obj, store, new_status, REASON_FAILED_VALIDATION, &message, &e)
                .await;
            return Err(e);
        }

        let instances = self.registry.resolve(obj);

        if obj.is_deleting() {
            self.registry.release(obj).await;
            self.scale_events.purge(obj);
            info!(workload = %obj.key(), "Released estimators and scale events");
            return Ok(ReconcileOutcome::Deleted);
        }

        let pod_template = match store.pod_template(obj).await {
            Ok(template) => template,
            Err(e) => {
                let e = Error::Store(e);
                self.fail(
                    obj,
                    store,
                    new_status,
                    REASON_FAILED_GET_POD_TEMPLATE,
                    "Failed to get pod template",
                    &e,
                )
                .await;
                return Err(e);
            }
        };

        let outcome = self
            .reconcile_container_policies(obj, &pod_template, instances)
            .await;
        new_status.recommendation = Some(outcome.recommendation);
        new_status.current_estimators = outcome.current_estimators;

        self.publish_metrics(obj, &new_status, &pod_template);
        set_condition(
            &mut new_status,
            CONDITION_TYPE_READY,
            ConditionStatus::True,
            REASON_READY,
            "EffectiveVerticalPodAutoscaler is ready",
            Utc::now(),
        );
        self.update_status(obj, store, new_status).await?;

        Ok(ReconcileOutcome::Requeue {
            after: self.resync_period,
            estimator_failures: outcome.estimator_failures,
        })
    }

    /// Estimate, gate and merge every container policy.
    ///
    /// Starts from the stored recommendation and estimator statuses so that
    /// suppressed containers keep their last applied target.
    pub async fn reconcile_container_policies(
        &self,
        obj: &WorkloadScalingObject,
        pod_template: &PodTemplateSpec,
        instances: Vec<EstimatorInstance>,
    ) -> PolicyOutcome {
        let tiers: Vec<EstimatorTier> = rank_estimators(instances);
        let now = Utc::now();

        let mut current_estimators = obj.status.current_estimators.clone();
        let mut estimator_failures = 0;
        let mut recommendation = obj.status.recommendation.clone().unwrap_or_default();
        recommendation.container_recommendations.retain(|r| {
            obj.container_policies()
                .iter()
                .any(|p| p.container_name == r.container_name)
        });

        for policy in obj.container_policies() {
            let container = policy.container_name.as_str();
            let requests = match container_requests(pod_template, container) {
                Some(Ok(requests)) => requests,
                Some(Err(e)) => {
                    warn!(
                        workload = %obj.key(),
                        container = %container,
                        error = %e,
                        "Invalid container resource requirement"
                    );
                    continue;
                }
                None => {
                    warn!(
                        workload = %obj.key(),
                        container = %container,
                        "Container resource requirement not found in pod template"
                    );
                    continue;
                }
            };

            let estimate = estimate_container(
                obj,
                &tiers,
                container,
                &requests,
                now,
                &mut current_estimators,
                &self.metrics,
            )
            .await;
            estimator_failures += estimate.failures;

            let mut candidate = estimate.resources;
            if let Some(controlled) = &policy.controlled_resources {
                candidate.retain(|name, _| controlled.contains(name));
            }
            if is_resource_list_empty(&candidate) {
                debug!(
                    workload = %obj.key(),
                    container = %container,
                    "Recommended resource is empty, skip scaling"
                );
                continue;
            }

            let Some(direction) = self.decide(obj, policy, &requests, &candidate, now)
            else {
                continue;
            };

            self.scale_events
                .record(ScaleEventKey::new(obj, container, direction), now);
            let merged = merge_with_tolerance(recommendation.target_for(container), &candidate);
            self.logger
                .log_scaling_applied(obj, container, direction, &merged);
            recommendation.upsert(container, merged);
        }

        PolicyOutcome {
            current_estimators,
            recommendation,
            estimator_failures,
        }
    }

    /// First direction whose gate passes, scale-up before scale-down
    fn decide(
        &self,
        obj: &WorkloadScalingObject,
        policy: &ContainerPolicy,
        requests: &ResourceList,
        candidate: &ResourceList,
        now: DateTime<Utc>,
    ) -> Option<ScaleDirection> {
        for direction in ScaleDirection::ALL {
            let key = ScaleEventKey::new(obj, &policy.container_name, direction);
            match check_scaling_condition(
                direction.policy(policy),
                direction,
                requests,
                candidate,
                self.scale_events.last_scale_time(&key),
                now,
            ) {
                Ok(()) => return Some(direction),
                Err(suppression) => self.logger.log_scaling_suppressed(
                    obj,
                    &policy.container_name,
                    direction,
                    &suppression.to_string(),
                ),
            }
        }
        None
    }

    fn publish_metrics(
        &self,
        obj: &WorkloadScalingObject,
        status: &WorkloadScalingStatus,
        pod_template: &PodTemplateSpec,
    ) {
        let Some(recommendation) = &status.recommendation else {
            return;
        };
        for container in &recommendation.container_recommendations {
            let Some(Ok(requests)) = container_requests(pod_template, &container.container_name)
            else {
                warn!(
                    workload = %obj.key(),
                    container = %container.container_name,
                    "Container requests not found in pod template"
                );
                continue;
            };
            self.metrics
                .record_recommendation(obj, &container.container_name, &container.target);
            self.metrics.record_scale_gap(
                obj,
                &container.container_name,
                &requests,
                &container.target,
            );
        }
    }

    /// Report a failed pass through an event, the Ready condition and the status
    async fn fail(
        &self,
        obj: &mut WorkloadScalingObject,
        store: &dyn ObjectStore,
        mut new_status: WorkloadScalingStatus,
        reason: &str,
        message: &str,
        err: &Error,
    ) {
        self.logger
            .log_reconcile_failure(obj, reason, &err.to_string());
        store
            .record_event(obj, EventType::Warning, reason, &err.to_string())
            .await;
        set_condition(
            &mut new_status,
            CONDITION_TYPE_READY,
            ConditionStatus::False,
            reason,
            message,
            Utc::now(),
        );
        // The caller reports `err`, not a failed status write.
        let _ = self.update_status(obj, store, new_status).await;
    }

    /// Persist `new_status` when it differs from the stored one
    async fn update_status(
        &self,
        obj: &mut WorkloadScalingObject,
        store: &dyn ObjectStore,
        new_status: WorkloadScalingStatus,
    ) -> Result<()> {
        if obj.status == new_status {
            debug!(workload = %obj.key(), "Status unchanged");
            return Ok(());
        }

        obj.status = new_status;
        if let Err(e) = store.update_status(obj, &obj.status).await {
            error!(workload = %obj.key(), error = %e, "Failed to update status");
            store
                .record_event(
                    obj,
                    EventType::Warning,
                    REASON_FAILED_UPDATE_STATUS,
                    &format!("{e:#}"),
                )
                .await;
            return Err(Error::Store(e));
        }

        info!(workload = %obj.key(), "Updated status");
        Ok(())
    }
}
