//! Scenario tests for the reconciliation pass
//!
//! These run full passes against an in-memory object store, a static
//! predictor and an in-memory OOM recorder.

use super::*;
use crate::decision::ScaleDirection;
use crate::models::{
    EstimatorSpec, PodResourcePolicy, ResourceMetric, ScaleMode, ScalingPolicy,
};
use crate::oom::{InMemoryOomRecorder, OomRecord};
use crate::predictor::{MetricSelector, StaticPredictor};
use crate::resource::{MilliQuantity, ResourceListExt, ResourceName, GIB, MIB};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, PodSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Pod templates keyed by target workload name
#[derive(Default)]
struct MemoryStore {
    templates: BTreeMap<String, PodTemplateSpec>,
    statuses: Mutex<Vec<WorkloadScalingStatus>>,
    events: Mutex<Vec<(EventType, String, String)>>,
}

impl MemoryStore {
    fn with_template(template: PodTemplateSpec) -> Self {
        Self::default().and_target("web", template)
    }

    fn and_target(mut self, target_name: &str, template: PodTemplateSpec) -> Self {
        self.templates.insert(target_name.to_string(), template);
        self
    }

    fn writes(&self) -> usize {
        self.statuses.lock().unwrap().len()
    }

    fn event_reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, reason, _)| reason.clone())
            .collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn pod_template(&self, obj: &WorkloadScalingObject) -> anyhow::Result<PodTemplateSpec> {
        self.templates
            .get(obj.target_name())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("deployments {:?} not found", obj.target_name()))
    }

    async fn update_status(
        &self,
        _obj: &WorkloadScalingObject,
        status: &WorkloadScalingStatus,
    ) -> anyhow::Result<()> {
        self.statuses.lock().unwrap().push(status.clone());
        Ok(())
    }

    async fn record_event(
        &self,
        _obj: &WorkloadScalingObject,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) {
        self.events
            .lock()
            .unwrap()
            .push((event_type, reason.to_string(), message.to_string()));
    }
}

struct Fixture {
    reconciler: Reconciler,
    predictor: Arc<StaticPredictor>,
    oom: Arc<InMemoryOomRecorder>,
}

impl Fixture {
    fn new() -> Self {
        let predictor = Arc::new(StaticPredictor::new());
        let oom = Arc::new(InMemoryOomRecorder::new());
        let registry = EstimatorRegistry::new(predictor.clone(), oom.clone());
        Self {
            reconciler: Reconciler::new(registry, StructuredLogger::new("test")),
            predictor,
            oom,
        }
    }

    fn predict(&self, resource: ResourceName, value: f64) {
        self.predict_for("web", resource, value);
    }

    fn predict_for(&self, target_name: &str, resource: ResourceName, value: f64) {
        self.predictor.set_prediction(
            &MetricSelector::container(resource, "default", target_name, "app"),
            value,
        );
    }
}

fn requests(cpu_millis: i64, memory: i64) -> ResourceList {
    ResourceList::from([
        (ResourceName::Cpu, MilliQuantity::from_millis(cpu_millis)),
        (ResourceName::Memory, MilliQuantity::from_value(memory)),
    ])
}

fn template(cpu_millis: i64, memory: i64) -> PodTemplateSpec {
    let requests = requests(cpu_millis, memory)
        .into_iter()
        .map(|(name, quantity)| (name.to_string(), Quantity::from(quantity)))
        .collect();
    PodTemplateSpec {
        metadata: None,
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "app".into(),
                resources: Some(ResourceRequirements {
                    requests: Some(requests),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        }),
    }
}

fn workload(estimators: Vec<EstimatorSpec>, policy: ContainerPolicy) -> WorkloadScalingObject {
    workload_for("web", "uid-1", estimators, policy)
}

/// Workload `<target>-evpa` in `default` scaling the deployment `target_name`
fn workload_for(
    target_name: &str,
    uid: &str,
    estimators: Vec<EstimatorSpec>,
    policy: ContainerPolicy,
) -> WorkloadScalingObject {
    let mut obj = WorkloadScalingObject::default();
    obj.metadata.namespace = Some("default".into());
    obj.metadata.name = Some(format!("{target_name}-evpa"));
    obj.metadata.uid = Some(uid.into());
    obj.spec.target_ref.kind = "Deployment".into();
    obj.spec.target_ref.name = target_name.into();
    obj.spec.resource_estimators = Some(estimators);
    obj.spec.resource_policy = Some(PodResourcePolicy {
        container_policies: vec![policy],
    });
    obj
}

fn app_policy() -> ContainerPolicy {
    ContainerPolicy {
        container_name: "app".into(),
        ..Default::default()
    }
}

/// Scale-up gated only by mode and window
fn unthresholded_policy() -> ContainerPolicy {
    ContainerPolicy {
        container_name: "app".into(),
        scale_up_policy: Some(ScalingPolicy {
            metric_thresholds: Some(BTreeMap::new()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn target(obj: &WorkloadScalingObject) -> Option<ResourceList> {
    obj.status
        .recommendation
        .as_ref()
        .and_then(|r| r.target_for("app"))
        .cloned()
}

fn up_key(obj: &WorkloadScalingObject) -> ScaleEventKey {
    ScaleEventKey::new(obj, "app", ScaleDirection::ScaleUp)
}

#[tokio::test]
async fn test_scale_up_applied_and_status_written() {
    let fixture = Fixture::new();
    fixture.predict(ResourceName::Cpu, 2.0);
    fixture.predict(ResourceName::Memory, (2 * GIB) as f64);
    let store = MemoryStore::with_template(template(1000, GIB));
    let mut obj = workload(vec![EstimatorSpec::new("Percentile", 0)], app_policy());

    let outcome = fixture.reconciler.reconcile(&mut obj, &store).await.unwrap();

    assert_eq!(
        outcome,
        ReconcileOutcome::Requeue {
            after: DEFAULT_RESYNC_PERIOD,
            estimator_failures: 0,
        }
    );
    assert_eq!(target(&obj), Some(requests(2000, 2 * GIB)));
    assert!(fixture
        .reconciler
        .scale_events()
        .last_scale_time(&up_key(&obj))
        .is_some());
    assert_eq!(store.writes(), 1);

    let ready = &obj.status.conditions[0];
    assert_eq!(ready.type_, CONDITION_TYPE_READY);
    assert_eq!(ready.status, "True");
    assert_eq!(ready.reason, REASON_READY);
}

#[tokio::test]
async fn test_defaults_injected_and_recorded_in_status() {
    let fixture = Fixture::new();
    fixture.predict(ResourceName::Cpu, 2.0);
    fixture.predict(ResourceName::Memory, (2 * GIB) as f64);
    let store = MemoryStore::with_template(template(1000, GIB));
    let mut obj = workload(Vec::new(), app_policy());
    obj.spec.resource_estimators = None;

    fixture.reconciler.reconcile(&mut obj, &store).await.unwrap();

    let types: Vec<&str> = obj
        .spec
        .resource_estimators
        .iter()
        .flatten()
        .map(|e| e.estimator_type.as_str())
        .collect();
    assert_eq!(types, vec!["Percentile", "OOM"]);

    // OOM has no records, so only Percentile shows up in the audit trail
    assert_eq!(obj.status.current_estimators.len(), 1);
    assert_eq!(obj.status.current_estimators[0].estimator_type, "Percentile");
}

#[tokio::test]
async fn test_higher_tier_overrides_lower() {
    let fixture = Fixture::new();
    fixture.predict(ResourceName::Cpu, 2.0);
    let store = MemoryStore::with_template(template(1000, GIB));
    let mut obj = workload(
        vec![
            EstimatorSpec::new("Proportional", 0),
            EstimatorSpec::new("Percentile", 10),
        ],
        unthresholded_policy(),
    );

    fixture.reconciler.reconcile(&mut obj, &store).await.unwrap();

    // cpu from Percentile, memory only from Proportional
    assert_eq!(target(&obj), Some(requests(2000, 512 * MIB)));

    let proportional = obj
        .status
        .current_estimators
        .iter()
        .find(|s| s.estimator_type == "Proportional")
        .unwrap();
    assert_eq!(
        proportional.recommendation.target_for("app"),
        Some(&requests(500, 512 * MIB))
    );
}

#[tokio::test]
async fn test_estimator_failures_counted_not_fatal() {
    let fixture = Fixture::new();
    // no predictions, so Percentile fails while Proportional still answers
    let store = MemoryStore::with_template(template(1000, GIB));
    let mut obj = workload(
        vec![
            EstimatorSpec::new("Proportional", 0),
            EstimatorSpec::new("Percentile", 0),
        ],
        unthresholded_policy(),
    );

    let outcome = fixture.reconciler.reconcile(&mut obj, &store).await.unwrap();

    assert_eq!(
        outcome,
        ReconcileOutcome::Requeue {
            after: DEFAULT_RESYNC_PERIOD,
            estimator_failures: 1,
        }
    );
    assert_eq!(target(&obj), Some(requests(500, 512 * MIB)));
    assert_eq!(obj.status.conditions[0].status, "True");
}

#[tokio::test]
async fn test_same_tier_takes_max_per_resource() {
    let fixture = Fixture::new();
    fixture.predict(ResourceName::Cpu, 0.2);
    fixture.predict(ResourceName::Memory, (800 * MIB) as f64);
    let store = MemoryStore::with_template(template(1000, GIB));
    let mut obj = workload(
        vec![
            EstimatorSpec::new("Proportional", 5),
            EstimatorSpec::new("Percentile", 5),
        ],
        unthresholded_policy(),
    );

    fixture.reconciler.reconcile(&mut obj, &store).await.unwrap();

    assert_eq!(target(&obj), Some(requests(500, 800 * MIB)));
}

#[tokio::test]
async fn test_oom_bump_overrides_percentile_memory() {
    let fixture = Fixture::new();
    fixture.predict(ResourceName::Cpu, 2.0);
    fixture.predict(ResourceName::Memory, (2 * GIB) as f64);
    fixture.oom.record(OomRecord {
        namespace: "default".into(),
        pod: "web-5d8c7-x2x9q".into(),
        container: "app".into(),
        memory: MilliQuantity::from_value(3 * GIB),
        oom_at: Utc::now(),
    });
    let store = MemoryStore::with_template(template(1000, GIB));
    let mut obj = workload(
        vec![
            EstimatorSpec::new("Percentile", 0),
            EstimatorSpec::new("OOM", 1),
        ],
        app_policy(),
    );

    fixture.reconciler.reconcile(&mut obj, &store).await.unwrap();

    let expected = ((3 * GIB) as f64 * 1.2) as i64;
    let target = target(&obj).unwrap();
    assert_eq!(target.cpu(), MilliQuantity::from_millis(2000));
    assert_eq!(target.memory().value(), expected);
}

#[tokio::test]
async fn test_external_estimator_reads_back_status() {
    let fixture = Fixture::new();
    let store = MemoryStore::with_template(template(1000, GIB));
    let mut obj = workload(
        vec![
            EstimatorSpec::new("Proportional", 0),
            EstimatorSpec::new("Custom", 100),
        ],
        unthresholded_policy(),
    );
    let mut published = RecommendedPodResources::default();
    published.upsert("app", requests(1500, 3 * GIB));
    obj.status.current_estimators.push(EstimatorStatus {
        estimator_type: "Custom".into(),
        last_update_time: Time(Utc::now()),
        recommendation: published,
    });

    fixture.reconciler.reconcile(&mut obj, &store).await.unwrap();

    assert_eq!(target(&obj), Some(requests(1500, 3 * GIB)));
}

#[tokio::test]
async fn test_scale_up_threshold_not_reached() {
    let fixture = Fixture::new();
    fixture.predict(ResourceName::Cpu, 0.9);
    fixture.predict(ResourceName::Memory, GIB as f64 * 0.9);
    let store = MemoryStore::with_template(template(1000, GIB));
    let mut obj = workload(vec![EstimatorSpec::new("Percentile", 0)], app_policy());

    fixture.reconciler.reconcile(&mut obj, &store).await.unwrap();

    // 90% is below the scale-up threshold and above the scale-down one
    assert_eq!(target(&obj), None);
    assert!(fixture.reconciler.scale_events().is_empty());
}

#[tokio::test]
async fn test_stabilization_window_blocks_reapplication() {
    let fixture = Fixture::new();
    fixture.predict(ResourceName::Cpu, 2.0);
    fixture.predict(ResourceName::Memory, (2 * GIB) as f64);
    let store = MemoryStore::with_template(template(1000, GIB));
    let mut obj = workload(vec![EstimatorSpec::new("Percentile", 0)], app_policy());

    fixture.reconciler.reconcile(&mut obj, &store).await.unwrap();
    assert_eq!(target(&obj), Some(requests(2000, 2 * GIB)));

    fixture.predict(ResourceName::Cpu, 3.0);
    fixture.predict(ResourceName::Memory, (3 * GIB) as f64);
    fixture.reconciler.reconcile(&mut obj, &store).await.unwrap();
    assert_eq!(target(&obj), Some(requests(2000, 2 * GIB)));

    // Move the last scale-up outside the 150s window
    fixture
        .reconciler
        .scale_events()
        .record(up_key(&obj), Utc::now() - chrono::Duration::seconds(151));
    fixture.reconciler.reconcile(&mut obj, &store).await.unwrap();
    assert_eq!(target(&obj), Some(requests(3000, 3 * GIB)));
}

#[tokio::test]
async fn test_tolerance_keeps_stored_target() {
    let fixture = Fixture::new();
    fixture.predict(ResourceName::Cpu, 2.05);
    fixture.predict(ResourceName::Memory, (2 * GIB + 50 * MIB) as f64);
    let store = MemoryStore::with_template(template(1000, GIB));
    let mut obj = workload(vec![EstimatorSpec::new("Percentile", 0)], app_policy());
    let mut stored = RecommendedPodResources::default();
    stored.upsert("app", requests(2000, 2 * GIB));
    obj.status.recommendation = Some(stored);

    fixture.reconciler.reconcile(&mut obj, &store).await.unwrap();
    assert_eq!(target(&obj), Some(requests(2000, 2 * GIB)));

    fixture
        .reconciler
        .scale_events()
        .record(up_key(&obj), Utc::now() - chrono::Duration::hours(1));
    fixture.reconciler.reconcile(&mut obj, &store).await.unwrap();
    assert_eq!(target(&obj), Some(requests(2000, 2 * GIB)));
}

#[tokio::test]
async fn test_scale_down_uses_scale_down_policy() {
    let fixture = Fixture::new();
    fixture.predict(ResourceName::Cpu, 0.2);
    fixture.predict(ResourceName::Memory, (200 * MIB) as f64);
    let store = MemoryStore::with_template(template(1000, GIB));
    let policy = ContainerPolicy {
        container_name: "app".into(),
        scale_up_policy: Some(ScalingPolicy {
            scale_mode: Some(ScaleMode::Off),
            ..Default::default()
        }),
        scale_down_policy: Some(ScalingPolicy {
            scale_mode: Some(ScaleMode::Auto),
            stabilization_window_seconds: Some(600),
            metric_thresholds: Some(BTreeMap::from([
                (ResourceName::Cpu, ResourceMetric::utilization(35)),
                (ResourceName::Memory, ResourceMetric::utilization(40)),
            ])),
        }),
        controlled_resources: None,
    };
    let mut obj = workload(vec![EstimatorSpec::new("Percentile", 0)], policy);

    fixture.reconciler.reconcile(&mut obj, &store).await.unwrap();

    // An Off scale-up sub-policy does not block scaling down
    assert_eq!(target(&obj), Some(requests(200, 200 * MIB)));
    let events = fixture.reconciler.scale_events();
    assert!(events.last_scale_time(&up_key(&obj)).is_none());
    assert!(events
        .last_scale_time(&ScaleEventKey::new(&obj, "app", ScaleDirection::ScaleDown))
        .is_some());
}

#[tokio::test]
async fn test_controlled_resources_filter_candidate() {
    let fixture = Fixture::new();
    fixture.predict(ResourceName::Cpu, 2.0);
    fixture.predict(ResourceName::Memory, (2 * GIB) as f64);
    let store = MemoryStore::with_template(template(1000, GIB));
    let mut policy = unthresholded_policy();
    policy.controlled_resources = Some(vec![ResourceName::Cpu]);
    let mut obj = workload(vec![EstimatorSpec::new("Percentile", 0)], policy);

    fixture.reconciler.reconcile(&mut obj, &store).await.unwrap();

    let target = target(&obj).unwrap();
    assert_eq!(target.cpu(), MilliQuantity::from_millis(2000));
    assert!(!target.contains_key(&ResourceName::Memory));
}

#[tokio::test]
async fn test_container_missing_from_template_skipped() {
    let fixture = Fixture::new();
    fixture.predict(ResourceName::Cpu, 2.0);
    let store = MemoryStore::with_template(template(1000, GIB));
    let mut policy = app_policy();
    policy.container_name = "sidecar".into();
    let mut obj = workload(vec![EstimatorSpec::new("Percentile", 0)], policy);

    let outcome = fixture.reconciler.reconcile(&mut obj, &store).await.unwrap();

    assert!(matches!(outcome, ReconcileOutcome::Requeue { .. }));
    let recommendation = obj.status.recommendation.unwrap();
    assert!(recommendation.container_recommendations.is_empty());
}

#[tokio::test]
async fn test_deletion_releases_state() {
    let fixture = Fixture::new();
    fixture.predict(ResourceName::Cpu, 2.0);
    fixture.predict(ResourceName::Memory, (2 * GIB) as f64);
    let store = MemoryStore::with_template(template(1000, GIB));
    let mut obj = workload(vec![EstimatorSpec::new("Percentile", 0)], app_policy());

    fixture.reconciler.reconcile(&mut obj, &store).await.unwrap();
    assert_eq!(fixture.reconciler.scale_events().len(), 1);
    assert_eq!(fixture.predictor.active_queries(), 2);

    obj.metadata.deletion_timestamp = Some(Time(Utc::now()));
    let outcome = fixture.reconciler.reconcile(&mut obj, &store).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Deleted);
    let events = fixture.reconciler.scale_events();
    for direction in ScaleDirection::ALL {
        assert!(events
            .last_scale_time(&ScaleEventKey::new(&obj, "app", direction))
            .is_none());
    }
    assert_eq!(fixture.predictor.active_queries(), 0);
}

#[tokio::test]
async fn test_validation_failure_sets_condition_and_event() {
    let fixture = Fixture::new();
    let store = MemoryStore::with_template(template(1000, GIB));
    let mut policy = app_policy();
    policy.container_name = String::new();
    let mut obj = workload(vec![EstimatorSpec::new("Percentile", 0)], policy);

    let err = fixture
        .reconciler
        .reconcile(&mut obj, &store)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(store.event_reasons(), vec![REASON_FAILED_VALIDATION]);
    let ready = &obj.status.conditions[0];
    assert_eq!(ready.status, "False");
    assert_eq!(ready.reason, REASON_FAILED_VALIDATION);
    assert!(obj.status.recommendation.is_none());
}

#[tokio::test]
async fn test_missing_pod_template_fails_pass() {
    let fixture = Fixture::new();
    let store = MemoryStore::default();
    let mut obj = workload(vec![EstimatorSpec::new("Percentile", 0)], app_policy());

    let err = fixture
        .reconciler
        .reconcile(&mut obj, &store)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Store(_)));
    assert_eq!(store.event_reasons(), vec![REASON_FAILED_GET_POD_TEMPLATE]);
    assert_eq!(obj.status.conditions[0].reason, REASON_FAILED_GET_POD_TEMPLATE);
}

#[test]
fn test_set_condition_keeps_transition_time_on_same_status() {
    let mut status = WorkloadScalingStatus::default();
    let first = Utc::now() - chrono::Duration::minutes(5);
    set_condition(
        &mut status,
        CONDITION_TYPE_READY,
        ConditionStatus::True,
        REASON_READY,
        "ready",
        first,
    );
    set_condition(
        &mut status,
        CONDITION_TYPE_READY,
        ConditionStatus::True,
        REASON_READY,
        "still ready",
        Utc::now(),
    );
    assert_eq!(status.conditions.len(), 1);
    assert_eq!(status.conditions[0].last_transition_time, Time(first));
    assert_eq!(status.conditions[0].message, "still ready");

    let later = Utc::now();
    set_condition(
        &mut status,
        CONDITION_TYPE_READY,
        ConditionStatus::False,
        REASON_FAILED_VALIDATION,
        "broken",
        later,
    );
    assert_eq!(status.conditions[0].last_transition_time, Time(later));
    assert_eq!(status.conditions[0].status, "False");
}

#[tokio::test]
async fn test_concurrent_passes_keep_workloads_apart() {
    let fixture = Fixture::new();
    fixture.predict_for("web", ResourceName::Cpu, 2.0);
    fixture.predict_for("web", ResourceName::Memory, (2 * GIB) as f64);
    fixture.predict_for("api", ResourceName::Cpu, 0.2);
    fixture.predict_for("api", ResourceName::Memory, (200 * MIB) as f64);
    let store =
        MemoryStore::with_template(template(1000, GIB)).and_target("api", template(1000, GIB));
    let estimators = vec![EstimatorSpec::new("Percentile", 0)];
    let mut web = workload_for("web", "uid-1", estimators.clone(), app_policy());
    let mut api = workload_for("api", "uid-2", estimators, app_policy());

    let (web_outcome, api_outcome) = tokio::join!(
        fixture.reconciler.reconcile(&mut web, &store),
        fixture.reconciler.reconcile(&mut api, &store),
    );
    web_outcome.unwrap();
    api_outcome.unwrap();

    // web scales up, api scales down
    assert_eq!(target(&web), Some(requests(2000, 2 * GIB)));
    assert_eq!(target(&api), Some(requests(200, 200 * MIB)));

    for (obj, expected) in [
        (&web, requests(2000, 2 * GIB)),
        (&api, requests(200, 200 * MIB)),
    ] {
        assert_eq!(obj.status.current_estimators.len(), 1);
        assert_eq!(
            obj.status.current_estimators[0]
                .recommendation
                .target_for("app"),
            Some(&expected)
        );
    }

    let events = fixture.reconciler.scale_events();
    assert_eq!(events.len(), 2);
    let key = |obj: &WorkloadScalingObject, direction| ScaleEventKey::new(obj, "app", direction);
    assert!(events.last_scale_time(&key(&web, ScaleDirection::ScaleUp)).is_some());
    assert!(events.last_scale_time(&key(&web, ScaleDirection::ScaleDown)).is_none());
    assert!(events.last_scale_time(&key(&api, ScaleDirection::ScaleDown)).is_some());
    assert!(events.last_scale_time(&key(&api, ScaleDirection::ScaleUp)).is_none());

    assert_eq!(store.writes(), 2);
    assert_eq!(fixture.predictor.active_queries(), 4);
}
