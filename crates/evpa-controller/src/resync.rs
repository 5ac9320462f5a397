//! One resync round over every workload of the manifest

use crate::store::FileObjectStore;
use evpa_core::{
    health::{components, HealthRegistry, WorkloadHealth},
    Error, ReconcileOutcome, Reconciler,
};
use tracing::{error, info};

/// What happened during one round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundSummary {
    pub reconciled: usize,
    pub deleted: usize,
    pub failed: usize,
    pub estimator_failures: usize,
}

/// Reconcile every workload once and report component and workload health
pub async fn reconcile_all(
    reconciler: &Reconciler,
    store: &FileObjectStore,
    health_registry: &HealthRegistry,
) -> RoundSummary {
    let mut summary = RoundSummary::default();
    let mut store_error = None;
    let mut reconcile_error = None;

    for mut obj in store.workloads().await {
        let key = obj.key().to_string();
        match reconciler.reconcile(&mut obj, store).await {
            Ok(ReconcileOutcome::Deleted) => {
                summary.deleted += 1;
                health_registry.forget_workload(&key).await;
                if let Err(e) = store.remove_workload(&obj).await {
                    error!(workload = %key, error = %e, "Failed to remove workload");
                    store_error = Some(format!("{key}: {e:#}"));
                }
            }
            Ok(ReconcileOutcome::Requeue {
                estimator_failures, ..
            }) => {
                summary.reconciled += 1;
                summary.estimator_failures += estimator_failures;
                health_registry
                    .record_workload(key, WorkloadHealth::reconciled(estimator_failures))
                    .await;
            }
            Err(e) => {
                error!(workload = %key, error = %e, "Reconcile failed");
                summary.failed += 1;
                if matches!(e, Error::Store(_)) {
                    store_error = Some(format!("{key}: {e}"));
                }
                reconcile_error = Some(format!("{key}: {e}"));
                health_registry
                    .record_workload(key, WorkloadHealth::failed(e.to_string()))
                    .await;
            }
        }
    }

    let estimators = match summary.estimator_failures {
        0 => Ok(()),
        n => Err(format!("{n} estimations failed in the last round")),
    };
    health_registry
        .report(components::ESTIMATORS, estimators)
        .await;
    health_registry
        .report(components::OBJECT_STORE, store_error.map_or(Ok(()), Err))
        .await;
    health_registry
        .report(components::RECONCILER, reconcile_error.map_or(Ok(()), Err))
        .await;

    info!(
        reconciled = summary.reconciled,
        deleted = summary.deleted,
        failed = summary.failed,
        estimator_failures = summary.estimator_failures,
        "Resync round finished"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use evpa_core::{
        estimator::EstimatorRegistry, health::ComponentStatus, oom::InMemoryOomRecorder,
        predictor::StaticPredictor, StructuredLogger,
    };
    use std::sync::Arc;
    use tempfile::TempDir;

    // web-evpa runs Percentile without any seeded prediction
    const MANIFEST: &str = r#"{
        "workloads": [
            {
                "metadata": {"name": "web-evpa", "namespace": "default", "uid": "uid-1"},
                "spec": {
                    "targetRef": {"kind": "Deployment", "name": "web"},
                    "resourceEstimators": [{"type": "Proportional"}, {"type": "Percentile"}],
                    "resourcePolicy": {"containerPolicies": [{"containerName": "app"}]}
                }
            },
            {
                "metadata": {"name": "broken-evpa", "namespace": "default"},
                "spec": {
                    "targetRef": {"kind": "Deployment", "name": "web"},
                    "resourcePolicy": {"containerPolicies": [{"containerName": ""}]}
                }
            },
            {
                "metadata": {
                    "name": "old-evpa",
                    "namespace": "default",
                    "deletionTimestamp": "2026-10-01T00:00:00Z"
                },
                "spec": {
                    "targetRef": {"kind": "Deployment", "name": "web"},
                    "resourcePolicy": {"containerPolicies": [{"containerName": "app"}]}
                }
            }
        ],
        "podTemplates": [{
            "namespace": "default",
            "kind": "Deployment",
            "name": "web",
            "template": {"spec": {"containers": [{
                "name": "app",
                "resources": {"requests": {"cpu": "1", "memory": "1Gi"}}
            }]}}
        }]
    }"#;

    fn reconciler() -> Reconciler {
        let registry = EstimatorRegistry::new(
            Arc::new(StaticPredictor::new()),
            Arc::new(InMemoryOomRecorder::new()),
        );
        Reconciler::new(registry, StructuredLogger::new("resync-test"))
    }

    #[tokio::test]
    async fn test_round_reports_component_and_workload_health() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, MANIFEST).unwrap();
        let store = FileObjectStore::open(&path).unwrap();
        let health_registry = HealthRegistry::new();
        health_registry.register_all().await;
        health_registry.set_ready(true).await;

        let summary = reconcile_all(&reconciler(), &store, &health_registry).await;

        assert_eq!(
            summary,
            RoundSummary {
                reconciled: 1,
                deleted: 1,
                failed: 1,
                estimator_failures: 1,
            }
        );

        let health = health_registry.health().await;
        assert_eq!(
            health.components[components::ESTIMATORS].status,
            ComponentStatus::Degraded
        );
        assert_eq!(
            health.components[components::RECONCILER].status,
            ComponentStatus::Degraded
        );
        assert_eq!(
            health.components[components::OBJECT_STORE].status,
            ComponentStatus::Healthy
        );

        let readiness = health_registry.readiness().await;
        assert!(readiness.ready);
        assert_eq!(readiness.workloads.len(), 2);
        assert_eq!(readiness.workloads["default/web-evpa"].estimator_failures, 1);
        assert!(!readiness.workloads["default/broken-evpa"].reconciled);
        assert!(!readiness.workloads.contains_key("default/old-evpa"));

        let remaining: Vec<String> = store
            .workloads()
            .await
            .iter()
            .map(|w| w.key().to_string())
            .collect();
        assert_eq!(remaining, vec!["default/web-evpa", "default/broken-evpa"]);
    }

    #[tokio::test]
    async fn test_clean_round_restores_estimator_health() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, MANIFEST).unwrap();
        let store = FileObjectStore::open(&path).unwrap();
        let health_registry = HealthRegistry::new();
        health_registry.register_all().await;
        let reconciler = reconciler();

        reconcile_all(&reconciler, &store, &health_registry).await;
        for obj in store.workloads().await {
            store.remove_workload(&obj).await.unwrap();
        }
        let summary = reconcile_all(&reconciler, &store, &health_registry).await;

        assert_eq!(summary, RoundSummary::default());
        assert_eq!(
            health_registry.health().await.status,
            ComponentStatus::Healthy
        );
    }
}
