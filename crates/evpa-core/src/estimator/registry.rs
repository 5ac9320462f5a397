//! Registry binding estimator type names to strategies

use super::{
    Estimator, EstimatorInstance, EstimatorKind, ExternalEstimator, OomEstimator,
    PercentileEstimator, ProportionalEstimator,
};
use crate::models::WorkloadScalingObject;
use crate::oom::OomRecorder;
use crate::predictor::Predictor;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Estimators keyed by type name.
///
/// Built-in strategies are registered up front. Unknown type names are
/// registered as external passthrough estimators on first sight and reused
/// afterwards. The lock is never held across an await.
pub struct EstimatorRegistry {
    estimators: Mutex<HashMap<String, Estimator>>,
    predictor: Arc<dyn Predictor>,
    oom_recorder: Arc<dyn OomRecorder>,
}

impl EstimatorRegistry {
    pub fn new(predictor: Arc<dyn Predictor>, oom_recorder: Arc<dyn OomRecorder>) -> Self {
        let registry = Self {
            estimators: Mutex::new(HashMap::new()),
            predictor,
            oom_recorder,
        };

        {
            let mut estimators = registry.estimators.lock().unwrap();
            for kind in EstimatorKind::BUILTIN {
                if let Some(name) = kind.type_name() {
                    estimators.insert(name.to_string(), registry.construct(kind, name));
                }
            }
        }

        registry
    }

    fn construct(&self, kind: EstimatorKind, type_name: &str) -> Estimator {
        match kind {
            EstimatorKind::Proportional => Estimator::Proportional(ProportionalEstimator),
            EstimatorKind::Oom => Estimator::Oom(OomEstimator::new(self.oom_recorder.clone())),
            EstimatorKind::Percentile => {
                Estimator::Percentile(PercentileEstimator::new(self.predictor.clone()))
            }
            EstimatorKind::External => Estimator::External(ExternalEstimator::new(type_name)),
        }
    }

    /// Bind every estimator spec of the workload to its strategy
    pub fn resolve(&self, obj: &WorkloadScalingObject) -> Vec<EstimatorInstance> {
        let specs = obj.spec.resource_estimators.as_deref().unwrap_or_default();
        let mut estimators = self.estimators.lock().unwrap();

        specs
            .iter()
            .map(|spec| {
                let estimator = estimators
                    .entry(spec.estimator_type.clone())
                    .or_insert_with(|| {
                        debug!(
                            estimator = %spec.estimator_type,
                            "Registering external estimator"
                        );
                        self.construct(EstimatorKind::External, &spec.estimator_type)
                    })
                    .clone();
                EstimatorInstance::new(estimator, spec.clone())
            })
            .collect()
    }

    /// Call `forget` on the strategy bound to every estimator spec.
    ///
    /// Stops at the first type that was never registered.
    pub async fn release(&self, obj: &WorkloadScalingObject) {
        let specs = obj.spec.resource_estimators.as_deref().unwrap_or_default();
        let bound: Vec<Estimator> = {
            let estimators = self.estimators.lock().unwrap();
            let mut bound = Vec::with_capacity(specs.len());
            for spec in specs {
                match estimators.get(&spec.estimator_type) {
                    Some(estimator) => bound.push(estimator.clone()),
                    None => {
                        warn!(
                            workload = %obj.key(),
                            estimator = %spec.estimator_type,
                            "Estimator not registered, stopping release"
                        );
                        break;
                    }
                }
            }
            bound
        };

        for estimator in bound {
            estimator.forget(obj).await;
        }
    }
}
