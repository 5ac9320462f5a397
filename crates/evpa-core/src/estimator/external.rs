//! Passthrough estimator for third-party recommendations

use crate::models::WorkloadScalingObject;
use crate::resource::ResourceList;

/// Passthrough for estimator types this crate does not know.
///
/// A third-party controller publishes its recommendation into
/// `status.currentEstimators` under its own type; this estimator reads it
/// back for the matching container.
#[derive(Debug, Clone)]
pub struct ExternalEstimator {
    estimator_type: String,
}

impl ExternalEstimator {
    pub fn new(estimator_type: impl Into<String>) -> Self {
        Self {
            estimator_type: estimator_type.into(),
        }
    }

    pub fn estimator_type(&self) -> &str {
        &self.estimator_type
    }

    pub fn estimate(&self, obj: &WorkloadScalingObject, container_name: &str) -> ResourceList {
        obj.status
            .current_estimators
            .iter()
            .filter(|status| status.estimator_type == self.estimator_type)
            .find_map(|status| status.recommendation.target_for(container_name))
            .cloned()
            .unwrap_or_default()
    }
}
