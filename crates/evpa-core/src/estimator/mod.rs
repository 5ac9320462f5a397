//! Resource estimators
//!
//! Each estimator produces a candidate resource list for one container:
//! - Proportional: halve the current request above a floor
//! - OOM: bump memory above the most recent OOM kill
//! - Percentile: read CPU/memory from the prediction backend
//! - External: republish what a third party wrote into the status
//!
//! Built-in strategies form a closed set; any other type name resolves to
//! an external passthrough estimator.

mod external;
mod oom;
mod percentile;
mod proportional;
mod registry;

pub use external::ExternalEstimator;
pub use oom::{OomEstimator, OOM_BUMP_UP_RATIO, OOM_MAX_RECORD_AGE_DAYS, OOM_MIN_BUMP_UP};
pub use percentile::{caller_id, PercentileEstimator};
pub use proportional::{ProportionalEstimator, MIN_CPU_MILLI_CORES, MIN_MEMORY_BYTES};
pub use registry::EstimatorRegistry;

use crate::defaults::{OOM_ESTIMATOR, PERCENTILE_ESTIMATOR, PROPORTIONAL_ESTIMATOR};
use crate::error::Result;
use crate::models::{EstimatorSpec, WorkloadScalingObject};
use crate::resource::ResourceList;
use std::collections::BTreeMap;
use std::fmt;

/// Typed name of an estimator strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EstimatorKind {
    Proportional,
    Oom,
    Percentile,
    External,
}

impl EstimatorKind {
    pub const BUILTIN: [EstimatorKind; 3] = [
        EstimatorKind::Proportional,
        EstimatorKind::Oom,
        EstimatorKind::Percentile,
    ];

    pub fn type_name(&self) -> Option<&'static str> {
        match self {
            EstimatorKind::Proportional => Some(PROPORTIONAL_ESTIMATOR),
            EstimatorKind::Oom => Some(OOM_ESTIMATOR),
            EstimatorKind::Percentile => Some(PERCENTILE_ESTIMATOR),
            EstimatorKind::External => None,
        }
    }
}

/// A strategy implementation
#[derive(Clone)]
pub enum Estimator {
    Proportional(ProportionalEstimator),
    Oom(OomEstimator),
    Percentile(PercentileEstimator),
    External(ExternalEstimator),
}

impl Estimator {
    pub fn kind(&self) -> EstimatorKind {
        match self {
            Estimator::Proportional(_) => EstimatorKind::Proportional,
            Estimator::Oom(_) => EstimatorKind::Oom,
            Estimator::Percentile(_) => EstimatorKind::Percentile,
            Estimator::External(_) => EstimatorKind::External,
        }
    }

    /// Candidate resources for `container_name` given its current requests.
    /// An empty list means no opinion.
    pub async fn estimate(
        &self,
        obj: &WorkloadScalingObject,
        config: &BTreeMap<String, String>,
        container_name: &str,
        requests: &ResourceList,
    ) -> Result<ResourceList> {
        match self {
            Estimator::Proportional(e) => Ok(e.estimate(requests)),
            Estimator::Oom(e) => e.estimate(obj, config, container_name).await,
            Estimator::Percentile(e) => e.estimate(obj, config, container_name).await,
            Estimator::External(e) => Ok(e.estimate(obj, container_name)),
        }
    }

    /// Release per-workload state held by collaborators
    pub async fn forget(&self, obj: &WorkloadScalingObject) {
        if let Estimator::Percentile(e) = self {
            e.forget(obj).await;
        }
    }
}

impl fmt::Debug for Estimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Estimator::External(e) => f
                .debug_tuple("External")
                .field(&e.estimator_type())
                .finish(),
            other => write!(f, "{:?}", other.kind()),
        }
    }
}

/// An estimator bound to the spec that parametrizes it for one workload.
/// Lives for a single reconciliation pass.
#[derive(Debug, Clone)]
pub struct EstimatorInstance {
    estimator: Estimator,
    spec: EstimatorSpec,
}

impl EstimatorInstance {
    pub fn new(estimator: Estimator, spec: EstimatorSpec) -> Self {
        Self { estimator, spec }
    }

    pub fn spec(&self) -> &EstimatorSpec {
        &self.spec
    }

    pub fn estimator(&self) -> &Estimator {
        &self.estimator
    }

    pub fn priority(&self) -> i32 {
        self.spec.priority
    }

    pub async fn estimate(
        &self,
        obj: &WorkloadScalingObject,
        container_name: &str,
        requests: &ResourceList,
    ) -> Result<ResourceList> {
        self.estimator
            .estimate(obj, &self.spec.config, container_name, requests)
            .await
    }
}
