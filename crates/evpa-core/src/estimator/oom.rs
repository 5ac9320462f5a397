//! OOM estimator, bumps memory over recorded kills

use crate::error::{Error, Result};
use crate::models::WorkloadScalingObject;
use crate::oom::OomRecorder;
use crate::resource::{MilliQuantity, ResourceList, ResourceName, MIB};
use chrono::{Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Minimum absolute memory bump over the OOM level, in bytes
pub const OOM_MIN_BUMP_UP: i64 = 100 * MIB;

/// Default multiplicative memory bump over the OOM level
pub const OOM_BUMP_UP_RATIO: f64 = 1.2;

/// Kills older than this many days are ignored
pub const OOM_MAX_RECORD_AGE_DAYS: i64 = 7;

/// Bumps memory above the worst recent OOM kill of the container
#[derive(Clone)]
pub struct OomEstimator {
    recorder: Arc<dyn OomRecorder>,
}

fn scale(amount: i64, ratio: f64) -> i64 {
    (amount as f64 * ratio) as i64
}

impl OomEstimator {
    pub fn new(recorder: Arc<dyn OomRecorder>) -> Self {
        Self { recorder }
    }

    pub async fn estimate(
        &self,
        obj: &WorkloadScalingObject,
        config: &BTreeMap<String, String>,
        container_name: &str,
    ) -> Result<ResourceList> {
        let records = self
            .recorder
            .get_oom_records()
            .await
            .map_err(Error::OomRecorder)?;

        let pod_prefix = format!("{}-", obj.target_name());
        let latest = records
            .iter()
            .filter(|r| r.pod.starts_with(&pod_prefix) && r.container == container_name)
            .last();

        let Some(record) = latest else {
            return Ok(ResourceList::new());
        };
        if Utc::now() - record.oom_at > Duration::days(OOM_MAX_RECORD_AGE_DAYS) {
            debug!(
                workload = %obj.key(),
                container = %container_name,
                oom_at = %record.oom_at,
                "Ignoring stale oom record"
            );
            return Ok(ResourceList::new());
        }

        let memory_oom = record.memory.value();
        let ratio_key = format!("workload.{}", obj.target_name());
        let memory_needed = match config.get(&ratio_key).filter(|v| !v.is_empty()) {
            None => (memory_oom + OOM_MIN_BUMP_UP).max(scale(memory_oom, OOM_BUMP_UP_RATIO)),
            Some(value) => {
                let ratio: f64 = value.parse().map_err(|source| Error::InvalidBumpRatio {
                    value: value.clone(),
                    source,
                })?;
                scale(memory_oom, ratio)
            }
        };

        Ok(ResourceList::from([(
            ResourceName::Memory,
            MilliQuantity::from_value(memory_needed),
        )]))
    }
}
