//! Percentile estimator backed by the prediction service

use crate::error::{Error, Result};
use crate::models::WorkloadScalingObject;
use crate::predictor::{
    cpu_prediction_config, memory_prediction_config, MetricSelector, PredictionConfig, Predictor,
    TimeSeries,
};
use crate::resource::{MilliQuantity, ResourceList, ResourceName};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Stable caller id so repeated reconciliations reuse the same standing query
pub fn caller_id(obj: &WorkloadScalingObject) -> String {
    format!("EVPACaller-{}-{}", obj.key(), obj.uid())
}

/// Derives requests from predicted usage percentiles
#[derive(Clone)]
pub struct PercentileEstimator {
    predictor: Arc<dyn Predictor>,
}

impl PercentileEstimator {
    pub fn new(predictor: Arc<dyn Predictor>) -> Self {
        Self { predictor }
    }

    fn metric(obj: &WorkloadScalingObject, resource: ResourceName, container: &str) -> MetricSelector {
        MetricSelector::container(resource, obj.namespace(), obj.target_name(), container)
    }

    async fn first_value(
        &self,
        caller: &str,
        config: &PredictionConfig,
        metric: &MetricSelector,
    ) -> Result<f64> {
        let series = self
            .predictor
            .query_predicted_values(caller, config, metric)
            .await
            .map_err(|e| Error::Predictor(e.context(format!("query {}", metric.unique_key()))))?;

        series
            .first()
            .and_then(TimeSeries::first_value)
            .ok_or_else(|| {
                Error::NoPredictedValues(format!("no value returned for query {}", metric.unique_key()))
            })
    }

    /// CPU and memory from two prediction queries. A partial answer is
    /// returned as is. When both queries yield nothing, a backend failure is
    /// reported ahead of missing samples.
    pub async fn estimate(
        &self,
        obj: &WorkloadScalingObject,
        config: &BTreeMap<String, String>,
        container_name: &str,
    ) -> Result<ResourceList> {
        let caller = caller_id(obj);
        let cpu_metric = Self::metric(obj, ResourceName::Cpu, container_name);
        let memory_metric = Self::metric(obj, ResourceName::Memory, container_name);

        let mut recommended = ResourceList::new();
        let mut failures = Vec::new();

        match self
            .first_value(&caller, &cpu_prediction_config(config), &cpu_metric)
            .await
        {
            Ok(cores) => {
                recommended.insert(
                    ResourceName::Cpu,
                    MilliQuantity::from_millis((cores * 1000.0) as i64),
                );
            }
            Err(e) => failures.push(e),
        }

        match self
            .first_value(&caller, &memory_prediction_config(config), &memory_metric)
            .await
        {
            Ok(bytes) => {
                recommended.insert(ResourceName::Memory, MilliQuantity::from_value(bytes as i64));
            }
            Err(e) => failures.push(e),
        }

        if recommended.is_empty() {
            let reasons = failures
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(failures
                .into_iter()
                .find(|e| matches!(e, Error::Predictor(_)))
                .unwrap_or(Error::NoPredictedValues(reasons)));
        }
        for failure in &failures {
            debug!(
                workload = %obj.key(),
                container = %container_name,
                error = %failure,
                "Partial percentile prediction"
            );
        }

        Ok(recommended)
    }

    /// Cancel both standing queries of every container policy
    pub async fn forget(&self, obj: &WorkloadScalingObject) {
        let caller = caller_id(obj);
        for policy in obj.container_policies() {
            for resource in [ResourceName::Cpu, ResourceName::Memory] {
                let metric = Self::metric(obj, resource, &policy.container_name);
                if let Err(e) = self.predictor.delete_query(&metric, &caller).await {
                    error!(
                        error = %e,
                        query = %metric.unique_key(),
                        "Failed to delete prediction query"
                    );
                }
            }
        }
    }
}
