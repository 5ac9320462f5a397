//! Prediction backend interface
//!
//! The time-series prediction engine lives outside this crate. Estimators
//! talk to it through [`Predictor`], registering a standing query per caller
//! and metric so repeated reconciliations reuse the same prediction stream.

mod config;
mod fixed;

pub use config::{
    cpu_prediction_config, memory_prediction_config, HistogramConfig, ModelInitMode,
    PercentileConfig, PredictionConfig,
};
pub use fixed::StaticPredictor;

use crate::resource::ResourceName;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Selects one container metric of one workload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSelector {
    pub metric_name: ResourceName,
    pub namespace: String,
    pub workload_name: String,
    pub container_name: String,
}

impl MetricSelector {
    pub fn container(
        metric_name: ResourceName,
        namespace: &str,
        workload_name: &str,
        container_name: &str,
    ) -> Self {
        Self {
            metric_name,
            namespace: namespace.to_string(),
            workload_name: workload_name.to_string(),
            container_name: container_name.to_string(),
        }
    }

    /// Stable key identifying the query regardless of caller
    pub fn unique_key(&self) -> String {
        format!(
            "container/{}/{}/{}/{}",
            self.namespace, self.workload_name, self.container_name, self.metric_name
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub value: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub samples: Vec<Sample>,
}

impl TimeSeries {
    pub fn first_value(&self) -> Option<f64> {
        self.samples.first().map(|s| s.value)
    }
}

/// Client of the time-series prediction backend
#[async_trait]
pub trait Predictor: Send + Sync {
    /// Register (or reuse) the standing query for `caller` and return its predicted values
    async fn query_predicted_values(
        &self,
        caller: &str,
        config: &PredictionConfig,
        metric: &MetricSelector,
    ) -> Result<Vec<TimeSeries>>;

    /// Cancel the standing query registered by `caller`
    async fn delete_query(&self, metric: &MetricSelector, caller: &str) -> Result<()>;
}
