//! In-process predictor serving fixed predicted values

use super::{MetricSelector, PredictionConfig, Predictor, Sample, TimeSeries};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};

/// Predictor backed by a table of fixed values keyed by metric selector.
///
/// Tracks which `(caller, query)` pairs are registered so standing queries
/// can be observed and cancelled like against a real backend.
#[derive(Debug, Default)]
pub struct StaticPredictor {
    values: RwLock<HashMap<String, f64>>,
    queries: Mutex<HashSet<(String, String)>>,
}

impl StaticPredictor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the predicted value (cores for cpu, bytes for memory) for a metric
    pub fn set_prediction(&self, metric: &MetricSelector, value: f64) {
        self.values
            .write()
            .unwrap()
            .insert(metric.unique_key(), value);
    }

    /// Number of standing queries currently registered
    pub fn active_queries(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait]
impl Predictor for StaticPredictor {
    async fn query_predicted_values(
        &self,
        caller: &str,
        _config: &PredictionConfig,
        metric: &MetricSelector,
    ) -> Result<Vec<TimeSeries>> {
        let key = metric.unique_key();
        self.queries
            .lock()
            .unwrap()
            .insert((caller.to_string(), key.clone()));

        let value = self.values.read().unwrap().get(&key).copied();
        Ok(value
            .map(|value| TimeSeries {
                labels: Default::default(),
                samples: vec![Sample {
                    value,
                    timestamp: chrono::Utc::now().timestamp(),
                }],
            })
            .into_iter()
            .collect())
    }

    async fn delete_query(&self, metric: &MetricSelector, caller: &str) -> Result<()> {
        self.queries
            .lock()
            .unwrap()
            .remove(&(caller.to_string(), metric.unique_key()));
        Ok(())
    }
}
