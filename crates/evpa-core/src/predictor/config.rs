//! Percentile prediction configuration built from estimator config maps

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

const DEFAULT_SAMPLE_INTERVAL: &str = "1m";
const DEFAULT_PERCENTILE: &str = "0.99";
const DEFAULT_MARGIN_FRACTION: &str = "0.15";
const DEFAULT_CPU_HISTORY_LENGTH: &str = "24h";
const DEFAULT_MEM_HISTORY_LENGTH: &str = "48h";

/// How a prediction model warms up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelInitMode {
    History,
    #[default]
    LazyTraining,
    Recover,
}

impl ModelInitMode {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "history" => Some(ModelInitMode::History),
            "lazytraining" => Some(ModelInitMode::LazyTraining),
            "recover" => Some(ModelInitMode::Recover),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramConfig {
    pub half_life: String,
    pub bucket_size: String,
    pub max_value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentileConfig {
    pub aggregated: bool,
    pub history_length: String,
    pub sample_interval: String,
    pub margin_fraction: String,
    pub percentile: String,
    pub histogram: HistogramConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionConfig {
    pub init_mode: ModelInitMode,
    pub percentile: PercentileConfig,
}

fn lookup<'a>(config: &'a BTreeMap<String, String>, prefix: &str, key: &str, default: &'a str) -> &'a str {
    config
        .get(&format!("{prefix}-{key}"))
        .map(String::as_str)
        .unwrap_or(default)
}

fn init_mode(config: &BTreeMap<String, String>, prefix: &str) -> ModelInitMode {
    let key = format!("{prefix}-model-init-mode");
    match config.get(&key) {
        None => ModelInitMode::default(),
        Some(value) => ModelInitMode::parse(value).unwrap_or_else(|| {
            warn!(key = %key, value = %value, "Unknown model init mode, using lazy training");
            ModelInitMode::default()
        }),
    }
}

fn build(
    config: &BTreeMap<String, String>,
    prefix: &str,
    default_history: &str,
    histogram: HistogramConfig,
) -> PredictionConfig {
    PredictionConfig {
        init_mode: init_mode(config, prefix),
        percentile: PercentileConfig {
            aggregated: true,
            history_length: lookup(config, prefix, "model-history-length", default_history)
                .to_string(),
            sample_interval: lookup(config, prefix, "sample-interval", DEFAULT_SAMPLE_INTERVAL)
                .to_string(),
            margin_fraction: lookup(
                config,
                prefix,
                "request-margin-fraction",
                DEFAULT_MARGIN_FRACTION,
            )
            .to_string(),
            percentile: lookup(config, prefix, "request-percentile", DEFAULT_PERCENTILE)
                .to_string(),
            histogram,
        },
    }
}

/// CPU prediction config from `cpu-*` keys
pub fn cpu_prediction_config(config: &BTreeMap<String, String>) -> PredictionConfig {
    build(
        config,
        "cpu",
        DEFAULT_CPU_HISTORY_LENGTH,
        HistogramConfig {
            half_life: "24h".to_string(),
            bucket_size: "0.1".to_string(),
            max_value: "100".to_string(),
        },
    )
}

/// Memory prediction config from `mem-*` keys
pub fn memory_prediction_config(config: &BTreeMap<String, String>) -> PredictionConfig {
    build(
        config,
        "mem",
        DEFAULT_MEM_HISTORY_LENGTH,
        HistogramConfig {
            half_life: "48h".to_string(),
            bucket_size: "104857600".to_string(),
            max_value: "104857600000".to_string(),
        },
    )
}
