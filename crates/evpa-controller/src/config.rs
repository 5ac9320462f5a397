//! Controller configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Controller configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// JSON manifest holding workloads, pod templates and predictions
    #[serde(default = "default_manifest_path")]
    pub manifest_path: PathBuf,

    /// Optional JSON file of OOM-kill records
    #[serde(default)]
    pub oom_record_path: Option<PathBuf>,

    /// Seconds between two reconciliation rounds
    #[serde(default = "default_resync_period")]
    pub resync_period_secs: u64,

    /// Name reported in structured logs
    #[serde(default = "default_controller_name")]
    pub controller_name: String,
}

fn default_api_port() -> u16 {
    8080
}

fn default_manifest_path() -> PathBuf {
    PathBuf::from("/etc/evpa/manifest.json")
}

fn default_resync_period() -> u64 {
    60
}

fn default_controller_name() -> String {
    std::env::var("POD_NAME").unwrap_or_else(|_| "evpa-controller".to_string())
}

impl ControllerConfig {
    /// Load configuration from `EVPA_*` environment variables
    pub fn load() -> Result<Self> {
        Self::from_source(config::Environment::with_prefix("EVPA"))
    }

    fn from_source<S>(source: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config = config::Config::builder()
            .add_source(source)
            .build()
            .context("Failed to read controller configuration")?;

        config
            .try_deserialize()
            .context("Invalid controller configuration")
    }

    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_period_secs.max(1))
    }
}
