//! File-backed object store and OOM recorder
//!
//! Workloads, the pod templates of their targets and seeded predictions are
//! read from one JSON manifest. Status writes are persisted back into the
//! same file; events go to the structured log.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use evpa_core::{
    oom::{InMemoryOomRecorder, OomRecord, OomRecorder, DEFAULT_OOM_RECORD_MAX_NUMBER},
    predictor::{MetricSelector, StaticPredictor},
    store::{EventType, ObjectStore},
    WorkloadScalingObject, WorkloadScalingStatus,
};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Pod template of one target workload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetTemplate {
    pub namespace: String,
    pub kind: String,
    pub name: String,
    pub template: PodTemplateSpec,
}

/// Fixed predicted value served for one metric
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub metric: MetricSelector,
    pub value: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub workloads: Vec<WorkloadScalingObject>,
    #[serde(default)]
    pub pod_templates: Vec<TargetTemplate>,
    #[serde(default)]
    pub predictions: Vec<Prediction>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        serde_json::from_slice(&data)
            .with_context(|| format!("Failed to parse manifest {}", path.display()))
    }

    /// Serve every prediction of the manifest from `predictor`
    pub fn seed(&self, predictor: &StaticPredictor) {
        for prediction in &self.predictions {
            predictor.set_prediction(&prediction.metric, prediction.value);
        }
        debug!(count = self.predictions.len(), "Seeded predictions");
    }

    fn template_for(&self, obj: &WorkloadScalingObject) -> Option<&PodTemplateSpec> {
        let target = &obj.spec.target_ref;
        self.pod_templates
            .iter()
            .find(|t| {
                t.namespace == obj.namespace() && t.kind == target.kind && t.name == target.name
            })
            .map(|t| &t.template)
    }

    fn position(&self, obj: &WorkloadScalingObject) -> Option<usize> {
        self.workloads
            .iter()
            .position(|w| w.namespace() == obj.namespace() && w.name() == obj.name())
    }
}

/// Object store persisting statuses into the manifest file
pub struct FileObjectStore {
    path: PathBuf,
    manifest: RwLock<Manifest>,
}

impl FileObjectStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let manifest = Manifest::load(&path)?;
        info!(
            path = %path.display(),
            workloads = manifest.workloads.len(),
            pod_templates = manifest.pod_templates.len(),
            "Loaded manifest"
        );
        Ok(Self {
            path,
            manifest: RwLock::new(manifest),
        })
    }

    /// Snapshot of the workloads to reconcile
    pub async fn workloads(&self) -> Vec<WorkloadScalingObject> {
        self.manifest.read().await.workloads.clone()
    }

    pub async fn seed(&self, predictor: &StaticPredictor) {
        self.manifest.read().await.seed(predictor);
    }

    /// Drop a workload whose deletion has been handled
    pub async fn remove_workload(&self, obj: &WorkloadScalingObject) -> Result<()> {
        let mut manifest = self.manifest.write().await;
        if let Some(index) = manifest.position(obj) {
            manifest.workloads.remove(index);
            self.persist(&manifest).await?;
            info!(workload = %obj.key(), "Removed workload");
        }
        Ok(())
    }

    async fn persist(&self, manifest: &Manifest) -> Result<()> {
        let data = serde_json::to_vec_pretty(manifest).context("Failed to encode manifest")?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FileObjectStore {
    async fn pod_template(&self, obj: &WorkloadScalingObject) -> Result<PodTemplateSpec> {
        let manifest = self.manifest.read().await;
        match manifest.template_for(obj) {
            Some(template) => Ok(template.clone()),
            None => Err(evpa_core::Error::PodTemplateNotFound {
                kind: obj.spec.target_ref.kind.clone(),
                namespace: obj.namespace().to_string(),
                name: obj.target_name().to_string(),
            }
            .into()),
        }
    }

    async fn update_status(
        &self,
        obj: &WorkloadScalingObject,
        status: &WorkloadScalingStatus,
    ) -> Result<()> {
        let mut manifest = self.manifest.write().await;
        let Some(index) = manifest.position(obj) else {
            bail!("workload {} not found", obj.key());
        };
        manifest.workloads[index].status = status.clone();
        self.persist(&manifest).await
    }

    async fn record_event(
        &self,
        obj: &WorkloadScalingObject,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) {
        match event_type {
            EventType::Normal => {
                info!(workload = %obj.key(), reason = %reason, message = %message, "Event")
            }
            EventType::Warning => {
                warn!(workload = %obj.key(), reason = %reason, message = %message, "Event")
            }
        }
    }
}

/// OOM recorder re-reading a JSON array of records on every query
pub struct FileOomRecorder {
    path: PathBuf,
    max_records: usize,
}

impl FileOomRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_records: DEFAULT_OOM_RECORD_MAX_NUMBER,
        }
    }
}

#[async_trait]
impl OomRecorder for FileOomRecorder {
    async fn get_oom_records(&self) -> Result<Vec<OomRecord>> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };
        let records: Vec<OomRecord> = serde_json::from_slice(&data)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;

        let recorder = InMemoryOomRecorder::new();
        for record in records {
            recorder.record(record);
        }
        recorder.clean(self.max_records);
        recorder.get_oom_records().await
    }
}
