//! OOM-kill records and the recorder interface

use crate::resource::MilliQuantity;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::debug;

/// Default upper bound on retained records
pub const DEFAULT_OOM_RECORD_MAX_NUMBER: usize = 10_000;

/// One observed out-of-memory kill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OomRecord {
    pub namespace: String,
    pub pod: String,
    pub container: String,
    /// Memory request of the container when it was killed
    pub memory: MilliQuantity,
    pub oom_at: DateTime<Utc>,
}

/// Source of recent OOM-kill records
#[async_trait]
pub trait OomRecorder: Send + Sync {
    async fn get_oom_records(&self) -> Result<Vec<OomRecord>>;
}

/// Recorder keeping records in memory
#[derive(Debug, Default)]
pub struct InMemoryOomRecorder {
    records: Mutex<Vec<OomRecord>>,
}

impl InMemoryOomRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<OomRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    /// Record a kill. An existing record for the same pod/container is only
    /// overwritten when the new kill happened at a higher memory level.
    pub fn record(&self, record: OomRecord) {
        let mut records = self.records.lock().unwrap();
        let existing = records.iter_mut().find(|r| {
            r.namespace == record.namespace
                && r.pod == record.pod
                && r.container == record.container
        });

        match existing {
            Some(saved) => {
                if record.memory.value() > saved.memory.value() {
                    saved.memory = record.memory;
                    saved.oom_at = record.oom_at;
                }
            }
            None => {
                debug!(
                    namespace = %record.namespace,
                    pod = %record.pod,
                    container = %record.container,
                    memory = %record.memory,
                    "Recorded oom kill"
                );
                records.push(record);
            }
        }
    }

    /// Keep at most `max` records, dropping the oldest kills first
    pub fn clean(&self, max: usize) {
        let mut records = self.records.lock().unwrap();
        if records.len() > max {
            records.sort_by_key(|r| r.oom_at);
            let excess = records.len() - max;
            records.drain(..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl OomRecorder for InMemoryOomRecorder {
    async fn get_oom_records(&self) -> Result<Vec<OomRecord>> {
        Ok(self.records.lock().unwrap().clone())
    }
}
