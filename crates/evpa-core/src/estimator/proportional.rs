//! Proportional estimator, a fixed fraction of the current requests

use crate::resource::{MilliQuantity, ResourceList, ResourceListExt, ResourceName, MIB};

/// CPU requests at or below this many milli-cores are left alone
pub const MIN_CPU_MILLI_CORES: i64 = 100;

/// Memory requests at or below this many bytes are left alone
pub const MIN_MEMORY_BYTES: i64 = 256 * MIB;

/// Recommends half of the current request. Stateless.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProportionalEstimator;

impl ProportionalEstimator {
    pub fn estimate(&self, requests: &ResourceList) -> ResourceList {
        let mut recommended = ResourceList::new();

        let cpu = requests.cpu().milli_value();
        if cpu > MIN_CPU_MILLI_CORES {
            recommended.insert(ResourceName::Cpu, MilliQuantity::from_millis(cpu / 2));
        }

        let memory = requests.memory().value();
        if memory > MIN_MEMORY_BYTES {
            recommended.insert(ResourceName::Memory, MilliQuantity::from_value(memory / 2));
        }

        recommended
    }
}
