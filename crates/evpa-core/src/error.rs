//! Error types for estimation, decision and reconciliation

use crate::resource::ResourceName;
use thiserror::Error;

/// Errors produced by the evpa core
#[derive(Debug, Error)]
pub enum Error {
    /// The workload scaling object is malformed; fatal to the whole pass
    #[error("validation failed: {0}")]
    Validation(String),

    /// The prediction backend answered without any samples
    #[error("all resource predictions failed: {0}")]
    NoPredictedValues(String),

    /// `workload.<name>` override could not be parsed as a float
    #[error("parse bump up ratio {value:?} failed: {source}")]
    InvalidBumpRatio {
        value: String,
        #[source]
        source: std::num::ParseFloatError,
    },

    /// A ratio was requested against a zero quantity
    #[error("{0} resource is zero")]
    ZeroResource(ResourceName),

    #[error("invalid quantity {input:?}: {reason}")]
    QuantityParse { input: String, reason: &'static str },

    /// The prediction backend could not be queried
    #[error("predictor error: {0:#}")]
    Predictor(anyhow::Error),

    #[error("oom recorder error: {0:#}")]
    OomRecorder(anyhow::Error),

    #[error("object store error: {0:#}")]
    Store(anyhow::Error),

    #[error("pod template for {kind} {namespace}/{name} not found")]
    PodTemplateNotFound {
        kind: String,
        namespace: String,
        name: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
