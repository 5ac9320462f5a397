//! Core library for effective vertical pod autoscaling
//!
//! This crate provides the core functionality for:
//! - Pluggable resource estimators and their registry
//! - Priority ranking and aggregation of estimations
//! - Scaling decisions with thresholds, cool-downs and tolerance smoothing
//! - The per-object reconciliation pass
//! - Health checks and observability

pub mod aggregation;
pub mod decision;
pub mod defaults;
pub mod error;
pub mod estimator;
pub mod health;
pub mod models;
pub mod observability;
pub mod oom;
pub mod predictor;
pub mod reconciler;
pub mod resource;
pub mod store;

pub use error::{Error, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
    WorkloadHealth,
};
pub use models::*;
pub use observability::{ControllerMetrics, StructuredLogger};
pub use reconciler::{ReconcileOutcome, Reconciler};
