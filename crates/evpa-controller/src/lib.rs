//! Controller wiring for effective vertical pod autoscaling
//!
//! Configuration, the file-backed object store and OOM recorder, the resync
//! round that drives the core reconciler, and the health/metrics API.

pub mod api;
pub mod config;
pub mod resync;
pub mod store;
