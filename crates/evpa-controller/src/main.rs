//! EVPA controller - effective vertical pod autoscaling
//!
//! This binary periodically reconciles every workload scaling object of its
//! manifest: it runs the configured estimators, gates the recommendations
//! through the scaling policies and writes back the status.

use anyhow::{Context, Result};
use evpa_controller::{
    api::{self, AppState},
    config::ControllerConfig,
    resync::reconcile_all,
    store::{FileObjectStore, FileOomRecorder},
};
use evpa_core::{
    estimator::EstimatorRegistry,
    health::HealthRegistry,
    observability::{ControllerMetrics, StructuredLogger},
    oom::{InMemoryOomRecorder, OomRecorder},
    predictor::StaticPredictor,
    Reconciler,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const CONTROLLER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting evpa-controller");

    let config = ControllerConfig::load()?;
    info!(
        controller = %config.controller_name,
        manifest = %config.manifest_path.display(),
        "Controller configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let metrics = ControllerMetrics::new();
    let logger = StructuredLogger::new(&config.controller_name);

    let store = FileObjectStore::open(&config.manifest_path)
        .context("Failed to open object store")?;
    let predictor = Arc::new(StaticPredictor::new());
    store.seed(&predictor).await;

    let oom_recorder: Arc<dyn OomRecorder> = match &config.oom_record_path {
        Some(path) => Arc::new(FileOomRecorder::new(path)),
        None => Arc::new(InMemoryOomRecorder::new()),
    };

    let registry = EstimatorRegistry::new(predictor, oom_recorder);
    let reconciler =
        Reconciler::new(registry, logger.clone()).with_resync_period(config.resync_period());

    logger.log_startup(CONTROLLER_VERSION, store.workloads().await.len());

    let app_state = Arc::new(AppState::new(health_registry.clone(), metrics));
    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let mut ticker = tokio::time::interval(config.resync_period());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                reconcile_all(&reconciler, &store, &health_registry).await;
            }
            _ = tokio::signal::ctrl_c() => {
                logger.log_shutdown("SIGINT received");
                break;
            }
        }
    }

    health_registry.set_ready(false).await;
    api_handle.abort();
    info!("Shutting down");

    Ok(())
}
