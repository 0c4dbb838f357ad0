//! Textgen Server - Main Entry Point
//!
//! Loads the pipeline described by the YAML file, then serves it over HTTP
//! until interrupted.

use std::sync::Arc;
use textgen_common::{PipelineSpecFile, Result, ServiceConfig, TextgenError};
use textgen_pipeline::{InvokeScheduler, Pipeline, SchedulerConfig};
use textgen_server::{create_app, init_tracing, AppState};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting Textgen Server");

    // Load configuration
    let config = ServiceConfig::from_env()?;
    let spec = PipelineSpecFile::from_file(&config.pipeline_config)?;

    info!(
        "Configuration loaded: app={}, pipeline={}, bind={}:{}",
        config.app_name,
        config.pipeline_config.display(),
        config.bind_address,
        config.port
    );

    // Model loading is blocking I/O and compute
    let pipeline = {
        let spec = spec.pipeline.clone();
        tokio::task::spawn_blocking(move || Pipeline::from_spec(&spec))
            .await
            .map_err(|e| TextgenError::internal(format!("Pipeline bootstrap failed: {}", e)))??
    };

    let scheduler = InvokeScheduler::new(
        Arc::new(pipeline),
        SchedulerConfig {
            max_pending: config.max_pending,
            queue_timeout: config.queue_timeout(),
        },
    );

    let state = AppState {
        app_name: config.app_name.clone(),
        spec: Arc::new(spec),
        scheduler: Arc::new(scheduler),
    };
    let app = create_app(state, config.root_path.as_deref());

    let addr = config.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Textgen Server listening on {}", addr);
    if let Some(root_path) = &config.root_path {
        info!("Routes also mounted under {}", root_path);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Received shutdown signal");
        })
        .await?;

    info!("Textgen Server shutdown complete");
    Ok(())
}
