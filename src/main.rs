//! Plant Disease Detector - Main Entry Point
//!
//! Loads the leaf classifier once, then serves the upload page and JSON API.

use anyhow::{Context, Result};
use clap::Parser;
use plant_disease_detector::{
    config::{AppConfig, LoggingConfig},
    metrics::{InferenceMetrics, MetricsReporter},
    models::{inference::InferencePipeline, loader::shared_classifier},
    server::{self, AppState},
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Plant disease detection web UI
#[derive(Parser, Debug)]
#[command(name = "plant-disease-detector", version, about)]
struct Cli {
    /// Configuration file (defaults to config/config.toml when present)
    #[arg(short, long, env = "PLANT_DETECTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Path to the ONNX model
    #[arg(short, long)]
    model: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = AppConfig::load_from(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(model) = cli.model {
        config.model.path = model;
    }

    init_tracing(&config.logging)?;
    info!("Starting Plant Disease Detector v{}", env!("CARGO_PKG_VERSION"));
    info!(
        model = %config.model.path.display(),
        input_size = config.model.input_size,
        layout = ?config.model.layout,
        activation = ?config.model.activation,
        "Configuration loaded"
    );

    // The server cannot run without a model: fail before binding
    let classifier = shared_classifier(&config.model).map_err(|e| {
        error!(error = %e, "Failed to load classifier");
        e
    })?;
    let pipeline = InferencePipeline::from_config(&config, classifier)?;
    info!(
        classes = pipeline.labels().len(),
        model = %pipeline.model_name(),
        "Inference pipeline ready"
    );

    let metrics = Arc::new(InferenceMetrics::new());
    if config.metrics.report_interval_secs > 0 {
        let reporter = MetricsReporter::new(metrics.clone(), config.metrics.report_interval_secs);
        tokio::spawn(reporter.start());
    }

    let state = Arc::new(AppState::new(pipeline, metrics.clone()));
    let app = server::router(state, config.server.body_limit_bytes);

    server::serve(&config.bind_address(), app, shutdown_signal())
        .await
        .with_context(|| format!("Server on {} failed", config.bind_address()))?;

    info!("Shutting down...");
    metrics.print_summary();

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(format!(
            "plant_disease_detector={level},tower_http={level}",
            level = logging.level
        ))
    })?;

    if logging.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
