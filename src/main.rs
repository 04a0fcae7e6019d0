//! Model Bootstrap - Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use model_bootstrap::models::{GgufContextLoader, LoaderConfig};
use model_bootstrap::{
    AcquisitionPipeline, BootstrapConfig, ModelRegistry, PipelineOutcome, StorageCheck,
    TracingStatusSink, metrics,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "model-bootstrap")]
#[command(about = "Download, verify and initialize an on-device model", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override models directory
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "json")]
    log_format: String,

    /// Print Prometheus metrics to stdout before exiting
    #[arg(long)]
    print_metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    match cli.log_format.as_str() {
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .json()
                .init();
        }
    }

    tracing::info!("Starting Model Bootstrap");

    // Load configuration
    let mut config = BootstrapConfig::load(cli.config)?;

    // CLI overrides
    if let Some(models_dir) = cli.models_dir {
        config.asset.models_dir = models_dir;
    }

    config.validate()?;

    tracing::info!(
        model_id = %config.asset.model_id,
        models_dir = ?config.asset.models_dir,
        model_url = %config.asset.model_url,
        "Configuration loaded"
    );

    // Setup metrics
    let prometheus_handle = metrics::setup_metrics()?;

    // One-shot storage check, warning only
    let storage = StorageCheck::new(
        config.descriptor(),
        config.asset.models_dir.clone(),
        &config.storage,
    );
    let cancel = CancellationToken::new();
    if let Some(status) = storage.check(&cancel).await
        && !status.is_ok
    {
        tracing::warn!(message = %status.message, "Storage check");
    }

    let loader = GgufContextLoader::with_config(LoaderConfig {
        load_timeout: config.init.load_timeout(),
    });
    let registry = Arc::new(ModelRegistry::new_with_loader(Arc::new(loader)));
    let pipeline = AcquisitionPipeline::from_config(&config, registry.clone())
        .context("Failed to build acquisition pipeline")?;

    let outcome = tokio::select! {
        outcome = pipeline.ensure_ready(&TracingStatusSink) => Some(outcome),
        _ = shutdown_signal() => None,
    };

    if cli.print_metrics {
        println!("{}", prometheus_handle.render());
    }

    match outcome {
        Some(PipelineOutcome::AlreadyReady) => {
            tracing::info!("Model already initialized");
        }
        Some(PipelineOutcome::Ready(handle)) => {
            tracing::info!(
                model_id = %handle.model_id,
                path = ?handle.path,
                size_bytes = handle.size_bytes,
                gguf_version = handle.header.version,
                tensors = handle.header.tensor_count,
                "Model ready"
            );
        }
        Some(PipelineOutcome::Fatal {
            attempts,
            last_error,
        }) => {
            anyhow::bail!(
                "model could not be prepared after {} attempts: {}",
                attempts,
                last_error
            );
        }
        None => {
            tracing::info!("Shutting down...");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
