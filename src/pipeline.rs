//! End-to-end "ensure model ready" pipeline
//!
//! ```text
//! active context? ──yes──▶ ready
//!        │no
//!        ▼
//! valid on disk? ──yes──▶ initialize ──▶ ready
//!        │no
//!        ▼
//! download ──▶ verify ──▶ initialize ──▶ ready
//! ```
//!
//! The whole sequence after the active-context check is wrapped in an outer
//! bounded retry, independent of the download and initialization retries.
//! Exhausting it is reported through [`StatusSink::on_fatal`], never as an
//! error: the caller is a loading screen that only shows status text.

use crate::config::BootstrapConfig;
use crate::error::{AcquireError, AcquireResult};
use crate::init::{ContextInitializer, InitSettings};
use crate::models::{
    AssetDescriptor, AssetVerifier, ContextHandle, DownloadOrchestrator, DownloadSettings,
    ModelStore,
};
use crate::preflight::{NetworkPreflightChecker, Preflight};
use crate::telemetry::TransferStats;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

pub const STATUS_CHECKING: &str = "Checking model...";
pub const STATUS_DOWNLOADING: &str = "Downloading model...";
pub const STATUS_INITIALIZING: &str = "Initializing model...";
pub const STATUS_RETRYING: &str = "Retrying...";
pub const STATUS_RESTART: &str = "Please restart the app";

/// Lifecycle of the model asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitializationState {
    NotStarted,
    Downloading,
    Verifying,
    Initializing,
    Ready,
    Failed,
}

impl std::fmt::Display for InitializationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Downloading => write!(f, "downloading"),
            Self::Verifying => write!(f, "verifying"),
            Self::Initializing => write!(f, "initializing"),
            Self::Ready => write!(f, "ready"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Receiver of user-facing status updates
pub trait StatusSink: Send + Sync {
    fn on_status(&self, text: &str);

    /// Progress fraction in `[0, 1]`
    fn on_progress(&self, fraction: f64);

    fn on_ready(&self);

    fn on_fatal(&self, message: &str);
}

/// Status sink that writes to the log
pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    fn on_status(&self, text: &str) {
        tracing::info!(status = %text, "Model status");
    }

    fn on_progress(&self, fraction: f64) {
        tracing::debug!(progress = fraction, "Model progress");
    }

    fn on_ready(&self) {
        tracing::info!("Model ready");
    }

    fn on_fatal(&self, message: &str) {
        tracing::error!(message = %message, "Model could not be prepared");
    }
}

/// Download status text, produced only when the whole percent changes
#[derive(Debug, Default)]
struct PercentStatus {
    last: Option<u8>,
}

impl PercentStatus {
    fn update(&mut self, stats: &TransferStats) -> Option<String> {
        let percent = stats.percent();
        if self.last == Some(percent) {
            return None;
        }
        self.last = Some(percent);
        Some(format!("{} {}%", STATUS_DOWNLOADING, percent))
    }
}

/// Final result of [`AcquisitionPipeline::ensure_ready`]
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// A context for the asset was already active
    AlreadyReady,
    Ready(ContextHandle),
    /// Every outer attempt failed
    Fatal { attempts: u32, last_error: String },
}

/// Outer retry bounds
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Ensures the model is on disk, valid, and loaded into a runtime context
pub struct AcquisitionPipeline {
    descriptor: AssetDescriptor,
    store: Arc<dyn ModelStore>,
    downloader: DownloadOrchestrator,
    initializer: ContextInitializer,
    settings: PipelineSettings,
    state: RwLock<InitializationState>,
    /// At most one acquisition at a time for this asset
    lock: Mutex<()>,
}

impl AcquisitionPipeline {
    pub fn new(
        descriptor: AssetDescriptor,
        store: Arc<dyn ModelStore>,
        downloader: DownloadOrchestrator,
        initializer: ContextInitializer,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            descriptor,
            store,
            downloader,
            initializer,
            settings,
            state: RwLock::new(InitializationState::NotStarted),
            lock: Mutex::new(()),
        }
    }

    /// Build a pipeline with the given preflight implementation
    pub fn new_with_preflight(
        config: &BootstrapConfig,
        store: Arc<dyn ModelStore>,
        preflight: Arc<dyn Preflight>,
    ) -> AcquireResult<Self> {
        let downloader =
            DownloadOrchestrator::new(preflight, DownloadSettings::from(&config.download))
                .map_err(|e| AcquireError::TransferFailed {
                    reason: format!("failed to build HTTP client: {}", e),
                    retryable: false,
                })?;
        let initializer = ContextInitializer::new(store.clone(), InitSettings::from(&config.init));

        Ok(Self::new(
            config.descriptor(),
            store,
            downloader,
            initializer,
            PipelineSettings {
                max_retries: config.pipeline.max_retries,
                retry_delay: config.pipeline.retry_delay(),
            },
        ))
    }

    /// Build a pipeline with socket-based connectivity probes
    pub fn from_config(config: &BootstrapConfig, store: Arc<dyn ModelStore>) -> AcquireResult<Self> {
        let preflight = NetworkPreflightChecker::new(&config.preflight).map_err(|e| {
            AcquireError::TransferFailed {
                reason: format!("failed to build HTTP client: {}", e),
                retryable: false,
            }
        })?;
        Self::new_with_preflight(config, store, Arc::new(preflight))
    }

    pub fn descriptor(&self) -> &AssetDescriptor {
        &self.descriptor
    }

    /// Current lifecycle state
    pub async fn state(&self) -> InitializationState {
        *self.state.read().await
    }

    async fn set_state(&self, state: InitializationState) {
        let mut current = self.state.write().await;
        if *current != state {
            tracing::debug!(
                model_id = %self.descriptor.id,
                from = %*current,
                to = %state,
                "Model state change"
            );
            *current = state;
        }
    }

    /// Make sure the model is ready, reporting progress to `sink`
    pub async fn ensure_ready(&self, sink: &dyn StatusSink) -> PipelineOutcome {
        let _guard = self.lock.lock().await;
        let model_id = self.descriptor.id.as_str();

        sink.on_status(STATUS_CHECKING);

        if self.store.has_active_context(model_id).await {
            tracing::info!(model_id = %model_id, "Model context already active");
            self.set_state(InitializationState::Ready).await;
            crate::metrics::record_pipeline_outcome(model_id, "already_ready");
            sink.on_ready();
            return PipelineOutcome::AlreadyReady;
        }

        let mut retries = 0u32;
        loop {
            match self.acquire_once(sink).await {
                Ok(handle) => {
                    self.set_state(InitializationState::Ready).await;
                    crate::metrics::record_pipeline_outcome(model_id, "ready");
                    sink.on_ready();
                    return PipelineOutcome::Ready(handle);
                }
                Err(e) => {
                    // The failed stage stays current while a retry is pending
                    if retries >= self.settings.max_retries {
                        self.set_state(InitializationState::Failed).await;
                        tracing::error!(
                            model_id = %model_id,
                            error = %e,
                            attempts = retries + 1,
                            "Model preparation failed"
                        );
                        crate::metrics::record_pipeline_outcome(model_id, "fatal");
                        sink.on_status(STATUS_RESTART);
                        sink.on_fatal(STATUS_RESTART);
                        return PipelineOutcome::Fatal {
                            attempts: retries + 1,
                            last_error: e.to_string(),
                        };
                    }

                    retries += 1;
                    crate::metrics::record_pipeline_retry(model_id);
                    tracing::warn!(
                        model_id = %model_id,
                        error = %e,
                        retry = retries,
                        max_retries = self.settings.max_retries,
                        "Model preparation failed, retrying"
                    );
                    sink.on_status(STATUS_RETRYING);
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
            }
        }
    }

    /// One pass: initialize from disk, or download, verify and initialize
    async fn acquire_once(&self, sink: &dyn StatusSink) -> AcquireResult<ContextHandle> {
        self.set_state(InitializationState::Verifying).await;

        if AssetVerifier::is_valid(&self.descriptor.local_path).await {
            tracing::info!(model_id = %self.descriptor.id, "Model found on disk");
            sink.on_status(STATUS_INITIALIZING);
            sink.on_progress(1.0);
            self.set_state(InitializationState::Initializing).await;
            return self.initializer.initialize(&self.descriptor).await;
        }

        self.set_state(InitializationState::Downloading).await;
        sink.on_status(STATUS_DOWNLOADING);

        let mut descriptor = self.descriptor.clone();
        let mut percent = PercentStatus::default();
        self.downloader
            .download(&mut descriptor, |stats| {
                sink.on_progress(stats.progress);
                if let Some(text) = percent.update(stats) {
                    sink.on_status(&text);
                }
            })
            .await?;

        self.set_state(InitializationState::Verifying).await;
        if !AssetVerifier::is_valid(&descriptor.local_path).await {
            return Err(AcquireError::CorruptArtifact {
                path: descriptor.local_path.clone(),
            });
        }

        sink.on_status(STATUS_INITIALIZING);
        self.set_state(InitializationState::Initializing).await;
        self.initializer.initialize(&descriptor).await
    }
}
