//! Model Bootstrap - on-device LLM weight acquisition
//!
//! Makes sure a single GGUF model file is present on local storage, intact,
//! and loaded into a runtime context before the app becomes usable: network
//! preflight, resumable-by-restart download with live telemetry, verification,
//! and context initialization, each with its own bounded retry.

pub mod config;
pub mod error;
pub mod init;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod preflight;
pub mod storage;
pub mod telemetry;

pub use config::BootstrapConfig;
pub use error::{AcquireError, AcquireResult, RetryStage};
pub use init::{ContextInitializer, InitSettings};
pub use models::{AssetDescriptor, ContextHandle, ModelRegistry, ModelStore};
pub use pipeline::{
    AcquisitionPipeline, InitializationState, PipelineOutcome, StatusSink, TracingStatusSink,
};
pub use preflight::{NetworkPreflightChecker, NetworkStatus, Preflight};
pub use storage::{StorageCheck, StorageStatus};
pub use telemetry::{Eta, ProgressTelemetry, TransferStats};
