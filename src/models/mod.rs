//! Model management module
//!
//! Provides functionality for:
//! - Describing the model file (identity, location, tuning)
//! - Detecting and validating the file on local storage
//! - Downloading it with preflight checks and bounded retries
//! - Parsing the GGUF header
//! - Tracking registered models and the active runtime context

pub mod cache;
pub mod descriptor;
pub mod download;
pub mod loader;
pub mod metadata;
pub mod registry;

pub use cache::{AssetVerifier, default_models_dir, partial_path};
pub use descriptor::{AssetDescriptor, TuningParams};
pub use download::{DownloadOrchestrator, DownloadSession, DownloadSettings};
pub use loader::{ContextHandle, ContextLoader, GgufContextLoader, LoaderConfig};
pub use metadata::{GgufHeader, parse_gguf_header};
pub use registry::{ModelEntry, ModelRegistry, ModelStore};
