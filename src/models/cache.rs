//! Local model file detection
//!
//! One fixed file per model under an application-private directory:
//! ```text
//! <data_local_dir>/model-bootstrap/models/
//! ├── Llama-3.2-1B-Instruct-Q4_K_M.gguf
//! └── Llama-3.2-1B-Instruct-Q4_K_M.gguf.part   (only while downloading)
//! ```

use std::path::{Path, PathBuf};

/// Get the default models directory
///
/// Checks in order:
/// 1. `$MODEL_BOOTSTRAP_HOME/models`
/// 2. `<data_local_dir>/model-bootstrap/models`
/// 3. `./model-bootstrap/models`
pub fn default_models_dir() -> PathBuf {
    if let Ok(home) = std::env::var("MODEL_BOOTSTRAP_HOME") {
        return PathBuf::from(home).join("models");
    }

    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("model-bootstrap")
        .join("models")
}

/// Path of the in-flight download for `path`
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Existence and size checks for downloaded model files
///
/// A stat failure is treated as "not there" rather than propagated.
pub struct AssetVerifier;

impl AssetVerifier {
    /// Whether a file exists at `path`
    pub async fn exists(path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Size of the file at `path`, if it can be read
    pub async fn size(path: &Path) -> Option<u64> {
        match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => Some(metadata.len()),
            _ => None,
        }
    }

    /// Whether the file exists and is non-empty
    pub async fn is_valid(path: &Path) -> bool {
        Self::size(path).await.is_some_and(|size| size > 0)
    }
}
