//! Runtime context construction
//!
//! A [`ContextLoader`] turns a downloaded model file into a [`ContextHandle`].
//! The default loader opens the file, validates its GGUF header and records
//! the tuning the context was built with.

use super::descriptor::{AssetDescriptor, TuningParams};
use super::metadata::{GGUF_HEADER_LEN, GgufHeader, parse_gguf_header};
use crate::error::{AcquireError, AcquireResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Handle to an initialized runtime context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextHandle {
    pub model_id: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub header: GgufHeader,
    /// Tuning the context was constructed with
    pub tuning: TuningParams,
    pub loaded_at: DateTime<Utc>,
}

// ============================================================================
// Trait Definitions
// ============================================================================

/// Trait for building a runtime context from a model file
#[async_trait]
pub trait ContextLoader: Send + Sync {
    async fn load(&self, descriptor: &AssetDescriptor) -> AcquireResult<ContextHandle>;
}

// ============================================================================
// Production Implementation
// ============================================================================

/// Configuration for the GGUF loader
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Timeout for opening and validating the model file
    pub load_timeout: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            load_timeout: Duration::from_secs(120),
        }
    }
}

/// Loader that validates the GGUF header of the model file
///
/// Ensures only one load runs at a time via mutex
pub struct GgufContextLoader {
    config: LoaderConfig,
    lock: Mutex<()>,
}

impl GgufContextLoader {
    /// Create a new loader with default configuration
    pub fn new() -> Self {
        Self::with_config(LoaderConfig::default())
    }

    /// Create a new loader with custom configuration
    pub fn with_config(config: LoaderConfig) -> Self {
        Self {
            config,
            lock: Mutex::new(()),
        }
    }

    async fn read_header(descriptor: &AssetDescriptor) -> AcquireResult<(GgufHeader, u64)> {
        let mut file = tokio::fs::File::open(&descriptor.local_path)
            .await
            .map_err(|e| {
                AcquireError::InitializationFailed(format!(
                    "cannot open {}: {}",
                    descriptor.local_path.display(),
                    e
                ))
            })?;

        let size_bytes = file.metadata().await?.len();

        let mut prefix = [0u8; GGUF_HEADER_LEN];
        file.read_exact(&mut prefix).await.map_err(|e| {
            AcquireError::InitializationFailed(format!("cannot read model header: {}", e))
        })?;

        let header = parse_gguf_header(&prefix).map_err(AcquireError::InitializationFailed)?;
        Ok((header, size_bytes))
    }
}

impl Default for GgufContextLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContextLoader for GgufContextLoader {
    async fn load(&self, descriptor: &AssetDescriptor) -> AcquireResult<ContextHandle> {
        let _guard = self.lock.lock().await;

        tracing::debug!(
            model_id = %descriptor.id,
            path = %descriptor.local_path.display(),
            "Loading model context"
        );

        let (header, size_bytes) =
            match timeout(self.config.load_timeout, Self::read_header(descriptor)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(AcquireError::InitializationFailed(format!(
                        "timeout after {}s waiting for model to load",
                        self.config.load_timeout.as_secs()
                    )));
                }
            };

        tracing::info!(
            model_id = %descriptor.id,
            gguf_version = header.version,
            tensors = header.tensor_count,
            size_bytes,
            "Model context ready"
        );

        Ok(ContextHandle {
            model_id: descriptor.id.clone(),
            path: descriptor.local_path.clone(),
            size_bytes,
            header,
            tuning: descriptor.active_tuning.clone(),
            loaded_at: Utc::now(),
        })
    }
}

// ============================================================================
// Test Implementation
// ============================================================================


#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::metadata::encode_gguf_header;

    fn descriptor_at(path: PathBuf) -> AssetDescriptor {
        AssetDescriptor::new(
            "tiny.gguf".to_string(),
            "Tiny".to_string(),
            "https://example.com/tiny.gguf".to_string(),
            path,
        )
    }

    #[test]
    fn test_loader_config_default() {
        let config = LoaderConfig::default();
        assert_eq!(config.load_timeout, Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_load_valid_gguf() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("tiny.gguf");
        let mut bytes = encode_gguf_header(&GgufHeader {
            version: 3,
            tensor_count: 12,
            metadata_kv_count: 4,
        });
        bytes.extend_from_slice(&[7u8; 100]);
        std::fs::write(&path, &bytes).unwrap();

        let mut descriptor = descriptor_at(path.clone());
        descriptor
            .active_tuning
            .insert("temperature".to_string(), 0.7);

        let handle = GgufContextLoader::new().load(&descriptor).await.unwrap();
        assert_eq!(handle.model_id, "tiny.gguf");
        assert_eq!(handle.path, path);
        assert_eq!(handle.size_bytes, bytes.len() as u64);
        assert_eq!(handle.header.tensor_count, 12);
        assert_eq!(handle.tuning["temperature"], 0.7);
    }

    #[tokio::test]
    async fn test_load_rejects_non_gguf() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("notes.txt");
        std::fs::write(&path, "this is definitely not a model file").unwrap();

        let err = GgufContextLoader::new()
            .load(&descriptor_at(path))
            .await
            .unwrap_err();
        assert!(matches!(err, AcquireError::InitializationFailed(_)));
        assert!(err.to_string().contains("magic"));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = GgufContextLoader::new()
            .load(&descriptor_at(temp_dir.path().join("gone.gguf")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot open"));
    }

    #[tokio::test]
    async fn test_flaky_loader_recovers() {
        let loader = mocks::FlakyLoader::new(1);
        let descriptor = descriptor_at(PathBuf::from("/unused"));
        assert!(loader.load(&descriptor).await.is_err());
        assert!(loader.load(&descriptor).await.is_ok());
        assert_eq!(loader.calls(), 2);
    }
}
