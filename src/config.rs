//! Configuration structures and loading logic

use crate::models::{AssetDescriptor, TuningParams, default_models_dir};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level bootstrap configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub asset: AssetConfig,
    pub preflight: PreflightConfig,
    pub download: DownloadConfig,
    pub init: InitConfig,
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
}

impl BootstrapConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if let Ok(url) = std::env::var("MODEL_BOOTSTRAP_MODEL_URL") {
            config.asset.model_url = url;
        }
        if let Ok(dir) = std::env::var("MODEL_BOOTSTRAP_MODELS_DIR") {
            config.asset.models_dir = PathBuf::from(dir);
        }
        if let Ok(retries) = std::env::var("MODEL_BOOTSTRAP_DOWNLOAD_MAX_RETRIES") {
            config.download.max_retries = retries
                .parse()
                .context("Invalid MODEL_BOOTSTRAP_DOWNLOAD_MAX_RETRIES value")?;
        }
        if let Ok(retries) = std::env::var("MODEL_BOOTSTRAP_PIPELINE_MAX_RETRIES") {
            config.pipeline.max_retries = retries
                .parse()
                .context("Invalid MODEL_BOOTSTRAP_PIPELINE_MAX_RETRIES value")?;
        }

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.asset.model_url)
            .with_context(|| format!("Invalid model URL: {}", self.asset.model_url))?;
        if url.scheme() != "https" && url.scheme() != "http" {
            anyhow::bail!("Model URL must be http or https (got {})", url.scheme());
        }

        if self.asset.model_id.is_empty() {
            anyhow::bail!("Model id cannot be empty");
        }
        if self.asset.model_id.contains('/') || self.asset.model_id.contains('\\') {
            anyhow::bail!(
                "Model id '{}' cannot contain path separators",
                self.asset.model_id
            );
        }

        if self.init.max_attempts == 0 {
            anyhow::bail!("init.max_attempts must be at least 1");
        }
        if self.preflight.probe_timeout_secs == 0 {
            anyhow::bail!("preflight.probe_timeout_secs must be greater than 0");
        }

        if !self.asset.models_dir.exists() {
            std::fs::create_dir_all(&self.asset.models_dir).with_context(|| {
                format!(
                    "Cannot create models directory: {:?}",
                    self.asset.models_dir
                )
            })?;
        }

        Ok(())
    }

    /// Build the descriptor for the configured asset
    pub fn descriptor(&self) -> AssetDescriptor {
        AssetDescriptor::new(
            self.asset.model_id.clone(),
            self.asset.name.clone(),
            self.asset.model_url.clone(),
            self.asset.local_path(),
        )
    }
}

/// The model file to acquire
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AssetConfig {
    /// Stable registry key, also used as the file name
    pub model_id: String,
    pub name: String,
    pub model_url: String,
    pub models_dir: PathBuf,
}

impl AssetConfig {
    pub fn local_path(&self) -> PathBuf {
        self.models_dir.join(&self.model_id)
    }
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            model_id: default_model_id(),
            name: "Default Llama Model".to_string(),
            model_url: default_model_url(),
            models_dir: default_models_dir(),
        }
    }
}

/// Connectivity probe settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PreflightConfig {
    /// Address used to check for a default route (UDP connect, nothing is sent)
    pub route_probe_addr: String,
    /// TCP endpoint whose reachability means "internet is reachable"
    pub reachability_addr: String,
    pub probe_timeout_secs: u64,
}

impl PreflightConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            route_probe_addr: "1.1.1.1:53".to_string(),
            reachability_addr: "1.1.1.1:443".to_string(),
            probe_timeout_secs: 10,
        }
    }
}

/// Download-layer retry settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DownloadConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub connect_timeout_secs: u64,
}

impl DownloadConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 5000,
            connect_timeout_secs: 30,
        }
    }
}

/// Context initialization settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct InitConfig {
    /// Pause after a large write before the file is reopened
    pub settle_delay_ms: u64,
    pub max_attempts: u32,
    pub attempt_delay_ms: u64,
    pub load_timeout_secs: u64,
    /// Tuning applied before the first context construction
    pub cold_start_tuning: TuningParams,
}

impl InitConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn attempt_delay(&self) -> Duration {
        Duration::from_millis(self.attempt_delay_ms)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 2000,
            max_attempts: 3,
            attempt_delay_ms: 3000,
            load_timeout_secs: 120,
            cold_start_tuning: default_cold_start_tuning(),
        }
    }
}

/// Outer whole-pipeline retry settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl PipelineConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 5000,
        }
    }
}

/// Free-space check settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub check_interval_secs: u64,
    /// Size assumed before the server has reported one; 0 disables the check
    pub expected_size_bytes: u64,
}

impl StorageConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 30,
            // Rough size of the default Q4_K_M 1B model
            expected_size_bytes: 810_000_000,
        }
    }
}

// Default functions
fn default_model_id() -> String {
    "Llama-3.2-1B-Instruct-Q4_K_M.gguf".to_string()
}
fn default_model_url() -> String {
    "https://flash-app-bucket.s3.us-east-1.amazonaws.com/offline_model/Llama-3.2-1B-Instruct-Q4_K_M.gguf"
        .to_string()
}
fn default_cold_start_tuning() -> TuningParams {
    TuningParams::from([
        ("n_predict".to_string(), 128.0),
        ("temperature".to_string(), 0.7),
        ("top_k".to_string(), 20.0),
        ("top_p".to_string(), 0.9),
    ])
}
