//! Runtime context initialization
//!
//! Registers the model with the store, applies cold-start tuning and makes
//! a bounded number of attempts to construct a context.

use crate::config::InitConfig;
use crate::error::{AcquireError, AcquireResult, RetryStage};
use crate::models::{AssetDescriptor, AssetVerifier, ContextHandle, ModelStore, TuningParams};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Timing and bounds for context initialization
#[derive(Debug, Clone)]
pub struct InitSettings {
    pub settle_delay: Duration,
    pub max_attempts: u32,
    pub attempt_delay: Duration,
    pub cold_start_tuning: TuningParams,
}

impl Default for InitSettings {
    fn default() -> Self {
        Self::from(&InitConfig::default())
    }
}

impl From<&InitConfig> for InitSettings {
    fn from(config: &InitConfig) -> Self {
        Self {
            settle_delay: config.settle_delay(),
            max_attempts: config.max_attempts,
            attempt_delay: config.attempt_delay(),
            cold_start_tuning: config.cold_start_tuning.clone(),
        }
    }
}

/// Builds the runtime context for a downloaded model
pub struct ContextInitializer {
    store: Arc<dyn ModelStore>,
    settings: InitSettings,
}

impl ContextInitializer {
    pub fn new(store: Arc<dyn ModelStore>, settings: InitSettings) -> Self {
        Self { store, settings }
    }

    /// Initialize a runtime context from the descriptor's local file
    ///
    /// Fails with [`AcquireError::AssetMissing`] when the file is missing or
    /// empty after the settle delay, and with [`AcquireError::Exhausted`]
    /// once every construction attempt has failed.
    pub async fn initialize(&self, descriptor: &AssetDescriptor) -> AcquireResult<ContextHandle> {
        sleep(self.settings.settle_delay).await;

        let Some(size_bytes) = AssetVerifier::size(&descriptor.local_path)
            .await
            .filter(|size| *size > 0)
        else {
            tracing::warn!(
                model_id = %descriptor.id,
                path = %descriptor.local_path.display(),
                "Model file missing or empty, nothing to initialize"
            );
            return Err(AcquireError::AssetMissing {
                path: descriptor.local_path.clone(),
            });
        };

        let mut descriptor = descriptor.clone();
        descriptor.mark_downloaded(size_bytes);

        if self.store.register(&descriptor).await {
            tracing::info!(model_id = %descriptor.id, "Registered model");
        } else {
            tracing::debug!(model_id = %descriptor.id, "Model already registered");
        }

        self.store
            .set_active_tuning(&descriptor.id, &self.settings.cold_start_tuning)
            .await;
        descriptor.apply_tuning(&self.settings.cold_start_tuning);

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.store.construct_context(&descriptor).await {
                Ok(handle) => {
                    crate::metrics::record_init_attempt(&descriptor.id, true);
                    tracing::info!(
                        model_id = %descriptor.id,
                        attempts,
                        "Model context initialized"
                    );
                    return Ok(handle);
                }
                Err(e) => {
                    crate::metrics::record_init_attempt(&descriptor.id, false);
                    if attempts >= self.settings.max_attempts {
                        tracing::error!(
                            model_id = %descriptor.id,
                            attempts,
                            error = %e,
                            "Model context initialization failed"
                        );
                        return Err(AcquireError::Exhausted {
                            stage: RetryStage::Initialization,
                            attempts,
                            source: Box::new(e),
                        });
                    }
                    tracing::warn!(
                        model_id = %descriptor.id,
                        attempt = attempts,
                        max_attempts = self.settings.max_attempts,
                        error = %e,
                        "Model context initialization failed, retrying"
                    );
                    sleep(self.settings.attempt_delay).await;
                }
            }
        }
    }
}
