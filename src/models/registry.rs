//! Model registry: known models, their tuning, and the active runtime context

use super::descriptor::{AssetDescriptor, TuningParams};
use super::loader::{ContextHandle, ContextLoader, GgufContextLoader};
use crate::error::AcquireResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

// ============================================================================
// Trait Definitions
// ============================================================================

/// Narrow contract the acquisition pipeline needs from a model store
///
/// Each method is one discrete mutation or query; none of them leave the
/// store half-updated.
#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Whether a context for `model_id` is currently active
    async fn has_active_context(&self, model_id: &str) -> bool;

    /// Insert the descriptor unless an entry with the same id exists
    ///
    /// Returns `true` if the descriptor was inserted.
    async fn register(&self, descriptor: &AssetDescriptor) -> bool;

    /// Overlay tuning onto a registered model's active settings
    ///
    /// No-op returning `false` if the id is not registered.
    async fn set_active_tuning(&self, model_id: &str, params: &TuningParams) -> bool;

    /// Build a runtime context for the descriptor and make it active
    async fn construct_context(&self, descriptor: &AssetDescriptor)
    -> AcquireResult<ContextHandle>;
}

// ============================================================================
// In-memory Implementation
// ============================================================================

/// Entry for a model in the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub descriptor: AssetDescriptor,
    /// When this entry was added to the registry
    pub added_at: DateTime<Utc>,
    /// When a context was last built from this model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_loaded: Option<DateTime<Utc>>,
    /// Error message from the last failed context construction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ModelEntry {
    /// Create a new model entry
    pub fn new(descriptor: AssetDescriptor) -> Self {
        Self {
            descriptor,
            added_at: Utc::now(),
            last_loaded: None,
            last_error: None,
        }
    }
}

/// In-memory registry for tracking models and the active context
pub struct ModelRegistry {
    models: Arc<RwLock<HashMap<String, ModelEntry>>>,
    active: Arc<RwLock<Option<ContextHandle>>>,
    loader: Arc<dyn ContextLoader>,
}

impl ModelRegistry {
    /// Create a new empty registry using the GGUF loader
    pub fn new() -> Self {
        Self::new_with_loader(Arc::new(GgufContextLoader::new()))
    }

    /// Create a new empty registry with a custom context loader
    pub fn new_with_loader(loader: Arc<dyn ContextLoader>) -> Self {
        Self {
            models: Arc::new(RwLock::new(HashMap::new())),
            active: Arc::new(RwLock::new(None)),
            loader,
        }
    }

    /// Get a model entry by ID
    pub async fn get(&self, model_id: &str) -> Option<ModelEntry> {
        let models = self.models.read().await;
        models.get(model_id).cloned()
    }

    /// List all models
    pub async fn list(&self) -> Vec<ModelEntry> {
        let models = self.models.read().await;
        let mut entries: Vec<_> = models.values().cloned().collect();
        entries.sort_by(|a, b| a.descriptor.id.cmp(&b.descriptor.id));
        entries
    }

    /// Get count of models in registry
    pub async fn count(&self) -> usize {
        let models = self.models.read().await;
        models.len()
    }

    /// The currently active context, if any
    pub async fn active_context(&self) -> Option<ContextHandle> {
        self.active.read().await.clone()
    }

    /// Drop the active context
    pub async fn release_context(&self) -> Option<ContextHandle> {
        let released = self.active.write().await.take();
        if let Some(ref handle) = released {
            tracing::info!(model_id = %handle.model_id, "Released model context");
        }
        released
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelStore for ModelRegistry {
    async fn has_active_context(&self, model_id: &str) -> bool {
        let active = self.active.read().await;
        active.as_ref().is_some_and(|ctx| ctx.model_id == model_id)
    }

    async fn register(&self, descriptor: &AssetDescriptor) -> bool {
        let mut models = self.models.write().await;
        if models.contains_key(&descriptor.id) {
            return false;
        }

        models.insert(descriptor.id.clone(), ModelEntry::new(descriptor.clone()));
        tracing::info!(
            model_id = %descriptor.id,
            total_models = models.len(),
            "Model added to registry"
        );
        true
    }

    async fn set_active_tuning(&self, model_id: &str, params: &TuningParams) -> bool {
        let mut models = self.models.write().await;
        match models.get_mut(model_id) {
            Some(entry) => {
                entry.descriptor.apply_tuning(params);
                true
            }
            None => false,
        }
    }

    async fn construct_context(
        &self,
        descriptor: &AssetDescriptor,
    ) -> AcquireResult<ContextHandle> {
        // Build from the registered copy so stored tuning is honored
        let source = match self.get(&descriptor.id).await {
            Some(entry) => {
                let mut registered = entry.descriptor;
                registered.local_path = descriptor.local_path.clone();
                registered.size_bytes = descriptor.size_bytes;
                registered
            }
            None => descriptor.clone(),
        };

        let result = self.loader.load(&source).await;

        let mut models = self.models.write().await;
        match result {
            Ok(handle) => {
                if let Some(entry) = models.get_mut(&descriptor.id) {
                    entry.last_loaded = Some(handle.loaded_at);
                    entry.last_error = None;
                }
                drop(models);
                *self.active.write().await = Some(handle.clone());
                Ok(handle)
            }
            Err(e) => {
                if let Some(entry) = models.get_mut(&descriptor.id) {
                    entry.last_error = Some(e.to_string());
                }
                Err(e)
            }
        }
    }
}
