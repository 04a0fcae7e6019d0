//! Free-space check for the models volume
//!
//! Answers whether the volume holding the models directory has room for the
//! asset. Runs on its own, outside the acquisition pipeline, and can be
//! cancelled at any suspension point.

use crate::config::StorageConfig;
use crate::models::AssetDescriptor;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const STATUS_FAILED: &str = "Failed to check storage";

/// Result of one storage check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStatus {
    pub is_ok: bool,
    /// Empty when `is_ok`
    pub message: String,
}

impl StorageStatus {
    pub fn ok() -> Self {
        Self {
            is_ok: true,
            message: String::new(),
        }
    }

    pub fn low(required: u64, free: u64) -> Self {
        Self {
            is_ok: false,
            message: format!(
                "Storage low! Model {} > {} free",
                format_bytes(required),
                format_bytes(free)
            ),
        }
    }

    pub fn failed() -> Self {
        Self {
            is_ok: false,
            message: STATUS_FAILED.to_string(),
        }
    }
}

/// Format a byte count with binary units and two decimals
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

/// Source of free-space figures for a directory's volume
#[async_trait]
pub trait FreeSpace: Send + Sync {
    async fn available_bytes(&self, dir: &Path) -> std::io::Result<u64>;
}

/// Free space from the mounted disk list
///
/// Picks the disk with the longest mount point that prefixes `dir`.
pub struct SystemFreeSpace;

#[async_trait]
impl FreeSpace for SystemFreeSpace {
    async fn available_bytes(&self, dir: &Path) -> std::io::Result<u64> {
        let dir = resolve_existing(dir);
        tokio::task::spawn_blocking(move || {
            let disks = sysinfo::Disks::new_with_refreshed_list();
            disks
                .list()
                .iter()
                .filter(|disk| dir.starts_with(disk.mount_point()))
                .max_by_key(|disk| disk.mount_point().as_os_str().len())
                .map(|disk| disk.available_space())
                .ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("no mounted disk contains {}", dir.display()),
                    )
                })
        })
        .await
        .map_err(std::io::Error::other)?
    }
}

/// Canonical form of the nearest existing ancestor of `dir`
fn resolve_existing(dir: &Path) -> PathBuf {
    dir.ancestors()
        .find_map(|p| std::fs::canonicalize(p).ok())
        .unwrap_or_else(|| dir.to_path_buf())
}

/// Storage checker for one asset
pub struct StorageCheck {
    descriptor: AssetDescriptor,
    models_dir: PathBuf,
    expected_size_bytes: u64,
    check_interval: Duration,
    free_space: Arc<dyn FreeSpace>,
}

impl StorageCheck {
    pub fn new(descriptor: AssetDescriptor, models_dir: PathBuf, config: &StorageConfig) -> Self {
        Self::new_with_free_space(descriptor, models_dir, config, Arc::new(SystemFreeSpace))
    }

    pub fn new_with_free_space(
        descriptor: AssetDescriptor,
        models_dir: PathBuf,
        config: &StorageConfig,
        free_space: Arc<dyn FreeSpace>,
    ) -> Self {
        Self {
            descriptor,
            models_dir,
            expected_size_bytes: config.expected_size_bytes,
            check_interval: config.check_interval(),
            free_space,
        }
    }

    fn required_bytes(&self) -> u64 {
        if self.descriptor.size_bytes > 0 {
            self.descriptor.size_bytes
        } else {
            self.expected_size_bytes
        }
    }

    /// Run one check; `None` if cancelled before it finished
    pub async fn check(&self, cancel: &CancellationToken) -> Option<StorageStatus> {
        if cancel.is_cancelled() {
            return None;
        }

        if self.descriptor.is_downloaded || self.descriptor.is_local {
            return Some(StorageStatus::ok());
        }

        let required = self.required_bytes();
        if required == 0 {
            return Some(StorageStatus::ok());
        }

        let free = tokio::select! {
            _ = cancel.cancelled() => return None,
            free = self.free_space.available_bytes(&self.models_dir) => free,
        };
        if cancel.is_cancelled() {
            return None;
        }

        let status = match free {
            Ok(free) if required > free => {
                tracing::warn!(
                    model_id = %self.descriptor.id,
                    required_bytes = required,
                    free_bytes = free,
                    "Not enough storage for model"
                );
                StorageStatus::low(required, free)
            }
            Ok(_) => StorageStatus::ok(),
            Err(e) => {
                tracing::warn!(
                    dir = %self.models_dir.display(),
                    error = %e,
                    "Storage check failed"
                );
                StorageStatus::failed()
            }
        };
        Some(status)
    }

    /// Re-run the check on an interval until `cancel` fires
    ///
    /// The receiver starts at `None` and holds the latest completed result.
    pub fn watch(
        self: Arc<Self>,
        cancel: CancellationToken,
    ) -> (watch::Receiver<Option<StorageStatus>>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(None);
        let handle = tokio::spawn(async move {
            loop {
                match self.check(&cancel).await {
                    Some(status) => {
                        if tx.send(Some(status)).is_err() {
                            break;
                        }
                    }
                    None => break,
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.check_interval) => {}
                }
            }
            tracing::debug!("Storage watch stopped");
        });
        (rx, handle)
    }
}
