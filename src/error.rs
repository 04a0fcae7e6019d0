//! Error taxonomy for model acquisition and initialization
//!
//! Every error carries its own retry eligibility, decided where the error is
//! constructed. Retry loops ask [`AcquireError::is_retryable`] instead of
//! inspecting message text.

use std::fmt;
use std::path::PathBuf;

/// Bounded retry layer that gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStage {
    Download,
    Initialization,
}

impl fmt::Display for RetryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Download => write!(f, "download"),
            Self::Initialization => write!(f, "initialization"),
        }
    }
}

/// Errors raised while acquiring and initializing a model asset
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    /// The device has no usable link or no internet route
    #[error("{detail}")]
    NetworkUnavailable { detail: String },

    /// The model server did not answer the existence probe
    #[error("{detail}")]
    ServerUnreachable { detail: String, retryable: bool },

    /// The transfer itself failed (non-2xx, transport error, oversized body)
    #[error("transfer failed: {reason}")]
    TransferFailed { reason: String, retryable: bool },

    /// The transfer completed but produced an empty file
    #[error("downloaded file is empty: {}", .path.display())]
    CorruptArtifact { path: PathBuf },

    /// The asset vanished or was empty right before initialization
    #[error("model file missing or empty: {}", .path.display())]
    AssetMissing { path: PathBuf },

    /// The registry could not construct a runtime context
    #[error("context initialization failed: {0}")]
    InitializationFailed(String),

    /// A bounded retry layer ran out of attempts
    #[error("{stage} gave up after {attempts} attempts: {source}")]
    Exhausted {
        stage: RetryStage,
        attempts: u32,
        source: Box<AcquireError>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AcquireError {
    /// Whether the layer that raised this error may try again
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkUnavailable { .. } => true,
            Self::ServerUnreachable { retryable, .. } => *retryable,
            Self::TransferFailed { retryable, .. } => *retryable,
            Self::CorruptArtifact { .. }
            | Self::AssetMissing { .. }
            | Self::InitializationFailed(_)
            | Self::Exhausted { .. }
            | Self::Io(_) => false,
        }
    }

    /// Classify a reqwest failure that happened during the body transfer
    ///
    /// No content decoding is enabled, so a decode error is a body stream
    /// that broke off mid-transfer.
    pub fn from_transfer(err: reqwest::Error) -> Self {
        let retryable = err.is_connect()
            || err.is_timeout()
            || err.is_request()
            || err.is_body()
            || err.is_decode();
        Self::TransferFailed {
            reason: format!("network error: {}", err),
            retryable,
        }
    }

    /// Short machine-friendly label, used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NetworkUnavailable { .. } => "network_unavailable",
            Self::ServerUnreachable { .. } => "server_unreachable",
            Self::TransferFailed { .. } => "transfer_failed",
            Self::CorruptArtifact { .. } => "corrupt_artifact",
            Self::AssetMissing { .. } => "asset_missing",
            Self::InitializationFailed(_) => "initialization_failed",
            Self::Exhausted { .. } => "exhausted",
            Self::Io(_) => "io",
        }
    }
}

pub type AcquireResult<T> = std::result::Result<T, AcquireError>;
