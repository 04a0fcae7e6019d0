//! Network preflight checks
//!
//! Runs before every download attempt, including retries. Three stages,
//! stopping at the first failure:
//! 1. the device has a route to the network
//! 2. the internet is reachable
//! 3. the model server answers a HEAD request for the asset

use crate::config::PreflightConfig;
use crate::error::AcquireError;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

/// Result of a preflight probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkStatus {
    /// All stages passed
    pub connected: bool,
    /// The device reported internet reachability (stages 1 and 2 passed)
    pub reachable: bool,
    pub detail: String,
    /// Whether a later attempt could plausibly succeed
    pub retryable: bool,
}

impl NetworkStatus {
    pub fn connected() -> Self {
        Self {
            connected: true,
            reachable: true,
            detail: "Connected".to_string(),
            retryable: true,
        }
    }

    pub fn no_connection() -> Self {
        Self {
            connected: false,
            reachable: false,
            detail: "No network connection".to_string(),
            retryable: true,
        }
    }

    pub fn internet_unreachable() -> Self {
        Self {
            connected: false,
            reachable: false,
            detail: "Internet is not reachable".to_string(),
            retryable: true,
        }
    }

    /// The model server failed the existence probe
    ///
    /// `None` means a transport error. Server errors, 408 and 429 are worth
    /// retrying; any other status will not change in a few seconds.
    pub fn server_unreachable(status: Option<StatusCode>) -> Self {
        let (detail, retryable) = match status {
            Some(status) => (
                format!("Cannot reach model server ({})", status.as_u16()),
                status.is_server_error()
                    || status == StatusCode::REQUEST_TIMEOUT
                    || status == StatusCode::TOO_MANY_REQUESTS,
            ),
            None => ("Cannot reach model server".to_string(), true),
        };
        Self {
            connected: false,
            reachable: true,
            detail,
            retryable,
        }
    }

    /// Convert a failed status into the matching error
    pub fn into_error(self) -> AcquireError {
        if !self.reachable {
            AcquireError::NetworkUnavailable {
                detail: self.detail,
            }
        } else {
            AcquireError::ServerUnreachable {
                detail: self.detail,
                retryable: self.retryable,
            }
        }
    }
}

// ============================================================================
// Trait Definitions
// ============================================================================

/// Device link state as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkState {
    pub connected: bool,
    pub internet_reachable: bool,
}

/// Trait for querying device connectivity
#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn link_state(&self) -> LinkState;
}

/// Trait for a full preflight check against a target URL
///
/// Never fails: every failure collapses into a `NetworkStatus`.
#[async_trait]
pub trait Preflight: Send + Sync {
    async fn check(&self, target_url: &str) -> NetworkStatus;
}

// ============================================================================
// Production Implementation
// ============================================================================

/// Connectivity probe using sockets
///
/// A UDP `connect` to the route probe address fails immediately when there
/// is no route (no packet is sent). Internet reachability is a TCP connect
/// to the reachability address within the probe timeout.
pub struct SystemConnectivity {
    route_probe_addr: String,
    reachability_addr: String,
    probe_timeout: Duration,
}

impl SystemConnectivity {
    pub fn new(config: &PreflightConfig) -> Self {
        Self {
            route_probe_addr: config.route_probe_addr.clone(),
            reachability_addr: config.reachability_addr.clone(),
            probe_timeout: config.probe_timeout(),
        }
    }

    async fn has_route(&self) -> bool {
        let socket = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(socket) => socket,
            Err(e) => {
                tracing::debug!(error = %e, "Failed to bind route probe socket");
                return false;
            }
        };
        match socket.connect(&self.route_probe_addr).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(addr = %self.route_probe_addr, error = %e, "No network route");
                false
            }
        }
    }

    async fn internet_reachable(&self) -> bool {
        match timeout(
            self.probe_timeout,
            TcpStream::connect(&self.reachability_addr),
        )
        .await
        {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!(addr = %self.reachability_addr, error = %e, "Reachability probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(addr = %self.reachability_addr, "Reachability probe timed out");
                false
            }
        }
    }
}

#[async_trait]
impl Connectivity for SystemConnectivity {
    async fn link_state(&self) -> LinkState {
        if !self.has_route().await {
            return LinkState {
                connected: false,
                internet_reachable: false,
            };
        }
        LinkState {
            connected: true,
            internet_reachable: self.internet_reachable().await,
        }
    }
}

/// Preflight checker: link state, then a HEAD probe against the asset URL
pub struct NetworkPreflightChecker {
    connectivity: Box<dyn Connectivity>,
    client: reqwest::Client,
}

impl NetworkPreflightChecker {
    /// Create a checker using socket-based connectivity probes
    pub fn new(config: &PreflightConfig) -> Result<Self, reqwest::Error> {
        Self::new_with_connectivity(config, Box::new(SystemConnectivity::new(config)))
    }

    /// Create a checker with a custom connectivity source
    pub fn new_with_connectivity(
        config: &PreflightConfig,
        connectivity: Box<dyn Connectivity>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.probe_timeout())
            .build()?;
        Ok(Self {
            connectivity,
            client,
        })
    }
}

#[async_trait]
impl Preflight for NetworkPreflightChecker {
    async fn check(&self, target_url: &str) -> NetworkStatus {
        let link = self.connectivity.link_state().await;

        if !link.connected {
            crate::metrics::record_preflight_failure("connectivity");
            return NetworkStatus::no_connection();
        }
        if !link.internet_reachable {
            crate::metrics::record_preflight_failure("internet");
            return NetworkStatus::internet_unreachable();
        }

        match self.client.head(target_url).send().await {
            Ok(response) if response.status().is_success() => NetworkStatus::connected(),
            Ok(response) => {
                crate::metrics::record_preflight_failure("server");
                tracing::warn!(
                    url = %target_url,
                    status = %response.status(),
                    "Model server probe returned non-success status"
                );
                NetworkStatus::server_unreachable(Some(response.status()))
            }
            Err(e) => {
                crate::metrics::record_preflight_failure("server");
                tracing::warn!(url = %target_url, error = %e, "Model server probe failed");
                NetworkStatus::server_unreachable(None)
            }
        }
    }
}

// ============================================================================
// Test Implementation
// ============================================================================
