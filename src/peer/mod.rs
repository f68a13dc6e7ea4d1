pub mod external;
pub mod launch;
pub mod port;
pub mod readiness;
pub mod supervisor;

use crate::config::{PeerConfig, PeerImpl};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

pub use external::ExternalPeer;
pub use supervisor::SidecarSupervisor;

/// Lifecycle state reported by a peer implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerState {
    Stopped,
    Starting,
    Running,
}

/// A local peer endpoint that the catalog advertises in bootstrap responses.
///
/// Implementations either launch and supervise a sidecar process or report
/// an externally managed endpoint. All methods are safe to call concurrently
/// and never fail: startup is best-effort.
#[async_trait]
pub trait PeerProcess: Send + Sync {
    /// Human-readable implementation name (e.g., "sidecar", "external").
    fn name(&self) -> &str;

    /// Start the peer if not running. No-op if already started or starting.
    async fn start(&self);

    /// Stop the peer if running. No-op if already stopped.
    async fn stop(&self);

    /// Whether the peer is currently running.
    async fn is_running(&self) -> bool;

    /// Public URL of the peer endpoint, if one is available.
    async fn endpoint_url(&self) -> Option<String>;

    async fn state(&self) -> PeerState {
        if self.is_running().await {
            PeerState::Running
        } else {
            PeerState::Stopped
        }
    }

    /// When the current peer instance came up, if this implementation tracks it.
    async fn started_at(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Application teardown. Called once when the server exits.
    async fn shutdown(&self) {
        self.stop().await;
    }
}

/// Pick the peer implementation named by the configuration.
pub fn from_config(config: &PeerConfig) -> Arc<dyn PeerProcess> {
    tracing::debug!(implementation = %config.implementation, "selected peer implementation");
    match config.implementation {
        PeerImpl::External => Arc::new(ExternalPeer::new(config.clone())),
        PeerImpl::Sidecar => Arc::new(SidecarSupervisor::new(config.clone())),
    }
}
