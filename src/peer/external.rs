use super::PeerProcess;
use crate::config::PeerConfig;
use async_trait::async_trait;

/// Peer that starts nothing and reports the configured URL.
///
/// Used when the peer endpoint is managed outside this service.
pub struct ExternalPeer {
    config: PeerConfig,
}

impl ExternalPeer {
    pub fn new(config: PeerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PeerProcess for ExternalPeer {
    fn name(&self) -> &str {
        "external"
    }

    async fn start(&self) {}

    async fn stop(&self) {}

    async fn is_running(&self) -> bool {
        self.config.enabled && self.config.static_url().is_some()
    }

    async fn endpoint_url(&self) -> Option<String> {
        if !self.config.enabled {
            return None;
        }
        self.config.static_url().map(str::to_string)
    }
}
