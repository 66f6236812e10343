//! Upstream validation used by the failover client's health checks.

use std::time::Duration;

use async_trait::async_trait;

use crate::batch::Batch;
use crate::client::RpcClient;
use crate::commands;
use crate::error::RpcError;

/// Decides whether an upstream is currently usable.
#[async_trait]
pub trait UpstreamValidator: Send + Sync + 'static {
    async fn validate(&self, client: &dyn RpcClient) -> bool;
}

/// Usable iff the node is not syncing and has at least `min_peers` peers.
///
/// Both checks go out as one micro-batch (`eth_syncing`, `net_peerCount`)
/// under a hard timeout; a timeout or any error counts as unusable.
#[derive(Debug, Clone)]
pub struct BasicUpstreamValidator {
    pub min_peers: u64,
    pub timeout: Duration,
}

impl Default for BasicUpstreamValidator {
    fn default() -> Self {
        Self {
            min_peers: 0,
            timeout: Duration::from_secs(3),
        }
    }
}

impl BasicUpstreamValidator {
    pub fn new(min_peers: u64, timeout: Duration) -> Self {
        Self { min_peers, timeout }
    }
}

#[async_trait]
impl UpstreamValidator for BasicUpstreamValidator {
    async fn validate(&self, client: &dyn RpcClient) -> bool {
        let mut batch = Batch::new();
        let syncing = batch.add(commands::eth_syncing());
        let peers = batch.add(commands::net_peer_count());

        // On timeout the execution future, and the batch with it, is
        // dropped, which closes both items.
        if tokio::time::timeout(self.timeout, client.execute(batch))
            .await
            .is_err()
        {
            let error = RpcError::Timeout {
                ms: self.timeout.as_millis() as u64,
            };
            tracing::warn!(upstream = client.label(), code = error.code(), %error, "health check failed");
            return false;
        }

        let syncing = match syncing.try_result() {
            Some(Ok(status)) => status,
            other => {
                tracing::warn!(upstream = client.label(), outcome = ?other, "eth_syncing check failed");
                return false;
            }
        };
        let peers = match peers.try_result() {
            Some(Ok(count)) => count,
            other => {
                tracing::warn!(upstream = client.label(), outcome = ?other, "net_peerCount check failed");
                return false;
            }
        };

        if syncing.is_syncing() {
            tracing::info!(upstream = client.label(), "upstream is syncing");
            return false;
        }
        if peers < self.min_peers {
            tracing::info!(
                upstream = client.label(),
                peers,
                min_peers = self.min_peers,
                "upstream has too few peers"
            );
            return false;
        }
        true
    }
}
