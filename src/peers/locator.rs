//! Finding which peer holds a blob.

use super::client::PeerClient;
use super::replicator::{ReplicationError, Replicator};
use crate::blob_store::{BlobAttributes, ContentKey};
use crate::placement::{Placement, RedirectCache};
use crate::server::metrics;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// A host that confirmed possession during a sniff.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostAttributes {
    pub host: String,
    /// 1-based position in the rendezvous order.
    pub rendezvous_rank: usize,
    pub attributes: BlobAttributes,
}

/// Largest copy first, then the host ranked higher for the key.
pub fn order_sniff_results(results: &mut [HostAttributes]) {
    results.sort_by(|a, b| {
        b.attributes
            .size
            .cmp(&a.attributes.size)
            .then(a.rendezvous_rank.cmp(&b.rendezvous_rank))
    });
}

#[derive(Debug, Serialize)]
pub struct FixOutcome {
    pub source: String,
    pub pulled: bool,
}

pub struct BlobLocator {
    placement: Arc<Placement>,
    cache: Arc<RedirectCache>,
    peers: Arc<dyn PeerClient>,
}

impl BlobLocator {
    pub fn new(
        placement: Arc<Placement>,
        cache: Arc<RedirectCache>,
        peers: Arc<dyn PeerClient>,
    ) -> Self {
        Self {
            placement,
            cache,
            peers,
        }
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    async fn host_has_blob(&self, host: &str, key: &ContentKey) -> bool {
        match self.peers.blob_info(host, key).await {
            Ok(_) => {
                metrics::record_peer_probe(true);
                true
            }
            Err(e) => {
                debug!("Probe of {} for {} failed: {}", host, key, e);
                metrics::record_peer_probe(false);
                false
            }
        }
    }

    /// Finds a peer that currently holds `key`. This node is never returned.
    pub async fn find_holder(&self, key: &ContentKey) -> Option<String> {
        let mut evicted = None;
        if let Some(host) = self.cache.get(key.as_str()) {
            if self.host_has_blob(&host, key).await {
                metrics::record_redirect_cache_event("hit");
                return Some(host);
            }
            metrics::record_redirect_cache_event("stale");
            self.cache.evict(key.as_str());
            evicted = Some(host);
        } else {
            metrics::record_redirect_cache_event("miss");
        }

        for host in self.placement.rank(key) {
            if self.placement.is_self(&host) || evicted.as_deref() == Some(host.as_str()) {
                continue;
            }
            if self.host_has_blob(&host, key).await {
                self.cache.set_default(key.as_str(), &host);
                return Some(host);
            }
        }
        None
    }

    /// Probes every host at once and returns the confirmed holders, best first.
    pub async fn sniff(&self, key: &ContentKey) -> Vec<HostAttributes> {
        let mut probes = JoinSet::new();

        for (idx, host) in self.placement.rank(key).into_iter().enumerate() {
            let peers = self.peers.clone();
            let key = key.clone();
            probes.spawn(async move {
                match peers.blob_info(&host, &key).await {
                    Ok(attributes) => {
                        metrics::record_peer_probe(true);
                        Some(HostAttributes {
                            host,
                            rendezvous_rank: idx + 1,
                            attributes,
                        })
                    }
                    Err(e) => {
                        metrics::record_peer_probe(false);
                        debug!("Sniff of {} for {} failed: {}", host, key, e);
                        None
                    }
                }
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(Some(found)) => results.push(found),
                Ok(None) => {}
                Err(e) => warn!("Sniff probe task failed: {}", e),
            }
        }
        order_sniff_results(&mut results);
        results
    }

    /// Pulls `key` from the best sniffed holder unless that holder is this node.
    pub async fn fix(
        &self,
        key: &ContentKey,
        sniffed: &[HostAttributes],
        replicator: &Replicator,
    ) -> Result<Option<FixOutcome>, ReplicationError> {
        let Some(best) = sniffed.first() else {
            return Ok(None);
        };
        if self.placement.is_self(&best.host) {
            return Ok(Some(FixOutcome {
                source: best.host.clone(),
                pulled: false,
            }));
        }
        info!("Repairing {} from {}", key, best.host);
        replicator.pull(&best.host, key).await?;
        Ok(Some(FixOutcome {
            source: best.host.clone(),
            pulled: true,
        }))
    }
}
