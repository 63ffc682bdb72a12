//! Content placement: who should hold a key, and where it was last seen.

mod redirect_cache;
mod rendezvous;

pub use redirect_cache::RedirectCache;
pub use rendezvous::{owns, rank, REPLICATION_FACTOR};

use crate::blob_store::ContentKey;
use std::sync::Arc;

/// Policy hook that can claim ownership outside of the ranking.
pub trait OwnershipOverride: Send + Sync {
    fn force_owned(&self, key: &ContentKey, self_host: &str) -> bool;
}

/// Makes one designated host claim every key. Used for a host that carries
/// content from before rendezvous placement existed.
pub struct StaticOwnerOverride {
    owner_host: String,
}

impl StaticOwnerOverride {
    pub fn new<S: Into<String>>(owner_host: S) -> Self {
        Self {
            owner_host: owner_host.into(),
        }
    }
}

impl OwnershipOverride for StaticOwnerOverride {
    fn force_owned(&self, _key: &ContentKey, self_host: &str) -> bool {
        self.owner_host == self_host
    }
}

/// Ranked view of content placement.
pub struct Ownership {
    pub ranked_hosts: Vec<String>,
    pub is_mine: bool,
}

impl Ownership {
    /// Hosts designated to keep the content, at most `REPLICATION_FACTOR`.
    pub fn mirrors(&self) -> Vec<String> {
        self.ranked_hosts
            .iter()
            .take(REPLICATION_FACTOR)
            .cloned()
            .collect()
    }
}

/// Snapshot of the host set as seen by this node.
pub struct Placement {
    hosts: Vec<String>,
    self_host: String,
    ownership_override: Option<Arc<dyn OwnershipOverride>>,
}

impl Placement {
    pub fn new(hosts: Vec<String>, self_host: String) -> Self {
        let mut hosts = hosts;
        if !hosts.contains(&self_host) {
            hosts.push(self_host.clone());
        }
        Self {
            hosts,
            self_host,
            ownership_override: None,
        }
    }

    pub fn with_override(mut self, ownership_override: Arc<dyn OwnershipOverride>) -> Self {
        self.ownership_override = Some(ownership_override);
        self
    }

    pub fn self_host(&self) -> &str {
        &self.self_host
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn is_self(&self, host: &str) -> bool {
        host == self.self_host
    }

    pub fn rank(&self, key: &ContentKey) -> Vec<String> {
        rank(key.as_str(), &self.hosts)
    }

    pub fn ownership(&self, key: &ContentKey) -> Ownership {
        let ranked_hosts = self.rank(key);
        let by_rank = ranked_hosts
            .iter()
            .take(REPLICATION_FACTOR)
            .any(|h| h == &self.self_host);
        let forced = self
            .ownership_override
            .as_ref()
            .is_some_and(|o| o.force_owned(key, &self.self_host));
        Ownership {
            ranked_hosts,
            is_mine: by_rank || forced,
        }
    }
}
