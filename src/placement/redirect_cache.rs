//! Expiring hints of which peer was last seen holding a key.

use dashmap::DashMap;
use std::time::{Duration, Instant};

struct CacheEntry {
    host: String,
    expires_at: Instant,
}

/// Advisory key -> host mapping. A hit must be verified against the host
/// before it is trusted, and evicted when verification fails.
pub struct RedirectCache {
    entries: DashMap<String, CacheEntry>,
    default_ttl: Duration,
}

impl RedirectCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let host = {
            let entry = self.entries.get(key)?;
            if entry.expires_at > now {
                return Some(entry.host.clone());
            }
            entry.host.clone()
        };
        // Expired, drop it unless someone refreshed it in between
        self.entries
            .remove_if(key, |_, e| e.host == host && e.expires_at <= now);
        None
    }

    pub fn set(&self, key: &str, host: &str, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                host: host.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn set_default(&self, key: &str, host: &str) {
        self.set(key, host, self.default_ttl);
    }

    pub fn evict(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drops all expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
