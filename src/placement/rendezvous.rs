//! Highest-random-weight ranking of hosts against a content key.

use sha2::{Digest, Sha256};
use std::cmp::Ordering;

/// Number of top-ranked hosts expected to hold each blob.
pub const REPLICATION_FACTOR: usize = 3;

fn affinity(host: &str, key: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(host.as_bytes());
    hasher.update(key.as_bytes());
    hasher.finalize().into()
}

/// Orders `hosts` by descending affinity for `key`. Equal scores fall back to
/// host string order, so every node computes the same ranking.
pub fn rank<S: AsRef<str>>(key: &str, hosts: &[S]) -> Vec<String> {
    let mut scored: Vec<([u8; 32], &str)> = hosts
        .iter()
        .map(|h| (affinity(h.as_ref(), key), h.as_ref()))
        .collect();
    scored.sort_by(|(score_a, host_a), (score_b, host_b)| match score_b.cmp(score_a) {
        Ordering::Equal => host_a.cmp(host_b),
        other => other,
    });
    scored.into_iter().map(|(_, h)| h.to_string()).collect()
}

/// True when `self_host` is among the first `REPLICATION_FACTOR` ranked hosts.
pub fn owns<S: AsRef<str>>(key: &str, hosts: &[S], self_host: &str) -> bool {
    rank(key, hosts)
        .iter()
        .take(REPLICATION_FACTOR)
        .any(|h| h == self_host)
}
