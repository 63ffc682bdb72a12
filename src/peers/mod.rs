//! Peer discovery and replication.

mod client;
mod locator;
mod replicator;

pub use client::{ByteStream, HttpPeerClient, PeerClient, PeerError};
pub use locator::{order_sniff_results, BlobLocator, FixOutcome, HostAttributes};
pub use replicator::{ReplicationError, Replicator};
