use axum::extract::FromRef;

use crate::blob_store::BlobBucket;
use crate::health::NodeHealth;
use crate::listens::ListenLogger;
use crate::peers::{BlobLocator, Replicator};
use crate::record_store::RecordStore;
use crate::signature::SignatureVerifier;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedBucket = Arc<dyn BlobBucket>;
pub type GuardedRecordStore = Arc<dyn RecordStore>;
pub type GuardedLocator = Arc<BlobLocator>;
pub type GuardedReplicator = Arc<Replicator>;
pub type GuardedHealth = Arc<NodeHealth>;
pub type GuardedVerifier = Arc<SignatureVerifier>;
pub type GuardedListens = Arc<ListenLogger>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub version: String,
    pub bucket: GuardedBucket,
    pub records: GuardedRecordStore,
    pub locator: GuardedLocator,
    pub replicator: GuardedReplicator,
    pub health: GuardedHealth,
    pub verifier: GuardedVerifier,
    /// Present when a listen endpoint is configured.
    pub listens: Option<GuardedListens>,
}

impl FromRef<ServerState> for GuardedBucket {
    fn from_ref(input: &ServerState) -> Self {
        input.bucket.clone()
    }
}

impl FromRef<ServerState> for GuardedRecordStore {
    fn from_ref(input: &ServerState) -> Self {
        input.records.clone()
    }
}

impl FromRef<ServerState> for GuardedLocator {
    fn from_ref(input: &ServerState) -> Self {
        input.locator.clone()
    }
}

impl FromRef<ServerState> for GuardedReplicator {
    fn from_ref(input: &ServerState) -> Self {
        input.replicator.clone()
    }
}

impl FromRef<ServerState> for GuardedHealth {
    fn from_ref(input: &ServerState) -> Self {
        input.health.clone()
    }
}

impl FromRef<ServerState> for GuardedVerifier {
    fn from_ref(input: &ServerState) -> Self {
        input.verifier.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
