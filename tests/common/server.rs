//! Test server lifecycle management
//!
//! This module manages spawning and shutting down test nodes.
//! Each node gets its own bucket and record database. Nodes spawned
//! together know each other as a cluster and trust each other's signatures.

use super::constants::*;
use axum::body::Bytes;
use blobnet_server::blob_store::{BlobBucket, ContentKey, FileBucket};
use blobnet_server::health::NodeHealth;
use blobnet_server::peers::{BlobLocator, HttpPeerClient, PeerClient, Replicator};
use blobnet_server::placement::{Placement, RedirectCache};
use blobnet_server::record_store::{RecordStore, SqliteRecordStore};
use blobnet_server::server::{make_app, RequestsLoggingLevel, ServerConfig, ServerState};
use blobnet_server::signature::{SignatureVerifier, Signer};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Test node with an isolated bucket and record database
///
/// When dropped, the server gracefully shuts down and temp resources are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// Position in the cluster, selects the signing identity
    pub index: usize,

    /// Hosts of every node in the cluster, this one included
    pub hosts: Vec<String>,

    /// Direct access to the node's components for tests
    pub bucket: Arc<dyn BlobBucket>,
    pub records: Arc<dyn RecordStore>,
    pub health: Arc<NodeHealth>,
    pub placement: Arc<Placement>,
    replicator: Arc<Replicator>,

    // Private fields - keep resources alive until drop
    temp_dir: TempDir,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

#[allow(dead_code)]
impl TestServer {
    /// Spawns a single node with no peers on a random port
    pub async fn spawn() -> Self {
        Self::spawn_cluster(1).await.remove(0)
    }

    /// Spawns `size` nodes that form one cluster
    ///
    /// All ports are bound before any node is built so that every node
    /// starts with the full host list.
    ///
    /// # Panics
    ///
    /// Panics if:
    /// - Port binding fails
    /// - Store creation fails
    /// - A server doesn't become ready within timeout
    pub async fn spawn_cluster(size: usize) -> Vec<Self> {
        let mut listeners = Vec::with_capacity(size);
        for _ in 0..size {
            let listener = TcpListener::bind("127.0.0.1:0")
                .await
                .expect("Failed to bind to random port");
            listeners.push(listener);
        }
        let hosts: Vec<String> = listeners
            .iter()
            .map(|listener| {
                let port = listener
                    .local_addr()
                    .expect("Failed to get local address")
                    .port();
                format!("http://127.0.0.1:{}", port)
            })
            .collect();

        let mut servers = Vec::with_capacity(size);
        for (index, listener) in listeners.into_iter().enumerate() {
            let server = Self::start(index, hosts.clone(), listener).await;
            servers.push(server);
        }
        for server in &servers {
            server.wait_for_ready().await;
        }
        servers
    }

    async fn start(index: usize, hosts: Vec<String>, listener: TcpListener) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let self_host = hosts[index].clone();

        let records: Arc<dyn RecordStore> = Arc::new(
            SqliteRecordStore::new(temp_dir.path().join("records.db"))
                .expect("Failed to open record store"),
        );
        let bucket: Arc<dyn BlobBucket> = Arc::new(
            FileBucket::new(temp_dir.path().join("blobs")).expect("Failed to open bucket"),
        );

        let placement = Arc::new(Placement::new(hosts.clone(), self_host.clone()));
        let signer = Arc::new(Signer::new(&signer_id(index), &signer_secret(index)));
        let identities: Vec<(String, String)> = (0..hosts.len())
            .map(|i| (signer_id(i), signer_secret(i)))
            .collect();
        let verifier = Arc::new(SignatureVerifier::new(
            identities.iter().map(|(id, secret)| (id.as_str(), secret.as_str())),
        ));

        let peers: Arc<dyn PeerClient> = Arc::new(
            HttpPeerClient::new(
                Duration::from_millis(PEER_PROBE_TIMEOUT_MS),
                Duration::from_secs(REQUEST_TIMEOUT_SECS),
                Some(signer),
            )
            .expect("Failed to build peer client"),
        );
        let cache = Arc::new(RedirectCache::new(Duration::from_secs(60)));
        let replicator = Arc::new(Replicator::new(
            bucket.clone(),
            peers.clone(),
            records.clone(),
        ));
        let locator = Arc::new(BlobLocator::new(placement.clone(), cache, peers));
        let health = Arc::new(NodeHealth::new(records.clone(), bucket.clone(), None));
        health.refresh().await;

        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let state = ServerState {
            config: ServerConfig {
                requests_logging_level: RequestsLoggingLevel::None,
                port,
                self_host: self_host.clone(),
                ..ServerConfig::default()
            },
            start_time: Instant::now(),
            version: "test".to_string(),
            bucket: bucket.clone(),
            records: records.clone(),
            locator,
            replicator: replicator.clone(),
            health: health.clone(),
            verifier,
            listens: None,
        };
        let app = make_app(state);

        // Create shutdown channel
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        // Spawn server in background task with graceful shutdown
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        Self {
            base_url: self_host,
            index,
            hosts,
            bucket,
            records,
            health,
            placement,
            replicator,
            temp_dir,
            _shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Stores `data` on this node, as if it had been uploaded by a peer
    pub async fn put_blob(&self, data: &[u8]) -> ContentKey {
        let key = ContentKey::for_bytes(data);
        let chunks = futures::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::copy_from_slice(
            data,
        ))]);
        self.replicator
            .ingest(&key, chunks)
            .await
            .expect("Failed to store test blob");
        key
    }

    pub async fn has_blob(&self, key: &ContentKey) -> bool {
        self.bucket
            .attributes(key)
            .await
            .expect("Failed to read attributes")
            .is_some()
    }

    /// Signs requests as this node
    pub fn signer(&self) -> Signer {
        Signer::new(&signer_id(self.index), &signer_secret(self.index))
    }

    /// Scratch directory for analysis copies, inside the node's temp dir
    pub fn scratch_dir(&self) -> std::path::PathBuf {
        let dir = self.temp_dir.path().join("analysis-scratch");
        std::fs::create_dir_all(&dir).expect("Failed to create scratch dir");
        dir
    }

    /// Waits for the server to become ready by polling the home endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => {
                    // Server is ready
                    return;
                }
                _ => {
                    // Server not ready yet, wait and retry
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        // Send shutdown signal
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
        // TempDir will be cleaned up automatically
    }
}
