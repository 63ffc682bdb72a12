//! Copies blobs into the local bucket, verifying content identity on the way in.

use super::client::{ByteStream, PeerClient, PeerError};
use crate::blob_store::{BlobBucket, BucketError, ContentHasher, ContentKey};
use crate::record_store::RecordStore;
use crate::server::metrics;
use axum::body::Bytes;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Bucket(#[from] BucketError),

    #[error("IO error while replicating: {0}")]
    Io(#[from] std::io::Error),

    #[error("content does not match its key (expected {expected}, got {actual})")]
    InvalidContentIdentity {
        expected: ContentKey,
        actual: ContentKey,
    },

    #[error("failed to register content key: {0}")]
    Record(#[source] anyhow::Error),
}

pub struct Replicator {
    bucket: Arc<dyn BlobBucket>,
    peers: Arc<dyn PeerClient>,
    records: Arc<dyn RecordStore>,
}

impl Replicator {
    pub fn new(
        bucket: Arc<dyn BlobBucket>,
        peers: Arc<dyn PeerClient>,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            bucket,
            peers,
            records,
        }
    }

    /// Copies `key` from `host` into the local bucket. Returns bytes written.
    pub async fn pull(&self, host: &str, key: &ContentKey) -> Result<u64, ReplicationError> {
        let stream: ByteStream = self.peers.fetch_blob(host, key).await?;
        let result = self.write_verified(key, stream).await;
        match &result {
            Ok(bytes) => info!("Pulled {} from {} ({} bytes)", key, host, bytes),
            Err(e) => warn!("Failed to pull {} from {}: {}", key, host, e),
        }
        result
    }

    /// Stores content received directly, e.g. from an upload.
    pub async fn ingest<S, E>(&self, key: &ContentKey, stream: S) -> Result<u64, ReplicationError>
    where
        S: Stream<Item = Result<Bytes, E>> + Send + Unpin,
        E: Send,
        ReplicationError: From<E>,
    {
        self.write_verified(key, stream).await
    }

    async fn write_verified<S, E>(
        &self,
        key: &ContentKey,
        mut stream: S,
    ) -> Result<u64, ReplicationError>
    where
        S: Stream<Item = Result<Bytes, E>> + Send + Unpin,
        E: Send,
        ReplicationError: From<E>,
    {
        let mut staged = self.bucket.stage().await?;
        let mut hasher = ContentHasher::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            staged.file_mut().write_all(&chunk).await?;
        }

        let written = hasher.bytes_hashed();
        let actual = hasher.finish();
        if &actual != key {
            metrics::record_replication("invalid", 0);
            // Dropping the staged blob removes it
            return Err(ReplicationError::InvalidContentIdentity {
                expected: key.clone(),
                actual,
            });
        }

        self.bucket.commit(key, staged).await?;
        self.records
            .register_content_key(key.as_str())
            .map_err(ReplicationError::Record)?;
        metrics::record_replication("ok", written);
        Ok(written)
    }
}
