//! Periodically refreshed view of this node's storage health.

use crate::blob_store::BlobBucket;
use crate::record_store::RecordStore;
use crate::server::metrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthSnapshot {
    pub database_size_bytes: u64,
    pub content_key_count: u64,
    pub used_bytes: u64,
    pub blob_count: u64,
    pub storage_capacity: Option<u64>,
    /// Problems hit while gathering the figures above.
    pub errors: Vec<String>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl HealthSnapshot {
    pub fn is_database_healthy(&self) -> bool {
        self.database_size_bytes > 0 && self.errors.is_empty()
    }

    pub fn disk_has_space(&self) -> bool {
        self.storage_capacity
            .map_or(true, |capacity| self.used_bytes < capacity)
    }
}

pub struct NodeHealth {
    records: Arc<dyn RecordStore>,
    bucket: Arc<dyn BlobBucket>,
    capacity: Option<u64>,
    snapshot: RwLock<HealthSnapshot>,
}

impl NodeHealth {
    pub fn new(
        records: Arc<dyn RecordStore>,
        bucket: Arc<dyn BlobBucket>,
        capacity: Option<u64>,
    ) -> Self {
        Self {
            records,
            bucket,
            capacity,
            snapshot: RwLock::new(HealthSnapshot {
                storage_capacity: capacity,
                ..Default::default()
            }),
        }
    }

    pub async fn refresh(&self) -> HealthSnapshot {
        let mut next = HealthSnapshot {
            storage_capacity: self.capacity,
            refreshed_at: Some(Utc::now()),
            ..Default::default()
        };

        match self.records.stats() {
            Ok(stats) => {
                next.database_size_bytes = stats.database_size_bytes;
                next.content_key_count = stats.content_key_count;
            }
            Err(e) => next.errors.push(format!("record store: {:#}", e)),
        }
        match self.bucket.usage().await {
            Ok(usage) => {
                next.used_bytes = usage.used_bytes;
                next.blob_count = usage.blob_count;
            }
            Err(e) => next.errors.push(format!("bucket: {}", e)),
        }

        for error in &next.errors {
            warn!("Health check problem: {}", error);
        }
        metrics::set_storage_gauges(next.used_bytes, next.blob_count, next.database_size_bytes);

        *self.snapshot.write().unwrap() = next.clone();
        next
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        self.snapshot.read().unwrap().clone()
    }

    pub fn is_database_healthy(&self) -> bool {
        self.snapshot.read().unwrap().is_database_healthy()
    }

    pub fn disk_has_space(&self) -> bool {
        self.snapshot.read().unwrap().disk_has_space()
    }
}
