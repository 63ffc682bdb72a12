//! Local blob bucket addressed by content key.

mod content_key;
mod file_bucket;

pub use content_key::{ContentHasher, ContentKey, ContentKeyError, LEGACY_IMAGE_SUFFIX};
pub use file_bucket::FileBucket;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tempfile::TempPath;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncSeek};

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum BucketError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to commit staged blob: {0}")]
    Commit(String),
}

/// Metadata reported for a stored blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobAttributes {
    pub content_type: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

impl BlobAttributes {
    pub fn class(&self) -> ContentClass {
        ContentClass::from_content_type(&self.content_type)
    }
}

/// Coarse content classification, computed once from the content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentClass {
    Audio,
    Image,
    Other,
}

impl ContentClass {
    pub fn from_content_type(content_type: &str) -> Self {
        if content_type.starts_with("audio") {
            ContentClass::Audio
        } else if content_type.starts_with("image") {
            ContentClass::Image
        } else {
            ContentClass::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentClass::Audio => "audio",
            ContentClass::Image => "image",
            ContentClass::Other => "other",
        }
    }
}

pub trait BlobRead: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> BlobRead for T {}

/// Readable handle on a stored blob together with its attributes.
pub struct BlobReader {
    pub attributes: BlobAttributes,
    pub reader: Box<dyn BlobRead>,
}

/// A blob being written outside the visible keyspace.
///
/// Dropping it without committing removes the partial file.
pub struct StagedBlob {
    pub(crate) file: tokio::fs::File,
    pub(crate) path: TempPath,
}

impl StagedBlob {
    pub fn file_mut(&mut self) -> &mut tokio::fs::File {
        &mut self.file
    }

    pub fn path(&self) -> PathBuf {
        self.path.to_path_buf()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageUsage {
    pub used_bytes: u64,
    pub blob_count: u64,
}

#[async_trait]
pub trait BlobBucket: Send + Sync {
    async fn attributes(&self, key: &ContentKey) -> Result<Option<BlobAttributes>, BucketError>;

    async fn open(&self, key: &ContentKey) -> Result<Option<BlobReader>, BucketError>;

    /// Starts a staged write. Nothing is visible under any key until `commit`.
    async fn stage(&self) -> Result<StagedBlob, BucketError>;

    /// Atomically publishes a staged blob under `key`, replacing any previous copy.
    async fn commit(&self, key: &ContentKey, staged: StagedBlob) -> Result<(), BucketError>;

    async fn usage(&self) -> Result<StorageUsage, BucketError>;
}
