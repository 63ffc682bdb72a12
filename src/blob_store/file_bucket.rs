//! Filesystem-backed bucket.

use super::{
    BlobAttributes, BlobBucket, BlobReader, BucketError, ContentKey, StagedBlob, StorageUsage,
    DEFAULT_CONTENT_TYPE,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;
use walkdir::WalkDir;

const STAGING_DIR: &str = ".staging";
const SNIFF_LEN: usize = 8192;

/// Stores each blob at `<root>/<shard>/<key>`. Writes land in `<root>/.staging`
/// first and are renamed into place, so readers never see partial content.
pub struct FileBucket {
    root: PathBuf,
    staging: PathBuf,
}

impl FileBucket {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, BucketError> {
        let root = root.as_ref().to_path_buf();
        let staging = root.join(STAGING_DIR);
        std::fs::create_dir_all(&staging)?;
        Ok(Self { root, staging })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &ContentKey) -> PathBuf {
        self.root.join(key.shard_path())
    }
}

async fn detect_content_type(path: &Path) -> Result<String, BucketError> {
    let mut file = File::open(path).await?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    (&mut file).take(SNIFF_LEN as u64).read_to_end(&mut head).await?;
    Ok(infer::get(&head)
        .map(|kind| kind.mime_type().to_string())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()))
}

#[async_trait]
impl BlobBucket for FileBucket {
    async fn attributes(&self, key: &ContentKey) -> Result<Option<BlobAttributes>, BucketError> {
        let path = self.blob_path(key);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let modified_at: DateTime<Utc> = metadata.modified()?.into();
        Ok(Some(BlobAttributes {
            content_type: detect_content_type(&path).await?,
            size: metadata.len(),
            modified_at,
        }))
    }

    async fn open(&self, key: &ContentKey) -> Result<Option<BlobReader>, BucketError> {
        let Some(attributes) = self.attributes(key).await? else {
            return Ok(None);
        };
        match File::open(self.blob_path(key)).await {
            Ok(file) => Ok(Some(BlobReader {
                attributes,
                reader: Box::new(file),
            })),
            // Removed between the stat and the open
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn stage(&self) -> Result<StagedBlob, BucketError> {
        let (file, path) = tempfile::NamedTempFile::new_in(&self.staging)?.into_parts();
        Ok(StagedBlob {
            file: File::from_std(file),
            path,
        })
    }

    async fn commit(&self, key: &ContentKey, staged: StagedBlob) -> Result<(), BucketError> {
        let StagedBlob { mut file, path } = staged;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let dest = self.blob_path(key);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        path.persist(&dest)
            .map_err(|e| BucketError::Commit(e.to_string()))?;
        debug!("Committed blob {} to {}", key, dest.display());
        Ok(())
    }

    async fn usage(&self) -> Result<StorageUsage, BucketError> {
        let root = self.root.clone();
        let staging = self.staging.clone();
        tokio::task::spawn_blocking(move || {
            let mut usage = StorageUsage {
                used_bytes: 0,
                blob_count: 0,
            };
            for entry in WalkDir::new(&root)
                .into_iter()
                .filter_entry(|e| e.path() != staging)
            {
                let entry = entry.map_err(|e| {
                    BucketError::Io(std::io::Error::new(ErrorKind::Other, e.to_string()))
                })?;
                if entry.file_type().is_file() {
                    usage.used_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
                    usage.blob_count += 1;
                }
            }
            Ok(usage)
        })
        .await
        .map_err(|e| BucketError::Io(std::io::Error::new(ErrorKind::Other, e.to_string())))?
    }
}
