//! One analysis attempt, from bucket to stored results.

use super::extractor::{ExtractionError, FeatureExtractor};
use crate::blob_store::{BlobBucket, BucketError, ContentClass, ContentKey, ContentKeyError};
use crate::record_store::{AnalysisResults, AudioAnalysis, FailureKind, RecordStore};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::File;
use tracing::{debug, error};

/// Content types the analyzers read without transcoding.
const WAV_CONTENT_TYPES: &[&str] = &["audio/x-wav", "audio/wav", "audio/wave"];

const UNKNOWN_KEY: &str = "Unknown";

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("blob not found")]
    NotFoundLocally,

    #[error("blob is not an audio file")]
    NotAudio { content_type: String },

    #[error("invalid content key: {0}")]
    InvalidKey(#[from] ContentKeyError),

    #[error("failed to read blob: {0}")]
    Bucket(#[from] BucketError),

    #[error("failed to prepare scratch copy: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to convert to WAV: {0}")]
    Transcode(#[source] ExtractionError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}

impl AnalysisError {
    pub fn kind(&self) -> FailureKind {
        match self {
            AnalysisError::NotFoundLocally => FailureKind::Absent,
            AnalysisError::NotAudio { .. } | AnalysisError::InvalidKey(_) => FailureKind::Permanent,
            _ => FailureKind::Retryable,
        }
    }
}

pub struct AnalysisPipeline {
    bucket: Arc<dyn BlobBucket>,
    records: Arc<dyn RecordStore>,
    extractor: Arc<dyn FeatureExtractor>,
    self_host: String,
    scratch_dir: PathBuf,
}

impl AnalysisPipeline {
    pub fn new(
        bucket: Arc<dyn BlobBucket>,
        records: Arc<dyn RecordStore>,
        extractor: Arc<dyn FeatureExtractor>,
        self_host: String,
        scratch_dir: PathBuf,
    ) -> Self {
        Self {
            bucket,
            records,
            extractor,
            self_host,
            scratch_dir,
        }
    }

    /// Runs one attempt and persists its terminal state.
    pub async fn run(&self, mut analysis: AudioAnalysis) -> Result<AnalysisResults, AnalysisError> {
        analysis.begin_attempt(&self.self_host, Utc::now());
        self.persist(&analysis);

        let outcome = self.analyze(&analysis.key).await;
        match &outcome {
            Ok(results) => analysis.complete(results.clone(), Utc::now()),
            Err(e) => analysis.record_failure(&e.to_string(), e.kind(), Utc::now()),
        }
        self.persist(&analysis);
        outcome
    }

    fn persist(&self, analysis: &AudioAnalysis) {
        if let Err(e) = self.records.update_analysis(analysis) {
            error!(
                "Failed to store {} analysis record for {}: {:#}",
                analysis.status, analysis.key, e
            );
        }
    }

    async fn analyze(&self, key: &str) -> Result<AnalysisResults, AnalysisError> {
        let key = ContentKey::parse(key)?;
        let attributes = self
            .bucket
            .attributes(&key)
            .await?
            .ok_or(AnalysisError::NotFoundLocally)?;
        if attributes.class() != ContentClass::Audio {
            return Err(AnalysisError::NotAudio {
                content_type: attributes.content_type,
            });
        }

        // Removed when dropped, on every return path
        let scratch = tempfile::TempDir::new_in(&self.scratch_dir)?;
        let source = scratch.path().join("source");
        self.copy_out(&key, &source).await?;

        let wav = if WAV_CONTENT_TYPES.contains(&attributes.content_type.as_str()) {
            source
        } else {
            let wav = scratch.path().join("source.wav");
            self.extractor
                .transcode_to_wav(&source, &wav)
                .await
                .map_err(AnalysisError::Transcode)?;
            wav
        };

        let bpm = self.extractor.detect_bpm(&wav).await?;
        let musical_key = self.extractor.detect_key(&wav).await?;
        if musical_key.is_empty() || musical_key == UNKNOWN_KEY {
            return Err(ExtractionError::UnexpectedOutput(musical_key).into());
        }
        debug!("Analyzed {}: {} bpm, {}", key, bpm, musical_key);

        Ok(AnalysisResults {
            bpm,
            key: musical_key,
        })
    }

    async fn copy_out(&self, key: &ContentKey, dest: &Path) -> Result<(), AnalysisError> {
        let mut blob = self
            .bucket
            .open(key)
            .await?
            .ok_or(AnalysisError::NotFoundLocally)?;
        let mut file = File::create(dest).await?;
        tokio::io::copy(&mut blob.reader, &mut file).await?;
        file.sync_all().await?;
        Ok(())
    }
}
