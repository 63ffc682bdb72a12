//! Scripted extractor for unit tests.

use super::extractor::{ExtractionError, FeatureExtractor};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Smallest header `infer` recognizes as `audio/x-wav`.
pub const WAV_BYTES: &[u8] = b"RIFF\x24\x00\x00\x00WAVEfmt \x10\x00\x00\x00\x01\x00\x01\x00";

/// ID3-tagged header recognized as `audio/mpeg`.
pub const MP3_BYTES: &[u8] = b"ID3\x03\x00\x00\x00\x00\x00\x0a\x00\x00\x00\x00\x00\x00";

/// Returns queued results, falling back to 120 bpm in C major.
#[derive(Default)]
pub struct ScriptedExtractor {
    bpm: Mutex<VecDeque<Result<f64, ExtractionError>>>,
    keys: Mutex<VecDeque<Result<String, ExtractionError>>>,
    attempts: AtomicUsize,
    transcodes: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn push_bpm(&self, result: Result<f64, ExtractionError>) {
        self.bpm.lock().unwrap().push_back(result);
    }

    pub fn push_key(&self, result: Result<String, ExtractionError>) {
        self.keys.lock().unwrap().push_back(result);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn transcodes(&self) -> usize {
        self.transcodes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeatureExtractor for ScriptedExtractor {
    async fn transcode_to_wav(&self, input: &Path, output: &Path) -> Result<(), ExtractionError> {
        self.transcodes.fetch_add(1, Ordering::SeqCst);
        tokio::fs::copy(input, output).await?;
        Ok(())
    }

    async fn detect_bpm(&self, wav: &Path) -> Result<f64, ExtractionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        assert!(wav.exists(), "analyzed file must exist");
        self.bpm.lock().unwrap().pop_front().unwrap_or(Ok(120.0))
    }

    async fn detect_key(&self, _wav: &Path) -> Result<String, ExtractionError> {
        self.keys
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("C major".to_string()))
    }
}
