//! Test doubles for the node's external tools

use async_trait::async_trait;
use blobnet_server::audio_analysis::{ExtractionError, FeatureExtractor};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Feature extractor that never shells out.
///
/// Returns queued bpm results, falling back to 128 bpm in "A minor".
#[derive(Default)]
pub struct ScriptedExtractor {
    bpm: Mutex<VecDeque<Result<f64, ExtractionError>>>,
    attempts: AtomicUsize,
}

#[allow(dead_code)]
impl ScriptedExtractor {
    pub fn fail_next(&self, stderr: &str) {
        self.bpm
            .lock()
            .unwrap()
            .push_back(Err(ExtractionError::ToolFailed {
                tool: "bpm".to_string(),
                stderr: stderr.to_string(),
            }));
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeatureExtractor for ScriptedExtractor {
    async fn transcode_to_wav(&self, input: &Path, output: &Path) -> Result<(), ExtractionError> {
        tokio::fs::copy(input, output).await?;
        Ok(())
    }

    async fn detect_bpm(&self, _wav: &Path) -> Result<f64, ExtractionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.bpm.lock().unwrap().pop_front().unwrap_or(Ok(128.0))
    }

    async fn detect_key(&self, _wav: &Path) -> Result<String, ExtractionError> {
        Ok("A minor".to_string())
    }
}
