//! RecordStore trait definition.

use super::models::{AudioAnalysis, Granularity, RecordStats};
use anyhow::Result;
use chrono::{DateTime, Utc};

/// Trait for record storage backends.
pub trait RecordStore: Send + Sync {
    // =========================================================================
    // Content keys
    // =========================================================================

    /// Remember that `key` is stored on this node. Idempotent.
    fn register_content_key(&self, key: &str) -> Result<()>;

    /// Keys worth analyzing, in random order. Legacy image keys are excluded.
    fn list_analysis_candidates(&self) -> Result<Vec<String>>;

    // =========================================================================
    // Audio analyses
    // =========================================================================

    fn get_analysis(&self, key: &str) -> Result<Option<AudioAnalysis>>;

    /// Insert `analysis` unless a record for its key already exists.
    /// Returns the record now stored.
    fn insert_analysis(&self, analysis: &AudioAnalysis) -> Result<AudioAnalysis>;

    fn update_analysis(&self, analysis: &AudioAnalysis) -> Result<()>;

    // =========================================================================
    // Serve accounting
    // =========================================================================

    /// Bump the daily and monthly counters for `action`.
    fn record_serve_action(&self, action: &str, at: DateTime<Utc>) -> Result<()>;

    fn serve_action_count(
        &self,
        action: &str,
        granularity: Granularity,
        at: DateTime<Utc>,
    ) -> Result<u64>;

    // =========================================================================
    // Statistics
    // =========================================================================

    fn stats(&self) -> Result<RecordStats>;
}
