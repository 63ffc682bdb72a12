//! Data models for the record database.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Attempts after which an analysis record is never scheduled again.
pub const ANALYSIS_RETRY_CEILING: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Pending,
    Busy,
    Done,
    Error,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Busy => "busy",
            AnalysisStatus::Done => "done",
            AnalysisStatus::Error => "error",
        }
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AnalysisStatus::Pending),
            "busy" => Ok(AnalysisStatus::Busy),
            "done" => Ok(AnalysisStatus::Done),
            "error" => Ok(AnalysisStatus::Error),
            other => Err(anyhow::anyhow!("Unknown analysis status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResults {
    pub bpm: f64,
    pub key: String,
}

/// How a failed attempt affects the retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Content is missing on this node; another mirror may have it.
    Absent,
    /// Retrying cannot change the outcome.
    Permanent,
    Retryable,
}

/// Audio feature extraction record for one content key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioAnalysis {
    pub key: String,
    pub status: AnalysisStatus,
    /// Designated hosts captured when the record was created.
    pub mirrors: Vec<String>,
    pub error_count: u32,
    pub last_error: String,
    pub processed_by: String,
    pub processed_at: DateTime<Utc>,
    pub results: Option<AnalysisResults>,
}

impl AudioAnalysis {
    pub fn new_pending(key: &str, mirrors: Vec<String>, now: DateTime<Utc>) -> Self {
        Self {
            key: key.to_string(),
            status: AnalysisStatus::Pending,
            mirrors,
            error_count: 0,
            last_error: String::new(),
            processed_by: String::new(),
            processed_at: now,
            results: None,
        }
    }

    pub fn at_ceiling(&self) -> bool {
        self.error_count >= ANALYSIS_RETRY_CEILING
    }

    /// Whether the scheduler may hand this record to a worker.
    ///
    /// A `busy` record is only eligible once its attempt is older than
    /// `stale_busy_threshold`.
    pub fn is_schedulable(&self, now: DateTime<Utc>, stale_busy_threshold: Duration) -> bool {
        if self.at_ceiling() {
            return false;
        }
        match self.status {
            AnalysisStatus::Done => false,
            AnalysisStatus::Pending | AnalysisStatus::Error => true,
            AnalysisStatus::Busy => now - self.processed_at >= stale_busy_threshold,
        }
    }

    pub fn begin_attempt(&mut self, host: &str, now: DateTime<Utc>) {
        self.status = AnalysisStatus::Busy;
        self.processed_by = host.to_string();
        self.processed_at = now;
    }

    pub fn record_failure(&mut self, message: &str, kind: FailureKind, now: DateTime<Utc>) {
        self.status = AnalysisStatus::Error;
        self.last_error = message.to_string();
        self.processed_at = now;
        self.error_count = match kind {
            FailureKind::Absent => self.error_count,
            FailureKind::Permanent => ANALYSIS_RETRY_CEILING,
            FailureKind::Retryable => (self.error_count + 1).min(ANALYSIS_RETRY_CEILING),
        };
    }

    pub fn complete(&mut self, results: AnalysisResults, now: DateTime<Utc>) {
        self.status = AnalysisStatus::Done;
        self.results = Some(results);
        self.last_error.clear();
        self.processed_at = now;
    }
}

/// Period a serve counter aggregates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Day,
    Month,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Day => "day",
            Granularity::Month => "month",
        }
    }
}

/// Summary statistics for the record database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordStats {
    pub database_size_bytes: u64,
    pub content_key_count: u64,
    pub analyses_pending: u64,
    pub analyses_busy: u64,
    pub analyses_done: u64,
    pub analyses_error: u64,
}
