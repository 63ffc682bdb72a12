//! Periodic discovery of analysis work owned by this node.

use super::handoff::{HandoffError, HandoffSender};
use crate::blob_store::{ContentKey, LEGACY_IMAGE_SUFFIX};
use crate::placement::Placement;
use crate::record_store::{AudioAnalysis, RecordStore};
use crate::server::metrics;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const ANALYSIS_CYCLE_INTERVAL: Duration = Duration::from_secs(15 * 60);
pub const ANALYSIS_CYCLE_THROTTLE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct AnalysisSchedulerSettings {
    pub initial_delay: Duration,
    pub interval: Duration,
    /// Upper bound on a single scan.
    pub cycle_timeout: Duration,
    /// Pause after each interval before the next scan starts.
    pub throttle: Duration,
    pub stale_busy_threshold: Duration,
}

impl Default for AnalysisSchedulerSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(60),
            interval: ANALYSIS_CYCLE_INTERVAL,
            cycle_timeout: ANALYSIS_CYCLE_INTERVAL,
            throttle: ANALYSIS_CYCLE_THROTTLE,
            stale_busy_threshold: Duration::from_secs(60 * 60),
        }
    }
}

/// What one scan did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub scanned: usize,
    pub not_owned: usize,
    pub skipped: usize,
    pub created: usize,
    pub enqueued: usize,
    pub cancelled: bool,
}

pub struct AnalysisScheduler {
    records: Arc<dyn RecordStore>,
    placement: Arc<Placement>,
    sender: HandoffSender<AudioAnalysis>,
    settings: AnalysisSchedulerSettings,
}

/// Sleeps for `duration`. Returns false if `shutdown` fired first.
async fn sleep_or_shutdown(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = shutdown.cancelled() => false,
    }
}

impl AnalysisScheduler {
    pub fn new(
        records: Arc<dyn RecordStore>,
        placement: Arc<Placement>,
        sender: HandoffSender<AudioAnalysis>,
        settings: AnalysisSchedulerSettings,
    ) -> Self {
        Self {
            records,
            placement,
            sender,
            settings,
        }
    }

    /// Scans every interval until `shutdown` fires. Dropping the scheduler on
    /// return stops the workers.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            "Audio analysis scheduler starting in {:?}",
            self.settings.initial_delay
        );
        if !sleep_or_shutdown(self.settings.initial_delay, &shutdown).await {
            return;
        }

        loop {
            let started = Instant::now();
            self.run_bounded_cycle(&shutdown).await;

            if shutdown.is_cancelled() {
                break;
            }
            let remaining = self.settings.interval.saturating_sub(started.elapsed());
            if !sleep_or_shutdown(remaining + self.settings.throttle, &shutdown).await {
                break;
            }
        }
        info!("Audio analysis scheduler stopped");
    }

    /// Runs one scan that is cancelled by `shutdown` or after `cycle_timeout`.
    pub async fn run_bounded_cycle(&mut self, shutdown: &CancellationToken) -> CycleReport {
        let cycle_token = shutdown.child_token();
        let deadline = tokio::spawn({
            let token = cycle_token.clone();
            let timeout = self.settings.cycle_timeout;
            async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => token.cancel(),
                    _ = token.cancelled() => {}
                }
            }
        });

        let report = self.run_cycle(&cycle_token).await;
        cycle_token.cancel();
        let _ = deadline.await;
        metrics::record_analysis_cycle(if report.cancelled {
            "cancelled"
        } else {
            "completed"
        });
        report
    }

    /// One pass over the candidate keys.
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> CycleReport {
        let cycle_id = uuid::Uuid::new_v4();
        let mut report = CycleReport::default();
        info!("Audio analysis scan {} started", cycle_id);

        let keys = match self.records.list_analysis_candidates() {
            Ok(keys) => keys,
            Err(e) => {
                error!("Failed to list analysis candidates: {:#}", e);
                return report;
            }
        };

        let stale_busy = chrono::Duration::from_std(self.settings.stale_busy_threshold)
            .unwrap_or(chrono::Duration::MAX);

        for raw_key in keys {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            report.scanned += 1;
            if raw_key.ends_with(LEGACY_IMAGE_SUFFIX) {
                report.skipped += 1;
                continue;
            }
            let key = match ContentKey::parse(&raw_key) {
                Ok(key) => key,
                Err(e) => {
                    debug!("Skipping malformed key {}: {}", raw_key, e);
                    report.skipped += 1;
                    continue;
                }
            };

            let ownership = self.placement.ownership(&key);
            if !ownership.is_mine {
                report.not_owned += 1;
                continue;
            }

            let analysis = match self.records.get_analysis(key.as_str()) {
                Ok(Some(analysis)) => analysis,
                Ok(None) => {
                    let fresh =
                        AudioAnalysis::new_pending(key.as_str(), ownership.mirrors(), Utc::now());
                    match self.records.insert_analysis(&fresh) {
                        Ok(stored) => {
                            report.created += 1;
                            stored
                        }
                        Err(e) => {
                            error!("Failed to create analysis record for {}: {:#}", key, e);
                            continue;
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to load analysis record for {}: {:#}", key, e);
                    continue;
                }
            };

            if !analysis.is_schedulable(Utc::now(), stale_busy) {
                report.skipped += 1;
                continue;
            }

            match self.sender.send(analysis, cancel).await {
                Ok(()) => {
                    report.enqueued += 1;
                    metrics::record_analysis_enqueued();
                }
                Err(HandoffError::Cancelled(_)) => {
                    report.cancelled = true;
                    break;
                }
                Err(HandoffError::Closed(_)) => {
                    warn!("No analysis workers left, ending scan {}", cycle_id);
                    break;
                }
            }
        }

        if report.cancelled {
            info!("Audio analysis scan {} terminated", cycle_id);
        }
        info!(
            "Audio analysis scan {} finished: scanned {}, not owned {}, skipped {}, created {}, enqueued {}",
            cycle_id,
            report.scanned,
            report.not_owned,
            report.skipped,
            report.created,
            report.enqueued
        );
        report
    }
}
