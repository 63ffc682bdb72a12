use super::handoff::HandoffReceiver;
use super::pipeline::AnalysisPipeline;
use crate::record_store::{AudioAnalysis, FailureKind};
use crate::server::metrics;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub const DEFAULT_ANALYSIS_WORKERS: usize = 5;

/// Fixed set of workers, each running one attempt at a time.
pub struct AnalysisWorkerPool {
    workers: JoinSet<()>,
}

impl AnalysisWorkerPool {
    pub fn spawn(
        size: usize,
        receiver: HandoffReceiver<AudioAnalysis>,
        pipeline: Arc<AnalysisPipeline>,
    ) -> Self {
        let mut workers = JoinSet::new();
        for worker_id in 0..size.max(1) {
            let receiver = receiver.clone();
            let pipeline = pipeline.clone();
            workers.spawn(async move {
                run_worker(worker_id, receiver, pipeline).await;
            });
        }
        info!("Started {} audio analysis workers", size.max(1));
        Self { workers }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Waits for every worker to exit, which happens once the sender is dropped.
    pub async fn join(mut self) {
        while let Some(result) = self.workers.join_next().await {
            if let Err(e) = result {
                warn!("Analysis worker task failed: {}", e);
            }
        }
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: HandoffReceiver<AudioAnalysis>,
    pipeline: Arc<AnalysisPipeline>,
) {
    while let Some(analysis) = receiver.recv().await {
        let key = analysis.key.clone();
        debug!("Worker {} analyzing {}", worker_id, key);
        let started = Instant::now();
        let result = pipeline.run(analysis).await;
        let elapsed = started.elapsed();

        match result {
            Ok(results) => {
                metrics::record_analysis_attempt("done", elapsed);
                info!(
                    "Audio analysis of {} done in {:?}: {} bpm, {}",
                    key, elapsed, results.bpm, results.key
                );
            }
            Err(e) => {
                let outcome = match e.kind() {
                    FailureKind::Absent => "absent",
                    FailureKind::Permanent => "poisoned",
                    FailureKind::Retryable => "error",
                };
                metrics::record_analysis_attempt(outcome, elapsed);
                warn!("Audio analysis of {} failed after {:?}: {}", key, elapsed, e);
            }
        }
    }
    debug!("Analysis worker {} stopped", worker_id);
}
