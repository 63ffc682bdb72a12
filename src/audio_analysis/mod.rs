//! Background tempo and key extraction for owned audio blobs.

mod extractor;
mod handoff;
mod pipeline;
mod scheduler;
#[cfg(test)]
mod testing;
mod worker;

pub use extractor::{CommandFeatureExtractor, ExtractionError, FeatureExtractor};
pub use handoff::{handoff, HandoffError, HandoffReceiver, HandoffSender};
pub use pipeline::{AnalysisError, AnalysisPipeline};
pub use scheduler::{
    AnalysisScheduler, AnalysisSchedulerSettings, CycleReport, ANALYSIS_CYCLE_INTERVAL,
    ANALYSIS_CYCLE_THROTTLE,
};
pub use worker::{AnalysisWorkerPool, DEFAULT_ANALYSIS_WORKERS};
