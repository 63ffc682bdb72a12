mod models;
mod schema;
mod store;
mod trait_def;

pub use models::{
    AnalysisResults, AnalysisStatus, AudioAnalysis, FailureKind, Granularity, RecordStats,
    ANALYSIS_RETRY_CEILING,
};
pub use store::SqliteRecordStore;
pub use trait_def::RecordStore;
