//! blobnet server library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod audio_analysis;
pub mod blob_store;
pub mod config;
pub mod health;
pub mod listens;
pub mod peers;
pub mod placement;
pub mod record_store;
pub mod server;
pub mod signature;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use blob_store::{BlobBucket, ContentKey, FileBucket};
pub use record_store::{RecordStore, SqliteRecordStore};
pub use server::{run_server, RequestsLoggingLevel};
