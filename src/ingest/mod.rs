//! Incremental ingestion: exactly-once processing of watched files into the
//! knowledge store.
//!
//! `index` tracks what is already committed, `coordinator` runs the per-file
//! pipeline, and `service` ties both to the directory watcher.

pub mod coordinator;
pub mod index;
pub mod service;

pub use coordinator::{IngestOutcome, IngestReport, IngestionCoordinator};
pub use index::ProcessedFileIndex;
pub use service::KnowledgeService;
