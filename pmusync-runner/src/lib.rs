//! pmusync runner: everything a collection run touches outside the pure planning core.
//!
//! This crate builds on `pmusync-core` to provide:
//! - Instrument registry loading from the historian archive directory
//! - The staging file that assembles query payloads
//! - Attempt and summary logs
//! - Object storage adapters (local directory, S3 behind the `s3` feature)
//! - Compression and archival handoff
//! - The run orchestrator and its report

pub mod archive;
pub mod audit;
pub mod collector;
pub mod registry;
pub mod staging;
pub mod storage;

pub use archive::{archive_path, ArchivalHandoff, ArchiveError, CommandCompressor, Compressor, HandoffStatus};
pub use audit::{AttemptLog, Milestone, SummaryLog};
pub use collector::{preview, Collector, RunError, RunPreview, RunReport, RunStatus};
pub use registry::{ArchiveRegistry, InstrumentRegistry, RegistryError, StaticRegistry};
pub use staging::{StagingError, StagingFile};
pub use storage::{build_store, BlobStore, FsBlobStore, StorageError};

#[cfg(feature = "s3")]
pub use storage::S3BlobStore;
