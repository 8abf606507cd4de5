//! Typed failures for public operations.
//!
//! Boundary traits return `anyhow::Result`; these enums classify what a
//! caller of the indexing pipeline or the state store decoder can act on.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Counts of work that has been fully committed to the index store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexReport {
    /// Files that produced at least one chunk.
    pub files_indexed: usize,
    /// Chunks submitted in successful upserts.
    pub chunks_indexed: usize,
    /// Batches fully committed.
    pub batches_committed: usize,
    /// Candidate files skipped because they could not be read or decoded.
    pub files_skipped: usize,
    /// Documents removed by a forced reindex before the first batch.
    pub documents_cleared: u64,
}

/// Why a single batch failed to land.
#[derive(Error, Debug)]
pub enum BatchFailure {
    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("index store rejected upsert: {0}")]
    Store(String),

    #[error("upsert timed out after {0:?}")]
    TimedOut(Duration),

    #[error("chunking worker failed: {0}")]
    Worker(String),
}

#[derive(Error, Debug)]
pub enum IndexError {
    /// The root is not a usable source tree. Nothing was attempted.
    #[error("invalid source root {path}: {reason}")]
    InvalidRoot { path: PathBuf, reason: String },

    #[error("file discovery failed: {0}")]
    Discovery(String),

    /// A forced reindex could not empty the index. No batch was attempted.
    #[error("failed to clear index before reindexing: {0}")]
    Clear(String),

    /// A batch failed; `committed` covers the batches before it.
    #[error(
        "batch {batch} failed after committing {} files / {} chunks: {reason}",
        .committed.files_indexed,
        .committed.chunks_indexed
    )]
    BatchFailed {
        /// 0-based index of the failed batch; restart from here.
        batch: usize,
        committed: IndexReport,
        #[source]
        reason: BatchFailure,
    },
}

impl IndexError {
    /// Work committed before the failure (zero for pre-flight errors).
    pub fn committed(&self) -> IndexReport {
        match self {
            IndexError::BatchFailed { committed, .. } => *committed,
            _ => IndexReport::default(),
        }
    }
}

/// Failures while decoding a persisted state record.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("unsupported record schema version {0}")]
    UnsupportedVersion(u64),

    #[error("malformed record: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("record for {key} is a {found} record, expected {expected}")]
    KindMismatch {
        key: String,
        expected: crate::models::ArtifactKind,
        found: crate::models::ArtifactKind,
    },

    #[error("invalid timestamp {0:?}")]
    Timestamp(String),
}
