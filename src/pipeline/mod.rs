//! The two aggregation phases
//!
//! Phase 1 (`SubgraphRefresh`) brings every `New`/`Modified` document to
//! `Persistent` with a stored artifact. Phase 2 (`PartitionAggregator`)
//! merges the artifacts of each partition into a staging graph.
//!
//! Document-level and partition-level failures are logged and recorded in
//! the phase report; they never abort sibling work. Only a `PhaseError`
//! stops a phase.

mod aggregate;
mod refresh;

pub use aggregate::{AggregationReport, PartitionAggregator, PartitionFailure, PartitionSummary};
pub use refresh::{DocumentFailure, RefreshReport, SubgraphRefresh};

use crate::artifact::ArtifactError;
use crate::extract::ExtractionError;
use crate::lifecycle::{DocumentId, LifecycleError};
use crate::storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;

/// Per-document failure in Phase 1
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),
}

/// A `Persistent` document whose artifact cannot be located.
///
/// Hard stop for the document's partition.
#[derive(Debug, Error)]
pub enum ConsistencyError {
    #[error("Document {0} is Persistent without a fingerprint")]
    MissingFingerprint(DocumentId),

    #[error("Document {document} is Persistent but its artifact is missing: {path:?}")]
    MissingArtifact { document: DocumentId, path: PathBuf },
}

/// Per-partition failure in Phase 2
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Invalid partition key: {0:?}")]
    InvalidPartitionKey(String),

    #[error("Consistency error: {0}")]
    Consistency(#[from] ConsistencyError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure that keeps a phase from running at all
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
