//! Lifecycle store contract

use super::types::{DocumentId, DocumentRecord, DocumentStatus, NewDocument, RequestRecord, UsageRecord};
use crate::llm::CompletionUsage;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during lifecycle store operations
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Document not found: {0}")]
    DocumentNotFound(DocumentId),

    #[error("Invalid transition for document {id}: {from} -> {to}")]
    InvalidTransition {
        id: DocumentId,
        from: DocumentStatus,
        to: DocumentStatus,
    },

    #[error("Document {0}: fingerprint must be set iff status is Persistent")]
    FingerprintInvariant(DocumentId),

    #[error("Request not found: {0}")]
    RequestNotFound(Uuid),

    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for lifecycle operations
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Repository over per-document lifecycle records.
///
/// The store is the single source of truth for what needs reprocessing.
/// Every mutating method runs in its own transaction: it commits when it
/// returns `Ok` and rolls back on every error path.
pub trait LifecycleStore: Send + Sync {
    /// Register a document with status `New`
    fn register(&self, document: &NewDocument) -> LifecycleResult<DocumentRecord>;

    fn get(&self, id: DocumentId) -> LifecycleResult<Option<DocumentRecord>>;

    /// All documents ordered by id
    fn list(&self) -> LifecycleResult<Vec<DocumentRecord>>;

    /// Documents whose status is one of `statuses`, ordered by id
    fn query_by_status(&self, statuses: &[DocumentStatus]) -> LifecycleResult<Vec<DocumentRecord>>;

    /// `Persistent` documents with a fingerprint, grouped by trimmed
    /// partition key. Documents without a usable key are left out.
    /// Within a partition, documents are ordered by id.
    fn query_persistent_grouped_by_partition(&self) -> LifecycleResult<BTreeMap<String, Vec<DocumentRecord>>>;

    /// Validate and apply a status change together with its fingerprint
    fn update_status_and_fingerprint(
        &self,
        id: DocumentId,
        status: DocumentStatus,
        fingerprint: Option<&str>,
    ) -> LifecycleResult<DocumentRecord>;

    /// Record Phase 2 bookkeeping (`updated_at`) for every listed document
    fn touch_partition(&self, ids: &[DocumentId]) -> LifecycleResult<()>;

    /// External edit signal: `Persistent -> Modified`
    fn mark_modified(&self, id: DocumentId) -> LifecycleResult<DocumentRecord> {
        self.update_status_and_fingerprint(id, DocumentStatus::Modified, None)
    }

    /// Operator retirement: `any -> Deleted`
    fn mark_deleted(&self, id: DocumentId) -> LifecycleResult<DocumentRecord> {
        self.update_status_and_fingerprint(id, DocumentStatus::Deleted, None)
    }

    /// Successful extraction: `New | Modified -> Persistent`
    fn mark_persistent(&self, id: DocumentId, fingerprint: &str) -> LifecycleResult<DocumentRecord> {
        self.update_status_and_fingerprint(id, DocumentStatus::Persistent, Some(fingerprint))
    }

    // === Request accounting ===

    /// Open a request under a fresh `req_id`
    fn record_request(&self, content: &str, req_type: &str, scenario: Option<&str>) -> LifecycleResult<RequestRecord>;

    /// Attach the usage of one completion to an existing request
    fn record_usage(&self, req_id: Uuid, usage: &CompletionUsage) -> LifecycleResult<UsageRecord>;

    /// All requests ordered by id
    fn requests(&self) -> LifecycleResult<Vec<RequestRecord>>;

    /// Usage rows of one request, in recording order
    fn usage_for(&self, req_id: Uuid) -> LifecycleResult<Vec<UsageRecord>>;
}
