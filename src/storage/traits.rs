//! Storage trait definitions

use crate::graph::{ChunkRecord, DocumentMeta, EntityRecord, RelationshipRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Embedding error: {0}")]
    Embedding(#[from] super::vector::EmbeddingError),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Row counts of a partition graph
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphCounts {
    pub nodes: usize,
    pub edges: usize,
    pub chunks: usize,
    pub documents: usize,
}

/// Trait for the node/edge store of one partition's global graph
///
/// Every upsert replaces the stored value for its key; reconciliation of
/// conflicting contributions happens before the call (see `GraphMerger`).
pub trait GraphStore: Send + Sync {
    // === Writes ===

    /// Insert or replace the node keyed by `entity.name`
    fn upsert_node(&self, entity: &EntityRecord) -> StorageResult<()>;

    /// Insert or replace the directed edge keyed by `(src_id, tgt_id)`
    fn upsert_edge(&self, relationship: &RelationshipRecord) -> StorageResult<()>;

    /// Insert or replace chunks keyed by chunk id
    fn upsert_chunks(&self, chunks: &BTreeMap<String, ChunkRecord>) -> StorageResult<()>;

    /// Insert or replace full-document metadata keyed by document source id
    fn upsert_documents(&self, documents: &BTreeMap<String, DocumentMeta>) -> StorageResult<()>;

    // === Reads ===

    fn load_node(&self, name: &str) -> StorageResult<Option<EntityRecord>>;

    fn load_edge(&self, src_id: &str, tgt_id: &str) -> StorageResult<Option<RelationshipRecord>>;

    fn load_chunk(&self, id: &str) -> StorageResult<Option<ChunkRecord>>;

    fn load_document(&self, source_id: &str) -> StorageResult<Option<DocumentMeta>>;

    /// All nodes, ordered by name
    fn nodes(&self) -> StorageResult<Vec<EntityRecord>>;

    /// All chunks keyed by chunk id
    fn chunks(&self) -> StorageResult<BTreeMap<String, ChunkRecord>>;

    fn counts(&self) -> StorageResult<GraphCounts>;
}

/// Payload handed to a vector index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntry {
    /// Text that gets embedded
    pub content: String,
    /// Opaque key/value metadata stored alongside the vector
    pub metadata: BTreeMap<String, String>,
}

/// A stored vector index row
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedVector {
    pub id: String,
    pub entry: VectorEntry,
    /// Empty when no embedder is configured
    pub embedding: Vec<f32>,
}

/// Trait for a content-addressed vector index
///
/// Entries are scoped by namespace (`entities`, `chunks`) so ids from
/// different record kinds never collide.
pub trait VectorIndex: Send + Sync {
    /// Embed and insert or replace entries; returns the number written
    fn upsert(&self, namespace: &str, entries: &BTreeMap<String, VectorEntry>) -> StorageResult<usize>;

    fn get(&self, namespace: &str, id: &str) -> StorageResult<Option<IndexedVector>>;

    fn count(&self, namespace: &str) -> StorageResult<usize>;
}

/// Extension trait for opening stores rooted at a partition directory
pub trait OpenStore: Sized {
    /// Open or create a store inside the given directory
    fn open(dir: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
