//! Jigsaw: incremental global knowledge graph builder
//!
//! Maintains one global knowledge graph per partition, assembled from
//! per-document subgraphs, so a retrieval service can query a single
//! consistent graph instead of many disjoint extractions.
//!
//! # Core Concepts
//!
//! - **Lifecycle**: every document is `New`, `Modified`, `Persistent` or
//!   `Deleted`; only `Persistent` documents feed aggregation
//! - **Subgraph artifacts**: immutable, content-addressed extraction output
//!   (chunks, entities, relationships) stored as `<fingerprint>.json`
//! - **Merge**: deterministic, append-only reconciliation of entities and
//!   relationships across a partition's artifacts
//! - **Generations**: Phase 2 builds a staging generation that is swapped
//!   in place of the published one by renames
//!
//! # Example
//!
//! ```
//! use jigsaw::{EntityRecord, GraphMerger, OpenStore, SqliteGraphStore, SubgraphArtifact};
//!
//! let store = SqliteGraphStore::open_in_memory().unwrap();
//! let mut merger = GraphMerger::new(&store);
//! let artifact = SubgraphArtifact {
//!     source_id: "doc-1".into(),
//!     content: String::new(),
//!     file_path: String::new(),
//!     chunks: vec![],
//!     entities: vec![EntityRecord::new("X", "T1", "first", "doc-1")],
//!     relationships: vec![],
//! };
//! merger.merge_artifact(&artifact).unwrap();
//! assert_eq!(merger.entity("X").unwrap().entity_type, "T1");
//! ```

pub mod artifact;
pub mod config;
pub mod extract;
mod graph;
pub mod lifecycle;
pub mod llm;
pub mod pipeline;
pub mod publish;
pub mod source;
pub mod storage;

pub use artifact::{ArtifactError, ArtifactStore};
pub use config::{Config, ConfigError, Layout};
pub use extract::{ExtractionError, Extractor, PromptExtractor, RawChunk, RawExtraction, SubgraphExtractor};
pub use graph::{
    compute_hash_id, reconcile_entity, reconcile_relationship, ChunkRecord, DocumentMeta,
    EntityRecord, GraphMerger, MergeStats, ProjectionStats, RelationshipKey, RelationshipRecord,
    SubgraphArtifact, CHUNK_NAMESPACE, ENTITY_NAMESPACE, GRAPH_FIELD_SEP, NO_DESCRIPTION,
    RELATIONSHIP_KEY_SEP, UNKNOWN_ENTITY_TYPE, UNKNOWN_SOURCE,
};
pub use lifecycle::{
    DocumentId, DocumentRecord, DocumentStatus, LifecycleError, LifecycleStore, NewDocument,
    RequestRecord, SqliteLifecycleStore, UsageRecord, REQUEST_GENERATE,
};
pub use llm::{
    CommandCompletionClient, Completion, CompletionClient, CompletionUsage, LlmError,
    MockCompletionClient,
};
pub use pipeline::{
    AggregationReport, ConsistencyError, MergeError, PartitionAggregator, PhaseError,
    RefreshReport, SubgraphRefresh,
};
pub use publish::{
    GenerationSwap, PublishController, PublishError, RecoveryAction, RetryPolicy, RunOutcome,
    RunState,
};
pub use source::{DocumentSource, FsDocumentSource};
pub use storage::{
    GraphStore, OpenStore, SqliteGraphStore, SqliteVectorIndex, StorageError, StorageResult,
    VectorIndex,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
