//! Graph records and the merge algorithm

mod merge;
mod records;


pub use merge::{
    reconcile_entity, reconcile_relationship, GraphMerger, MergeStats, ProjectionStats,
    CHUNK_NAMESPACE, ENTITY_NAMESPACE,
};
pub use records::{
    compute_hash_id, finite_weight, ChunkRecord, DocumentMeta, EntityRecord, RelationshipKey, RelationshipRecord,
    SubgraphArtifact, GRAPH_FIELD_SEP, NO_DESCRIPTION, RELATIONSHIP_KEY_SEP, UNKNOWN_ENTITY_TYPE,
    UNKNOWN_SOURCE,
};
