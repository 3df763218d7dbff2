//! Merge algorithm: reconciles entity and relationship records from many
//! subgraph artifacts into one partition graph
//!
//! Reconciliation is append-only for provenance: descriptions, source ids and
//! keywords accumulate as `<SEP>`-joined strings in processing order. Entity
//! types accumulate new-first when they differ. Relationship weight is the
//! one last-write-wins field.
//!
//! Every reconciled record is written to the destination store as soon as it
//! is produced, so a later conflict always reads the reconciled-so-far value.

use super::records::{
    compute_hash_id, ChunkRecord, EntityRecord, RelationshipKey, RelationshipRecord,
    SubgraphArtifact, GRAPH_FIELD_SEP,
};
use crate::extract::clean_text;
use crate::storage::{GraphStore, StorageResult, VectorEntry, VectorIndex};
use std::collections::{BTreeMap, HashMap};

/// Vector index namespace for entity records
pub const ENTITY_NAMESPACE: &str = "entities";

/// Vector index namespace for chunk records
pub const CHUNK_NAMESPACE: &str = "chunks";

fn join(old: &str, new: &str) -> String {
    format!("{}{}{}", old, GRAPH_FIELD_SEP, new)
}

/// Reconcile a new contribution for an already-seen entity name.
pub fn reconcile_entity(old: &EntityRecord, new: &EntityRecord) -> EntityRecord {
    let entity_type = if new.entity_type != old.entity_type {
        join(&new.entity_type, &old.entity_type)
    } else {
        new.entity_type.clone()
    };

    EntityRecord {
        name: old.name.clone(),
        entity_type,
        description: join(&old.description, &new.description),
        source_id: join(&old.source_id, &new.source_id),
    }
}

/// Reconcile a new contribution for an already-seen `(src, tgt)` key.
pub fn reconcile_relationship(old: &RelationshipRecord, new: &RelationshipRecord) -> RelationshipRecord {
    RelationshipRecord {
        src_id: old.src_id.clone(),
        tgt_id: old.tgt_id.clone(),
        description: join(&old.description, &new.description),
        keywords: join(&old.keywords, &new.keywords),
        weight: new.weight,
        source_id: join(&old.source_id, &new.source_id),
    }
}

/// Counters for one partition merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub artifacts: usize,
    pub chunks: usize,
    pub entities_inserted: usize,
    pub entities_reconciled: usize,
    pub relationships_inserted: usize,
    pub relationships_reconciled: usize,
}

/// Counters for the vector projection step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionStats {
    pub entities: usize,
    pub chunks: usize,
}

/// Accumulates artifacts for one partition into a destination graph store.
pub struct GraphMerger<'a> {
    store: &'a dyn GraphStore,
    entities: HashMap<String, EntityRecord>,
    relationships: HashMap<RelationshipKey, RelationshipRecord>,
    stats: MergeStats,
}

impl<'a> GraphMerger<'a> {
    /// Create a merger with empty accumulators
    pub fn new(store: &'a dyn GraphStore) -> Self {
        Self {
            store,
            entities: HashMap::new(),
            relationships: HashMap::new(),
            stats: MergeStats::default(),
        }
    }

    /// Merge one artifact. Artifacts must be fed in processing order.
    pub fn merge_artifact(&mut self, artifact: &SubgraphArtifact) -> StorageResult<()> {
        self.merge_chunks(artifact)?;

        for entity in &artifact.entities {
            self.merge_entity(entity)?;
        }

        for relationship in &artifact.relationships {
            self.merge_relationship(relationship)?;
        }

        let mut documents = BTreeMap::new();
        documents.insert(artifact.source_id.clone(), artifact.document_meta());
        self.store.upsert_documents(&documents)?;

        self.stats.artifacts += 1;
        Ok(())
    }

    /// Chunks are inserted verbatim; their id already disambiguates by content.
    fn merge_chunks(&mut self, artifact: &SubgraphArtifact) -> StorageResult<()> {
        let mut chunks = BTreeMap::new();
        for chunk in &artifact.chunks {
            let content = clean_text(&chunk.content);
            let id = compute_hash_id(&content, "chunk-");
            let full_doc_id = if chunk.full_doc_id.is_empty() {
                artifact.source_id.clone()
            } else {
                chunk.full_doc_id.clone()
            };
            chunks.insert(
                id.clone(),
                ChunkRecord {
                    content,
                    source_id: id,
                    full_doc_id,
                    token_count: chunk.token_count,
                    order_index: chunk.order_index,
                },
            );
        }
        if !chunks.is_empty() {
            self.store.upsert_chunks(&chunks)?;
            self.stats.chunks += chunks.len();
        }
        Ok(())
    }

    fn merge_entity(&mut self, entity: &EntityRecord) -> StorageResult<()> {
        let merged = match self.entities.get(&entity.name) {
            None => {
                self.stats.entities_inserted += 1;
                entity.clone()
            }
            Some(old) => {
                self.stats.entities_reconciled += 1;
                reconcile_entity(old, entity)
            }
        };
        self.store.upsert_node(&merged)?;
        self.entities.insert(merged.name.clone(), merged);
        Ok(())
    }

    fn merge_relationship(&mut self, relationship: &RelationshipRecord) -> StorageResult<()> {
        let key = relationship.key();
        let merged = match self.relationships.get(&key) {
            None => {
                self.stats.relationships_inserted += 1;
                relationship.clone()
            }
            Some(old) => {
                self.stats.relationships_reconciled += 1;
                reconcile_relationship(old, relationship)
            }
        };
        self.store.upsert_edge(&merged)?;
        self.relationships.insert(key, merged);
        Ok(())
    }

    /// Project the reconciled entities and all stored chunks into a vector index.
    ///
    /// Entities are keyed by `ent-<hash(name)>` with payload `name + description`.
    pub fn project(&self, index: &dyn VectorIndex) -> StorageResult<ProjectionStats> {
        let mut entities = BTreeMap::new();
        for entity in self.entities.values() {
            let mut metadata = BTreeMap::new();
            metadata.insert("entity_name".to_string(), entity.name.clone());
            entities.insert(
                entity.vector_id(),
                VectorEntry {
                    content: format!("{}{}", entity.name, entity.description),
                    metadata,
                },
            );
        }

        let mut chunks = BTreeMap::new();
        for (id, chunk) in self.store.chunks()? {
            let mut metadata = BTreeMap::new();
            metadata.insert("full_doc_id".to_string(), chunk.full_doc_id.clone());
            metadata.insert("chunk_order_index".to_string(), chunk.order_index.to_string());
            chunks.insert(
                id,
                VectorEntry {
                    content: chunk.content,
                    metadata,
                },
            );
        }

        Ok(ProjectionStats {
            entities: index.upsert(ENTITY_NAMESPACE, &entities)?,
            chunks: index.upsert(CHUNK_NAMESPACE, &chunks)?,
        })
    }

    /// Reconciled-so-far value for an entity name
    pub fn entity(&self, name: &str) -> Option<&EntityRecord> {
        self.entities.get(name)
    }

    /// Reconciled-so-far value for a directed relationship
    pub fn relationship(&self, src_id: &str, tgt_id: &str) -> Option<&RelationshipRecord> {
        self.relationships.get(&RelationshipKey::new(src_id, tgt_id))
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    pub fn stats(&self) -> MergeStats {
        self.stats
    }
}
