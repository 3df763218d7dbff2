//! Subgraph extractor: wraps an `Extractor` and produces tagged artifacts

use super::consolidate::{consolidate_entities, consolidate_relationships};
use super::tokenizer::{clean_text, count_tokens};
use super::traits::{ExtractionError, Extractor, RawChunk};
use crate::graph::{compute_hash_id, ChunkRecord, SubgraphArtifact, UNKNOWN_SOURCE};
use crate::llm::CompletionUsage;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Fingerprint of a document revision: hex SHA-256 of its cleaned text.
pub fn fingerprint(cleaned: &str) -> String {
    hex::encode(Sha256::digest(cleaned.as_bytes()))
}

/// Source id of the artifact produced for a fingerprint.
pub fn document_source_id(fingerprint: &str) -> String {
    format!("doc-{}", fingerprint)
}

/// A freshly extracted artifact together with the fingerprint it is stored under
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedSubgraph {
    pub fingerprint: String,
    pub artifact: SubgraphArtifact,
    /// Completions spent producing the artifact
    pub usage: Vec<CompletionUsage>,
}

/// Turns one document's full text into a `SubgraphArtifact`.
///
/// Cleans the text, fingerprints it, delegates to the wrapped extractor and
/// tags every chunk with its content-addressed id, owning document, token
/// count and ordinal. Repeated entity names and relationship keys are
/// consolidated so the artifact holds one record for each.
#[derive(Clone)]
pub struct SubgraphExtractor {
    inner: Arc<dyn Extractor>,
}

impl SubgraphExtractor {
    pub fn new(inner: Arc<dyn Extractor>) -> Self {
        Self { inner }
    }

    /// Extract `text` belonging to `document` (used in error reports) and
    /// read from `file_path`.
    pub async fn extract(
        &self,
        text: &str,
        document: &str,
        file_path: &str,
    ) -> Result<ExtractedSubgraph, ExtractionError> {
        let cleaned = clean_text(text);
        if cleaned.is_empty() {
            return Err(ExtractionError::EmptyDocument {
                document: document.to_string(),
            });
        }

        let fingerprint = fingerprint(&cleaned);
        let source_id = document_source_id(&fingerprint);

        let raw = self
            .inner
            .extract(&cleaned, &source_id)
            .await
            .map_err(|e| relabel(e, document))?;

        let mut raw_chunks = raw.chunks;
        if raw_chunks.is_empty() {
            raw_chunks.push(RawChunk::at(cleaned.clone(), 0));
        }

        let mut chunks = Vec::with_capacity(raw_chunks.len());
        for raw_chunk in raw_chunks {
            let content = clean_text(&raw_chunk.content);
            if content.is_empty() {
                continue;
            }
            let token_count = count_tokens(&content).map_err(|source| ExtractionError::Tokenizer {
                document: document.to_string(),
                source,
            })?;
            chunks.push(ChunkRecord {
                source_id: compute_hash_id(&content, "chunk-"),
                full_doc_id: source_id.clone(),
                token_count,
                order_index: raw_chunk.order_index.unwrap_or(0),
                content,
            });
        }

        let mut entities = raw.entities;
        for entity in &mut entities {
            entity.name = entity.name.trim().to_string();
            if entity.name.is_empty() {
                return Err(ExtractionError::Malformed {
                    document: document.to_string(),
                    message: "entity without a name".to_string(),
                });
            }
            if entity.source_id.is_empty() || entity.source_id == UNKNOWN_SOURCE {
                entity.source_id = source_id.clone();
            }
        }

        let mut relationships = raw.relationships;
        for relationship in &mut relationships {
            relationship.src_id = relationship.src_id.trim().to_string();
            relationship.tgt_id = relationship.tgt_id.trim().to_string();
            if relationship.src_id.is_empty() || relationship.tgt_id.is_empty() {
                return Err(ExtractionError::Malformed {
                    document: document.to_string(),
                    message: "relationship without both endpoints".to_string(),
                });
            }
            if relationship.source_id.is_empty() || relationship.source_id == UNKNOWN_SOURCE {
                relationship.source_id = source_id.clone();
            }
        }

        Ok(ExtractedSubgraph {
            fingerprint,
            artifact: SubgraphArtifact {
                source_id,
                content: cleaned,
                file_path: file_path.to_string(),
                chunks,
                entities: consolidate_entities(entities),
                relationships: consolidate_relationships(relationships),
            },
            usage: raw.usage,
        })
    }
}

/// Inner extractors only know the artifact source id; report the document.
fn relabel(error: ExtractionError, document: &str) -> ExtractionError {
    let document = document.to_string();
    match error {
        ExtractionError::Read { source, .. } => ExtractionError::Read { document, source },
        ExtractionError::Extractor { message, .. } => ExtractionError::Extractor { document, message },
        ExtractionError::Malformed { message, .. } => ExtractionError::Malformed { document, message },
        ExtractionError::EmptyDocument { .. } => ExtractionError::EmptyDocument { document },
        ExtractionError::Tokenizer { source, .. } => ExtractionError::Tokenizer { document, source },
    }
}
