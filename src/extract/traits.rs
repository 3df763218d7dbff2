//! Extractor contract and extraction errors

use super::tokenizer::TokenizerError;
use crate::graph::{EntityRecord, RelationshipRecord};
use crate::llm::CompletionUsage;
use async_trait::async_trait;
use thiserror::Error;

/// Errors from turning one document into a subgraph.
///
/// Every variant carries the originating document identifier so Phase 1 can
/// record the failure and move on to the next document.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("document {document}: cannot read source: {source}")]
    Read {
        document: String,
        #[source]
        source: std::io::Error,
    },

    #[error("document {document}: extractor failed: {message}")]
    Extractor { document: String, message: String },

    #[error("document {document}: malformed extractor output: {message}")]
    Malformed { document: String, message: String },

    #[error("document {document}: no text after cleaning")]
    EmptyDocument { document: String },

    #[error("document {document}: {source}")]
    Tokenizer {
        document: String,
        #[source]
        source: TokenizerError,
    },
}

impl ExtractionError {
    /// Identifier of the document whose extraction failed
    pub fn document(&self) -> &str {
        match self {
            ExtractionError::Read { document, .. }
            | ExtractionError::Extractor { document, .. }
            | ExtractionError::Malformed { document, .. }
            | ExtractionError::EmptyDocument { document }
            | ExtractionError::Tokenizer { document, .. } => document,
        }
    }
}

/// A chunk as returned by an extractor, before tagging.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChunk {
    pub content: String,
    /// Position within the document; `None` is tagged as 0
    pub order_index: Option<u32>,
}

impl RawChunk {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            order_index: None,
        }
    }

    pub fn at(content: impl Into<String>, order_index: u32) -> Self {
        Self {
            content: content.into(),
            order_index: Some(order_index),
        }
    }
}

/// Untagged extraction output for one document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawExtraction {
    pub chunks: Vec<RawChunk>,
    pub entities: Vec<EntityRecord>,
    pub relationships: Vec<RelationshipRecord>,
    /// One entry per completion spent on this document
    pub usage: Vec<CompletionUsage>,
}

/// The graph-extraction library, seen as `extract(text, sourceId) -> subgraph`.
///
/// Implementations may block on network I/O. Failures must be reported as
/// `ExtractionError` naming `source_id`.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, text: &str, source_id: &str) -> Result<RawExtraction, ExtractionError>;
}
