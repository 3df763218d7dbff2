//! Subgraph extraction
//!
//! The graph-extraction library is a black box behind `Extractor`.
//! `SubgraphExtractor` wraps it to produce fingerprinted, tagged
//! `SubgraphArtifact`s; `PromptExtractor` is the LLM-backed implementation.

mod consolidate;
mod prompt;
mod subgraph;
mod tokenizer;
mod traits;

pub use prompt::{PromptExtractor, DEFAULT_CHUNK_OVERLAP_TOKENS, DEFAULT_CHUNK_TOKEN_SIZE};
pub use subgraph::{document_source_id, fingerprint, ExtractedSubgraph, SubgraphExtractor};
pub use tokenizer::{chunk_by_tokens, clean_text, count_tokens, TokenizerError, TOKENIZER_ID, TOKENIZER_MODEL};
pub use traits::{ExtractionError, Extractor, RawChunk, RawExtraction};
