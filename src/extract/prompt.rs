//! LLM-backed extractor
//!
//! Chunks the document with the pinned tokenizer and asks a completion
//! client for the entities and relationships of each chunk as JSON.

use super::tokenizer::{chunk_by_tokens, clean_text};
use super::traits::{ExtractionError, Extractor, RawChunk, RawExtraction};
use crate::graph::{
    compute_hash_id, finite_weight, EntityRecord, RelationshipRecord, NO_DESCRIPTION,
    UNKNOWN_ENTITY_TYPE,
};
use crate::llm::CompletionClient;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

pub const DEFAULT_CHUNK_TOKEN_SIZE: usize = 1200;
pub const DEFAULT_CHUNK_OVERLAP_TOKENS: usize = 100;

const PROMPT_TEMPLATE: &str = r#"Extract a knowledge graph from the text below.

Respond with a single JSON object and nothing else:
{
  "entities": [
    {"entity_name": "...", "entity_type": "...", "description": "..."}
  ],
  "relationships": [
    {"src_id": "...", "tgt_id": "...", "description": "...", "keywords": "...", "weight": 1.0}
  ]
}

Relationship endpoints must be entity names from the entities list.
Use an empty list when nothing applies.

Text:
"#;

#[derive(Debug, Deserialize)]
struct ChunkGraph {
    #[serde(default)]
    entities: Vec<ExtractedEntity>,
    #[serde(default)]
    relationships: Vec<ExtractedRelationship>,
}

#[derive(Debug, Deserialize)]
struct ExtractedEntity {
    #[serde(alias = "name")]
    entity_name: String,
    #[serde(default, alias = "type")]
    entity_type: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExtractedRelationship {
    #[serde(alias = "source")]
    src_id: String,
    #[serde(alias = "target")]
    tgt_id: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    keywords: Keywords,
    #[serde(default)]
    weight: Option<serde_json::Value>,
}

/// Models return keywords either as one string or as a list.
#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum Keywords {
    #[default]
    None,
    Text(String),
    List(Vec<String>),
}

impl Keywords {
    fn joined(self) -> String {
        match self {
            Keywords::None => String::new(),
            Keywords::Text(s) => s.trim().to_string(),
            Keywords::List(items) => items
                .iter()
                .map(|k| k.trim())
                .filter(|k| !k.is_empty())
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// Entity names are matched exactly downstream; normalize them once here.
fn normalize_name(name: &str) -> String {
    name.trim().trim_matches('"').trim().to_uppercase()
}

fn non_empty(value: Option<String>, fallback: &str) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn parse_weight(value: Option<serde_json::Value>) -> f64 {
    let weight = match value {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(1.0),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(1.0),
        _ => 1.0,
    };
    finite_weight(weight)
}

/// Spans of a completion that may hold the chunk graph: the whole text,
/// every fenced block, then everything between the outermost braces.
fn json_candidates(completion: &str) -> Vec<&str> {
    let text = completion.trim();
    let mut candidates = vec![text];

    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let body = &rest[open + 3..];
        let body = body.strip_prefix("json").unwrap_or(body);
        let Some(close) = body.find("```") else {
            break;
        };
        candidates.push(body[..close].trim());
        rest = &body[close + 3..];
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            candidates.push(&text[start..=end]);
        }
    }
    candidates
}

impl ChunkGraph {
    /// Parse the first candidate span that deserializes as a graph object.
    fn from_completion(completion: &str) -> Result<Self, String> {
        let mut last_error = None;
        for candidate in json_candidates(completion) {
            if !candidate.starts_with('{') {
                continue;
            }
            match serde_json::from_str::<ChunkGraph>(candidate) {
                Ok(graph) => return Ok(graph),
                Err(e) => last_error = Some(e.to_string()),
            }
        }
        Err(last_error.unwrap_or_else(|| "no JSON object in completion".to_string()))
    }
}

/// Extractor that prompts a `CompletionClient` once per chunk.
pub struct PromptExtractor {
    client: Arc<dyn CompletionClient>,
    chunk_token_size: usize,
    chunk_overlap_tokens: usize,
}

impl PromptExtractor {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self {
            client,
            chunk_token_size: DEFAULT_CHUNK_TOKEN_SIZE,
            chunk_overlap_tokens: DEFAULT_CHUNK_OVERLAP_TOKENS,
        }
    }

    pub fn with_chunking(mut self, chunk_token_size: usize, chunk_overlap_tokens: usize) -> Self {
        self.chunk_token_size = chunk_token_size.max(1);
        self.chunk_overlap_tokens = chunk_overlap_tokens;
        self
    }

    fn build_prompt(chunk: &str) -> String {
        format!("{}{}", PROMPT_TEMPLATE, chunk)
    }

    fn parse_chunk_graph(
        completion: &str,
        chunk_id: &str,
        source_id: &str,
        out: &mut RawExtraction,
    ) -> Result<(), ExtractionError> {
        let malformed = |message: String| ExtractionError::Malformed {
            document: source_id.to_string(),
            message,
        };

        let graph = ChunkGraph::from_completion(completion).map_err(malformed)?;

        for entity in graph.entities {
            let name = normalize_name(&entity.entity_name);
            if name.is_empty() {
                continue;
            }
            out.entities.push(EntityRecord::new(
                name,
                non_empty(entity.entity_type, UNKNOWN_ENTITY_TYPE).to_uppercase(),
                non_empty(entity.description, NO_DESCRIPTION),
                chunk_id,
            ));
        }

        for relationship in graph.relationships {
            let src = normalize_name(&relationship.src_id);
            let tgt = normalize_name(&relationship.tgt_id);
            if src.is_empty() || tgt.is_empty() {
                continue;
            }
            out.relationships.push(RelationshipRecord::new(
                src,
                tgt,
                non_empty(relationship.description, ""),
                relationship.keywords.joined(),
                parse_weight(relationship.weight),
                chunk_id,
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl Extractor for PromptExtractor {
    async fn extract(&self, text: &str, source_id: &str) -> Result<RawExtraction, ExtractionError> {
        let mut out = RawExtraction::default();
        let pieces = chunk_by_tokens(text, self.chunk_token_size, self.chunk_overlap_tokens).map_err(
            |source| ExtractionError::Tokenizer {
                document: source_id.to_string(),
                source,
            },
        )?;

        for (index, piece) in pieces.into_iter().enumerate() {
            let chunk_id = compute_hash_id(&clean_text(&piece), "chunk-");
            let completion = self
                .client
                .complete(&Self::build_prompt(&piece))
                .await
                .map_err(|e| ExtractionError::Extractor {
                    document: source_id.to_string(),
                    message: e.to_string(),
                })?;

            out.usage.push(completion.usage);
            Self::parse_chunk_graph(&completion.text, &chunk_id, source_id, &mut out)?;
            out.chunks.push(RawChunk::at(piece, index as u32));
        }

        tracing::debug!(
            document = source_id,
            chunks = out.chunks.len(),
            entities = out.entities.len(),
            relationships = out.relationships.len(),
            tokens = out.usage.iter().map(|u| u.total_tokens()).sum::<u64>(),
            "prompt extraction complete"
        );
        Ok(out)
    }
}
