//! Typed records carried by subgraph artifacts and stored in partition graphs
//!
//! Field names on the wire follow the artifact JSON layout
//! (`entity_name`, `src_id`, `chunk_order_index`, ...), so artifacts written
//! by earlier extraction runs stay readable.

use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

/// Separator used when reconciled fields accumulate several values.
pub const GRAPH_FIELD_SEP: &str = "<SEP>";

/// Separator joining the two endpoints of a relationship key.
pub const RELATIONSHIP_KEY_SEP: &str = "######";

pub const UNKNOWN_ENTITY_TYPE: &str = "UNKNOWN";
pub const UNKNOWN_SOURCE: &str = "UNKNOWN";
pub const NO_DESCRIPTION: &str = "No description provided";

/// Compute a content-addressed id: `prefix` followed by the hex SHA-256 of `content`.
pub fn compute_hash_id(content: &str, prefix: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    format!("{}{}", prefix, hex::encode(digest))
}

fn default_entity_type() -> String {
    UNKNOWN_ENTITY_TYPE.to_string()
}

fn default_description() -> String {
    NO_DESCRIPTION.to_string()
}

fn default_source() -> String {
    UNKNOWN_SOURCE.to_string()
}

fn default_weight() -> f64 {
    1.0
}

/// Weights must be finite to be stored; anything else becomes the default.
pub fn finite_weight(weight: f64) -> f64 {
    if weight.is_finite() {
        weight
    } else {
        default_weight()
    }
}

/// An entity as extracted from one document, or as reconciled across many.
///
/// Identity is `name` (exact match).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    #[serde(rename = "entity_name")]
    pub name: String,
    #[serde(rename = "entity_type", default = "default_entity_type")]
    pub entity_type: String,
    #[serde(default = "default_description")]
    pub description: String,
    #[serde(default = "default_source")]
    pub source_id: String,
}

impl EntityRecord {
    pub fn new(
        name: impl Into<String>,
        entity_type: impl Into<String>,
        description: impl Into<String>,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            description: description.into(),
            source_id: source_id.into(),
        }
    }

    /// Vector index id for this entity: `ent-<hash(name)>`.
    pub fn vector_id(&self) -> String {
        compute_hash_id(&self.name, "ent-")
    }
}

/// Directional identity of a relationship: `(src, tgt)` differs from `(tgt, src)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationshipKey {
    pub src_id: String,
    pub tgt_id: String,
}

impl RelationshipKey {
    pub fn new(src_id: impl Into<String>, tgt_id: impl Into<String>) -> Self {
        Self {
            src_id: src_id.into(),
            tgt_id: tgt_id.into(),
        }
    }
}

impl std::fmt::Display for RelationshipKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.src_id, RELATIONSHIP_KEY_SEP, self.tgt_id)
    }
}

/// A directed relationship between two entity names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub src_id: String,
    pub tgt_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: String,
    #[serde(default = "default_weight", deserialize_with = "weight_from_number_or_string")]
    pub weight: f64,
    #[serde(default = "default_source")]
    pub source_id: String,
}

impl RelationshipRecord {
    pub fn new(
        src_id: impl Into<String>,
        tgt_id: impl Into<String>,
        description: impl Into<String>,
        keywords: impl Into<String>,
        weight: f64,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            src_id: src_id.into(),
            tgt_id: tgt_id.into(),
            description: description.into(),
            keywords: keywords.into(),
            weight: finite_weight(weight),
            source_id: source_id.into(),
        }
    }

    pub fn key(&self) -> RelationshipKey {
        RelationshipKey::new(self.src_id.clone(), self.tgt_id.clone())
    }
}

/// Graph exports write weights as text; accept either form.
fn weight_from_number_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Weight {
        Number(f64),
        Text(String),
    }

    let weight = match Weight::deserialize(deserializer)? {
        Weight::Number(n) => n,
        Weight::Text(s) => s.trim().parse::<f64>().map_err(serde::de::Error::custom)?,
    };
    Ok(finite_weight(weight))
}

/// A text chunk of a source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub content: String,
    /// Content-addressed chunk id (`chunk-<hash>`)
    pub source_id: String,
    /// Source id of the document the chunk belongs to
    #[serde(default)]
    pub full_doc_id: String,
    #[serde(rename = "tokens", default)]
    pub token_count: usize,
    #[serde(rename = "chunk_order_index", default)]
    pub order_index: u32,
}

/// Scalar metadata of a full source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub content: String,
    #[serde(default)]
    pub file_path: String,
}

/// Serialized extraction output for one document.
///
/// Immutable once written: a new extraction yields a new fingerprint and a
/// new artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubgraphArtifact {
    pub source_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub chunks: Vec<ChunkRecord>,
    #[serde(default)]
    pub entities: Vec<EntityRecord>,
    #[serde(default)]
    pub relationships: Vec<RelationshipRecord>,
}

impl SubgraphArtifact {
    pub fn document_meta(&self) -> DocumentMeta {
        DocumentMeta {
            content: self.content.clone(),
            file_path: self.file_path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relationship_key_is_directional() {
        let ab = RelationshipKey::new("A", "B");
        let ba = RelationshipKey::new("B", "A");
        assert_ne!(ab, ba);
        assert_eq!(ab.to_string(), "A######B");
    }

    #[test]
    fn hash_ids_are_prefixed_and_stable() {
        let a = compute_hash_id("Alan Turing", "ent-");
        let b = compute_hash_id("Alan Turing", "ent-");
        assert!(a.starts_with("ent-"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 4 + 64);
        assert_ne!(a, compute_hash_id("alan turing", "ent-"));
    }

    #[test]
    fn entity_defaults_fill_missing_fields() {
        let e: EntityRecord = serde_json::from_str(r#"{"entity_name": "X"}"#).unwrap();
        assert_eq!(e.entity_type, UNKNOWN_ENTITY_TYPE);
        assert_eq!(e.description, NO_DESCRIPTION);
        assert_eq!(e.source_id, UNKNOWN_SOURCE);
    }

    #[test]
    fn relationship_weight_accepts_text() {
        let r: RelationshipRecord = serde_json::from_str(
            r#"{"src_id": "A", "tgt_id": "B", "weight": "2.5", "description": "d", "keywords": "k"}"#,
        )
        .unwrap();
        assert_eq!(r.weight, 2.5);

        let r: RelationshipRecord =
            serde_json::from_str(r#"{"src_id": "A", "tgt_id": "B"}"#).unwrap();
        assert_eq!(r.weight, 1.0);
        assert_eq!(r.source_id, UNKNOWN_SOURCE);
    }

    #[test]
    fn non_finite_weights_fall_back_to_default() {
        for text in ["NaN", "inf", "-inf"] {
            let json = format!(r#"{{"src_id": "A", "tgt_id": "B", "weight": "{}"}}"#, text);
            let r: RelationshipRecord = serde_json::from_str(&json).unwrap();
            assert_eq!(r.weight, 1.0, "weight {:?}", text);
        }
        assert_eq!(RelationshipRecord::new("A", "B", "", "", f64::NAN, "s").weight, 1.0);
    }

    #[test]
    fn artifact_reads_chunk_wire_names() {
        let json = r#"{
            "source_id": "doc-1",
            "chunks": [{"content": "hello", "source_id": "chunk-1", "tokens": 2, "chunk_order_index": 3}],
            "entities": [],
            "relationships": []
        }"#;
        let artifact: SubgraphArtifact = serde_json::from_str(json).unwrap();
        assert_eq!(artifact.chunks[0].token_count, 2);
        assert_eq!(artifact.chunks[0].order_index, 3);
        assert_eq!(artifact.chunks[0].full_doc_id, "");
    }
}
