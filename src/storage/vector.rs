//! Vector index over entities and chunks of a partition graph
//!
//! Uses a trait-based embedding backend (`Embedder`) so production code can
//! use fastembed-rs while tests use deterministic mock embedders. Without an
//! embedder the index still records payloads and metadata; vectors stay empty
//! and can be filled by a later rebuild.
//!
//! Vectors live in their own database file next to the graph store and use
//! their own connection, so vector writes never contend with graph writes.

use super::traits::{IndexedVector, StorageResult, VectorEntry, VectorIndex};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// File name of the vector database inside a partition directory
pub const VECTOR_DB_FILE: &str = "vectors.db";

/// Error type for embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The embedding model returned no results
    #[error("embedding returned no results")]
    EmptyResult,
    /// The model returned a different number of vectors than inputs
    #[error("embedding returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },
    /// Model loading or inference failed
    #[error("embedding model error: {0}")]
    ModelError(String),
}

/// Trait for embedding text into vectors.
///
/// Implementations handle model loading and inference.
/// fastembed-rs for production, mock for tests.
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, returning one vector per text.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

// ---------------------------------------------------------------------------
// FastEmbedEmbedder: production embedder behind the `embeddings` feature
// ---------------------------------------------------------------------------

#[cfg(feature = "embeddings")]
mod fastembed_impl {
    use super::{Embedder, EmbeddingError};
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::sync::Mutex;

    /// Production embedder backed by fastembed (ONNX Runtime).
    ///
    /// Wraps `fastembed::TextEmbedding` in a `Mutex` because its `embed`
    /// method requires `&mut self`, while the `Embedder` trait uses `&self`.
    pub struct FastEmbedEmbedder {
        model: Mutex<TextEmbedding>,
    }

    impl FastEmbedEmbedder {
        pub fn new(model: EmbeddingModel) -> Result<Self, EmbeddingError> {
            let options = InitOptions::new(model).with_show_download_progress(false);
            let embedding = TextEmbedding::try_new(options)
                .map_err(|e| EmbeddingError::ModelError(e.to_string()))?;
            Ok(Self {
                model: Mutex::new(embedding),
            })
        }

        /// nomic-embed-text-v1.5
        pub fn default_model() -> Result<Self, EmbeddingError> {
            Self::new(EmbeddingModel::NomicEmbedTextV15)
        }
    }

    impl Embedder for FastEmbedEmbedder {
        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let mut model = self.model.lock().unwrap();
            let embeddings = model
                .embed(texts.to_vec(), None)
                .map_err(|e| EmbeddingError::ModelError(e.to_string()))?;
            if embeddings.is_empty() {
                return Err(EmbeddingError::EmptyResult);
            }
            Ok(embeddings)
        }
    }
}

#[cfg(feature = "embeddings")]
pub use fastembed_impl::FastEmbedEmbedder;

/// SQLite-backed vector index.
///
/// One row per `(namespace, id)`; vectors are stored as JSON arrays.
pub struct SqliteVectorIndex {
    conn: Mutex<Connection>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl SqliteVectorIndex {
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS vectors (
                namespace TEXT NOT NULL,
                id TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata_json TEXT NOT NULL,
                embedding_json TEXT NOT NULL,
                PRIMARY KEY (namespace, id)
            );

            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    /// Open or create the index inside a partition directory
    pub fn open(dir: impl AsRef<Path>, embedder: Option<Arc<dyn Embedder>>) -> StorageResult<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        let conn = Connection::open(dir.as_ref().join(VECTOR_DB_FILE))?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
        })
    }

    pub fn open_in_memory(embedder: Option<Arc<dyn Embedder>>) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
        })
    }

    fn embed(&self, entries: &BTreeMap<String, VectorEntry>) -> StorageResult<Vec<Vec<f32>>> {
        let Some(embedder) = &self.embedder else {
            return Ok(vec![Vec::new(); entries.len()]);
        };
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<&str> = entries.values().map(|e| e.content.as_str()).collect();
        let vectors = embedder.embed_batch(&texts)?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                got: vectors.len(),
            }
            .into());
        }
        Ok(vectors)
    }
}

impl VectorIndex for SqliteVectorIndex {
    fn upsert(&self, namespace: &str, entries: &BTreeMap<String, VectorEntry>) -> StorageResult<usize> {
        // Embed before taking the lock; inference can be slow.
        let vectors = self.embed(entries)?;

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for ((id, entry), vector) in entries.iter().zip(vectors) {
            tx.execute(
                r#"
                INSERT INTO vectors (namespace, id, content, metadata_json, embedding_json)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(namespace, id) DO UPDATE SET
                    content = excluded.content,
                    metadata_json = excluded.metadata_json,
                    embedding_json = excluded.embedding_json
                "#,
                params![
                    namespace,
                    id,
                    entry.content,
                    serde_json::to_string(&entry.metadata)?,
                    serde_json::to_string(&vector)?,
                ],
            )?;
        }
        tx.commit()?;
        Ok(entries.len())
    }

    fn get(&self, namespace: &str, id: &str) -> StorageResult<Option<IndexedVector>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(String, String, String)> = conn
            .query_row(
                "SELECT content, metadata_json, embedding_json FROM vectors WHERE namespace = ?1 AND id = ?2",
                params![namespace, id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        match row {
            Some((content, metadata_json, embedding_json)) => Ok(Some(IndexedVector {
                id: id.to_string(),
                entry: VectorEntry {
                    content,
                    metadata: serde_json::from_str(&metadata_json)?,
                },
                embedding: serde_json::from_str(&embedding_json)?,
            })),
            None => Ok(None),
        }
    }

    fn count(&self, namespace: &str) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM vectors WHERE namespace = ?1",
            params![namespace],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageError;

    /// Embeds each text as `[len, 1.0]`.
    struct LengthEmbedder;

    impl Embedder for LengthEmbedder {
        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    struct ShortEmbedder;

    impl Embedder for ShortEmbedder {
        fn embed_batch(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(vec![vec![0.0]])
        }
    }

    fn entry(content: &str) -> VectorEntry {
        let mut metadata = BTreeMap::new();
        metadata.insert("entity_name".to_string(), content.to_string());
        VectorEntry {
            content: content.to_string(),
            metadata,
        }
    }

    #[test]
    fn upsert_embeds_and_replaces() {
        let index = SqliteVectorIndex::open_in_memory(Some(Arc::new(LengthEmbedder))).unwrap();
        let mut entries = BTreeMap::new();
        entries.insert("ent-1".to_string(), entry("abc"));
        assert_eq!(index.upsert("entities", &entries).unwrap(), 1);

        let stored = index.get("entities", "ent-1").unwrap().unwrap();
        assert_eq!(stored.embedding, vec![3.0, 1.0]);

        entries.insert("ent-1".to_string(), entry("abcdef"));
        index.upsert("entities", &entries).unwrap();
        let stored = index.get("entities", "ent-1").unwrap().unwrap();
        assert_eq!(stored.entry.content, "abcdef");
        assert_eq!(stored.embedding, vec![6.0, 1.0]);
        assert_eq!(index.count("entities").unwrap(), 1);
    }

    #[test]
    fn namespaces_are_isolated() {
        let index = SqliteVectorIndex::open_in_memory(None).unwrap();
        let mut entries = BTreeMap::new();
        entries.insert("id".to_string(), entry("x"));
        index.upsert("entities", &entries).unwrap();

        assert_eq!(index.count("entities").unwrap(), 1);
        assert_eq!(index.count("chunks").unwrap(), 0);
        assert!(index.get("chunks", "id").unwrap().is_none());
        assert!(index.get("entities", "id").unwrap().unwrap().embedding.is_empty());
    }

    #[test]
    fn mismatched_vector_count_is_rejected() {
        let index = SqliteVectorIndex::open_in_memory(Some(Arc::new(ShortEmbedder))).unwrap();
        let mut entries = BTreeMap::new();
        entries.insert("a".to_string(), entry("a"));
        entries.insert("b".to_string(), entry("b"));
        let err = index.upsert("entities", &entries).unwrap_err();
        assert!(matches!(
            err,
            StorageError::Embedding(EmbeddingError::CountMismatch { expected: 2, got: 1 })
        ));
        assert_eq!(index.count("entities").unwrap(), 0);
    }
}
