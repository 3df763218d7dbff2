//! Storage backends for partition graphs
//!
//! A published partition is a directory holding a node/edge store
//! (`GraphStore`) and a vector index (`VectorIndex`). The primary
//! implementations are SQLite files inside that directory.

mod sqlite;
mod traits;
pub mod vector;

pub use sqlite::{SqliteGraphStore, GRAPH_DB_FILE};
pub use traits::{
    GraphCounts, GraphStore, IndexedVector, OpenStore, StorageError, StorageResult, VectorEntry,
    VectorIndex,
};
pub use vector::{Embedder, EmbeddingError, SqliteVectorIndex, VECTOR_DB_FILE};

#[cfg(feature = "embeddings")]
pub use vector::FastEmbedEmbedder;
