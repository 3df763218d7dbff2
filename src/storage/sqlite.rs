//! SQLite storage backend for partition graphs

use super::traits::{GraphCounts, GraphStore, OpenStore, StorageResult};
use crate::graph::{finite_weight, ChunkRecord, DocumentMeta, EntityRecord, RelationshipRecord};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

/// File name of the graph database inside a partition directory
pub const GRAPH_DB_FILE: &str = "graph.db";

/// SQLite-backed graph store
///
/// Uses a single SQLite database file per partition with tables for nodes,
/// edges, chunks and documents. Thread-safe via internal mutex on the
/// connection.
pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
}

impl SqliteGraphStore {
    /// Initialize the database schema
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            -- Entity nodes, keyed by exact entity name
            CREATE TABLE IF NOT EXISTS nodes (
                name TEXT PRIMARY KEY,
                entity_type TEXT NOT NULL,
                description TEXT NOT NULL,
                source_id TEXT NOT NULL
            );

            -- Directed relationship edges
            CREATE TABLE IF NOT EXISTS edges (
                src_id TEXT NOT NULL,
                tgt_id TEXT NOT NULL,
                description TEXT NOT NULL,
                keywords TEXT NOT NULL,
                weight REAL NOT NULL,
                source_id TEXT NOT NULL,
                PRIMARY KEY (src_id, tgt_id)
            );

            CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(tgt_id);

            -- Text chunks, content-addressed
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                full_doc_id TEXT NOT NULL,
                tokens INTEGER NOT NULL,
                chunk_order_index INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_doc ON chunks(full_doc_id);

            -- Full-document scalar metadata
            CREATE TABLE IF NOT EXISTS documents (
                source_id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                file_path TEXT NOT NULL
            );

            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn row_to_chunk(id: String, content: String, full_doc_id: String, tokens: i64, order: i64) -> ChunkRecord {
        ChunkRecord {
            content,
            source_id: id,
            full_doc_id,
            token_count: tokens as usize,
            order_index: order as u32,
        }
    }
}

impl OpenStore for SqliteGraphStore {
    fn open(dir: impl AsRef<Path>) -> StorageResult<Self> {
        std::fs::create_dir_all(dir.as_ref())?;

        let conn = Connection::open(dir.as_ref().join(GRAPH_DB_FILE))?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl GraphStore for SqliteGraphStore {
    // === Writes ===

    fn upsert_node(&self, entity: &EntityRecord) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO nodes (name, entity_type, description, source_id)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(name) DO UPDATE SET
                entity_type = excluded.entity_type,
                description = excluded.description,
                source_id = excluded.source_id
            "#,
            params![entity.name, entity.entity_type, entity.description, entity.source_id],
        )?;
        Ok(())
    }

    fn upsert_edge(&self, relationship: &RelationshipRecord) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO edges (src_id, tgt_id, description, keywords, weight, source_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(src_id, tgt_id) DO UPDATE SET
                description = excluded.description,
                keywords = excluded.keywords,
                weight = excluded.weight,
                source_id = excluded.source_id
            "#,
            params![
                relationship.src_id,
                relationship.tgt_id,
                relationship.description,
                relationship.keywords,
                finite_weight(relationship.weight),
                relationship.source_id,
            ],
        )?;
        Ok(())
    }

    fn upsert_chunks(&self, chunks: &BTreeMap<String, ChunkRecord>) -> StorageResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for (id, chunk) in chunks {
            tx.execute(
                r#"
                INSERT INTO chunks (id, content, full_doc_id, tokens, chunk_order_index)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(id) DO UPDATE SET
                    content = excluded.content,
                    full_doc_id = excluded.full_doc_id,
                    tokens = excluded.tokens,
                    chunk_order_index = excluded.chunk_order_index
                "#,
                params![
                    id,
                    chunk.content,
                    chunk.full_doc_id,
                    chunk.token_count as i64,
                    chunk.order_index as i64,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn upsert_documents(&self, documents: &BTreeMap<String, DocumentMeta>) -> StorageResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for (source_id, doc) in documents {
            tx.execute(
                r#"
                INSERT INTO documents (source_id, content, file_path)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(source_id) DO UPDATE SET
                    content = excluded.content,
                    file_path = excluded.file_path
                "#,
                params![source_id, doc.content, doc.file_path],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    // === Reads ===

    fn load_node(&self, name: &str) -> StorageResult<Option<EntityRecord>> {
        let conn = self.conn.lock().unwrap();
        let node = conn
            .query_row(
                "SELECT name, entity_type, description, source_id FROM nodes WHERE name = ?1",
                params![name],
                |row| {
                    Ok(EntityRecord {
                        name: row.get(0)?,
                        entity_type: row.get(1)?,
                        description: row.get(2)?,
                        source_id: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(node)
    }

    fn load_edge(&self, src_id: &str, tgt_id: &str) -> StorageResult<Option<RelationshipRecord>> {
        let conn = self.conn.lock().unwrap();
        let edge = conn
            .query_row(
                "SELECT src_id, tgt_id, description, keywords, weight, source_id
                 FROM edges WHERE src_id = ?1 AND tgt_id = ?2",
                params![src_id, tgt_id],
                |row| {
                    Ok(RelationshipRecord {
                        src_id: row.get(0)?,
                        tgt_id: row.get(1)?,
                        description: row.get(2)?,
                        keywords: row.get(3)?,
                        weight: row.get(4)?,
                        source_id: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(edge)
    }

    fn load_chunk(&self, id: &str) -> StorageResult<Option<ChunkRecord>> {
        let conn = self.conn.lock().unwrap();
        let chunk = conn
            .query_row(
                "SELECT id, content, full_doc_id, tokens, chunk_order_index FROM chunks WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Self::row_to_chunk(
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )
            .optional()?;
        Ok(chunk)
    }

    fn load_document(&self, source_id: &str) -> StorageResult<Option<DocumentMeta>> {
        let conn = self.conn.lock().unwrap();
        let doc = conn
            .query_row(
                "SELECT content, file_path FROM documents WHERE source_id = ?1",
                params![source_id],
                |row| {
                    Ok(DocumentMeta {
                        content: row.get(0)?,
                        file_path: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(doc)
    }

    fn nodes(&self) -> StorageResult<Vec<EntityRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT name, entity_type, description, source_id FROM nodes ORDER BY name",
        )?;
        let nodes = stmt
            .query_map([], |row| {
                Ok(EntityRecord {
                    name: row.get(0)?,
                    entity_type: row.get(1)?,
                    description: row.get(2)?,
                    source_id: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(nodes)
    }

    fn chunks(&self) -> StorageResult<BTreeMap<String, ChunkRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, content, full_doc_id, tokens, chunk_order_index FROM chunks",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Self::row_to_chunk(
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
            ))
        })?;

        let mut chunks = BTreeMap::new();
        for row in rows {
            let chunk = row?;
            chunks.insert(chunk.source_id.clone(), chunk);
        }
        Ok(chunks)
    }

    fn counts(&self) -> StorageResult<GraphCounts> {
        let conn = self.conn.lock().unwrap();
        let count = |table: &str| -> StorageResult<usize> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
            Ok(n as usize)
        };
        Ok(GraphCounts {
            nodes: count("nodes")?,
            edges: count("edges")?,
            chunks: count("chunks")?,
            documents: count("documents")?,
        })
    }
}
