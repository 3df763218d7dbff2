//! Common test utilities for pipeline scenarios
//!
//! Provides a scripted extractor (deterministic subgraphs keyed by document
//! text) and a temporary workspace wiring the lifecycle store, document
//! source, artifact directory and generation directories together.

#![allow(dead_code)]

use async_trait::async_trait;
use jigsaw::config::Layout;
use jigsaw::{
    ArtifactStore, CompletionUsage, DocumentId, DocumentRecord, EntityRecord, ExtractionError, Extractor,
    FsDocumentSource, GenerationSwap, LifecycleStore, NewDocument, OpenStore, PartitionAggregator,
    PublishController, RawChunk, RawExtraction, RelationshipRecord, RetryPolicy,
    SqliteGraphStore, SqliteLifecycleStore, SubgraphExtractor, SubgraphRefresh, UNKNOWN_SOURCE,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Extractor returning a fixed subgraph per document text.
///
/// Texts registered with `failing` raise `ExtractionError::Extractor` on
/// every call. Unknown texts yield an empty subgraph.
#[derive(Default)]
pub struct ScriptedExtractor {
    scripts: Mutex<HashMap<String, RawExtraction>>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    total_calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script entities as `(name, type, description)` for a document text
    pub fn with_entities(self, text: &str, entities: &[(&str, &str, &str)]) -> Self {
        {
            let mut scripts = self.scripts.lock().unwrap();
            let script = scripts.entry(text.to_string()).or_default();
            script.chunks = vec![RawChunk::at(text, 0)];
            for (name, entity_type, description) in entities {
                script
                    .entities
                    .push(EntityRecord::new(*name, *entity_type, *description, UNKNOWN_SOURCE));
            }
        }
        self
    }

    /// Script relationships as `(src, tgt, keywords, weight)` for a document text
    pub fn with_relationships(self, text: &str, relationships: &[(&str, &str, &str, f64)]) -> Self {
        {
            let mut scripts = self.scripts.lock().unwrap();
            let script = scripts.entry(text.to_string()).or_default();
            for (src, tgt, keywords, weight) in relationships {
                script.relationships.push(RelationshipRecord::new(
                    *src,
                    *tgt,
                    format!("{} relates to {}", src, tgt),
                    *keywords,
                    *weight,
                    UNKNOWN_SOURCE,
                ));
            }
        }
        self
    }

    /// Report one completion per entry as spent on a document text
    pub fn with_usage(self, text: &str, usage: &[CompletionUsage]) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(text.to_string())
            .or_default()
            .usage
            .extend_from_slice(usage);
        self
    }

    pub fn failing(self, text: &str) -> Self {
        self.failing.lock().unwrap().insert(text.to_string());
        self
    }

    /// Texts extracted so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, text: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|t| *t == text).count()
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(&self, text: &str, source_id: &str) -> Result<RawExtraction, ExtractionError> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(text.to_string());

        if self.failing.lock().unwrap().contains(text) {
            return Err(ExtractionError::Extractor {
                document: source_id.to_string(),
                message: "scripted failure".to_string(),
            });
        }
        Ok(self
            .scripts
            .lock()
            .unwrap()
            .get(text)
            .cloned()
            .unwrap_or_default())
    }
}

/// Temporary data directory with everything a run needs
pub struct Workspace {
    _dir: TempDir,
    pub documents_root: PathBuf,
    pub layout: Layout,
    pub lifecycle: Arc<SqliteLifecycleStore>,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let documents_root = dir.path().join("documents");
        std::fs::create_dir_all(&documents_root).unwrap();
        let layout = Layout::new(&dir.path().join("data"));
        let lifecycle = Arc::new(SqliteLifecycleStore::open(&layout.lifecycle_db).unwrap());
        Self {
            _dir: dir,
            documents_root,
            layout,
            lifecycle,
        }
    }

    /// Write `text` to `<name>.txt` and register it as `New`
    pub fn add_document(&self, name: &str, text: &str, partition: Option<&str>) -> DocumentId {
        let filepath = format!("{}.txt", name);
        std::fs::write(self.documents_root.join(&filepath), text).unwrap();
        let mut document = NewDocument::new(name, filepath);
        if let Some(partition) = partition {
            document = document.with_partition(partition);
        }
        self.lifecycle.register(&document).unwrap().id
    }

    pub fn document(&self, id: DocumentId) -> DocumentRecord {
        self.lifecycle.get(id).unwrap().unwrap()
    }

    pub fn artifacts(&self) -> ArtifactStore {
        ArtifactStore::new(&self.layout.json_dir)
    }

    pub fn artifact_count(&self) -> usize {
        match std::fs::read_dir(&self.layout.json_dir) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }

    pub fn refresh(&self, extractor: Arc<dyn Extractor>) -> SubgraphRefresh {
        SubgraphRefresh::new(
            self.lifecycle.clone(),
            Arc::new(FsDocumentSource::new(&self.documents_root)),
            SubgraphExtractor::new(extractor),
            self.artifacts(),
        )
    }

    pub fn aggregator(&self) -> PartitionAggregator {
        PartitionAggregator::new(self.lifecycle.clone(), self.artifacts())
            .with_published_root(&self.layout.published_root)
    }

    pub fn swap(&self) -> GenerationSwap {
        GenerationSwap::new(
            &self.layout.staging_root,
            &self.layout.published_root,
            &self.layout.retired_root,
        )
    }

    pub fn controller(&self, extractor: Arc<dyn Extractor>) -> PublishController {
        PublishController::new(
            self.refresh(extractor),
            self.aggregator(),
            self.swap(),
            RetryPolicy::default(),
        )
    }

    /// Open a partition graph under a generation root
    pub fn graph(&self, root: &Path, partition: &str) -> SqliteGraphStore {
        SqliteGraphStore::open(root.join(partition)).unwrap()
    }
}
