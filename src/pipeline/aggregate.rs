//! Phase 2: partitioned aggregation

use super::{ConsistencyError, MergeError, PhaseError};
use crate::artifact::ArtifactStore;
use crate::graph::{GraphMerger, MergeStats, ProjectionStats};
use crate::lifecycle::{DocumentRecord, LifecycleStore};
use crate::publish::is_reserved_name;
use crate::storage::{Embedder, OpenStore, SqliteGraphStore, SqliteVectorIndex};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use walkdir::WalkDir;

/// A partition merged into the staging generation
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionSummary {
    pub partition: String,
    pub documents: usize,
    /// Distinct artifacts merged (documents can share one)
    pub artifacts: usize,
    pub entities: usize,
    pub relationships: usize,
    pub merge: MergeStats,
    pub projection: ProjectionStats,
}

/// A partition whose merge failed
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionFailure {
    pub partition: String,
    pub error: String,
    /// Whether the published copy was carried into staging
    pub carried_forward: bool,
}

/// Outcome of one Phase 2 run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationReport {
    pub merged: Vec<PartitionSummary>,
    pub failed: Vec<PartitionFailure>,
}

impl AggregationReport {
    pub fn merged_partitions(&self) -> Vec<String> {
        self.merged.iter().map(|p| p.partition.clone()).collect()
    }

    pub fn failed_partitions(&self) -> Vec<String> {
        self.failed.iter().map(|p| p.partition.clone()).collect()
    }
}

/// A partition key must name exactly one directory under the staging root,
/// and not one the generation bookkeeping uses.
pub fn validate_partition_key(key: &str) -> Result<(), MergeError> {
    if key.is_empty()
        || key == "."
        || key == ".."
        || key.contains('/')
        || key.contains('\\')
        || is_reserved_name(key)
    {
        return Err(MergeError::InvalidPartitionKey(key.to_string()));
    }
    Ok(())
}

/// Phase 2: merges every partition's artifacts into `<staging_root>/<partition>/`.
pub struct PartitionAggregator {
    lifecycle: Arc<dyn LifecycleStore>,
    artifacts: ArtifactStore,
    embedder: Option<Arc<dyn Embedder>>,
    published_root: Option<PathBuf>,
}

impl PartitionAggregator {
    pub fn new(lifecycle: Arc<dyn LifecycleStore>, artifacts: ArtifactStore) -> Self {
        Self {
            lifecycle,
            artifacts,
            embedder: None,
            published_root: None,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Published generation to carry failed partitions forward from
    pub fn with_published_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.published_root = Some(root.into());
        self
    }

    /// Rebuild the staging generation from scratch.
    ///
    /// Any previous staging tree is removed first. Each partition is an
    /// independent unit of work: its failure is logged and recorded, and the
    /// remaining partitions still run.
    pub fn run(&self, staging_root: &Path) -> Result<AggregationReport, PhaseError> {
        let groups = self.lifecycle.query_persistent_grouped_by_partition()?;

        if staging_root.exists() {
            fs::remove_dir_all(staging_root).map_err(|source| PhaseError::Io {
                path: staging_root.to_path_buf(),
                source,
            })?;
        }
        fs::create_dir_all(staging_root).map_err(|source| PhaseError::Io {
            path: staging_root.to_path_buf(),
            source,
        })?;

        info!(partitions = groups.len(), staging = %staging_root.display(), "phase 2: aggregating partitions");

        let mut report = AggregationReport::default();
        for (partition, documents) in &groups {
            match self.aggregate_partition(staging_root, partition, documents) {
                Ok(summary) => {
                    info!(
                        partition = %partition,
                        documents = summary.documents,
                        entities = summary.entities,
                        relationships = summary.relationships,
                        "partition merged"
                    );
                    report.merged.push(summary);
                }
                Err(e) => {
                    error!(partition = %partition, error = %e, "partition merge failed");
                    let carried_forward = self.carry_forward(staging_root, partition);
                    report.failed.push(PartitionFailure {
                        partition: partition.clone(),
                        error: e.to_string(),
                        carried_forward,
                    });
                }
            }
        }

        info!(
            merged = report.merged.len(),
            failed = report.failed.len(),
            "phase 2 finished"
        );
        Ok(report)
    }

    /// Distinct artifact paths in document order.
    ///
    /// Fails on the first document whose artifact cannot be located.
    fn artifact_paths(&self, documents: &[DocumentRecord]) -> Result<Vec<PathBuf>, ConsistencyError> {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();
        for document in documents {
            let fingerprint = document
                .fingerprint
                .as_deref()
                .ok_or(ConsistencyError::MissingFingerprint(document.id))?;
            let path = self.artifacts.path_for(fingerprint);
            if !path.is_file() {
                return Err(ConsistencyError::MissingArtifact {
                    document: document.id,
                    path,
                });
            }
            if seen.insert(path.clone()) {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    fn aggregate_partition(
        &self,
        staging_root: &Path,
        partition: &str,
        documents: &[DocumentRecord],
    ) -> Result<PartitionSummary, MergeError> {
        validate_partition_key(partition)?;
        let paths = self.artifact_paths(documents)?;

        let dir = staging_root.join(partition);
        let graph = SqliteGraphStore::open(&dir)?;
        let index = SqliteVectorIndex::open(&dir, self.embedder.clone())?;

        let mut merger = GraphMerger::new(&graph);
        for path in &paths {
            let artifact = self.artifacts.read_path(path)?;
            merger.merge_artifact(&artifact)?;
        }
        let projection = merger.project(&index)?;

        let ids: Vec<_> = documents.iter().map(|d| d.id).collect();
        self.lifecycle.touch_partition(&ids)?;

        Ok(PartitionSummary {
            partition: partition.to_string(),
            documents: documents.len(),
            artifacts: paths.len(),
            entities: merger.entity_count(),
            relationships: merger.relationship_count(),
            merge: merger.stats(),
            projection,
        })
    }

    /// Drop a failed partition's partial staging tree and, when the published
    /// generation has the partition, copy it into staging.
    fn carry_forward(&self, staging_root: &Path, partition: &str) -> bool {
        if validate_partition_key(partition).is_err() {
            return false;
        }

        let staged = staging_root.join(partition);
        if staged.exists() {
            if let Err(e) = fs::remove_dir_all(&staged) {
                warn!(partition = %partition, error = %e, "could not remove partial staging directory");
                return false;
            }
        }

        let Some(published) = self.published_root.as_ref().map(|root| root.join(partition)) else {
            return false;
        };
        if !published.is_dir() {
            return false;
        }

        match copy_dir(&published, &staged) {
            Ok(()) => {
                info!(partition = %partition, "carried published partition forward");
                true
            }
            Err(e) => {
                warn!(partition = %partition, error = %e, "carry-forward failed");
                let _ = fs::remove_dir_all(&staged);
                false
            }
        }
    }
}

/// Recursively copy `from` into a new directory `to`.
pub(crate) fn copy_dir(from: &Path, to: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(std::io::Error::other)?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_keys_must_be_single_components() {
        assert!(validate_partition_key("P1").is_ok());
        assert!(validate_partition_key("base entry").is_ok());
        for bad in ["", ".", "..", "a/b", "a\\b", "/abs", "GENERATION.json", ".GENERATION.json.tmp"] {
            assert!(matches!(
                validate_partition_key(bad),
                Err(MergeError::InvalidPartitionKey(_))
            ));
        }
    }

    #[test]
    fn copy_dir_copies_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("from");
        fs::create_dir_all(from.join("nested")).unwrap();
        fs::write(from.join("a.db"), b"a").unwrap();
        fs::write(from.join("nested").join("b"), b"b").unwrap();

        let to = dir.path().join("to");
        copy_dir(&from, &to).unwrap();
        assert_eq!(fs::read(to.join("a.db")).unwrap(), b"a");
        assert_eq!(fs::read(to.join("nested").join("b")).unwrap(), b"b");
    }
}
