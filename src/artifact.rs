//! Content-addressed subgraph artifact files
//!
//! Artifacts live at `<json_dir>/<fingerprint>.json` and are never rewritten:
//! a file that already exists for a fingerprint is left as is.

use crate::graph::SubgraphArtifact;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error on {path:?}: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Artifact not found: {0:?}")]
    Missing(PathBuf),
}

/// Directory of artifact files keyed by fingerprint
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the artifact for `fingerprint`
    pub fn path_for(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{}.json", fingerprint))
    }

    pub fn exists(&self, fingerprint: &str) -> bool {
        self.path_for(fingerprint).is_file()
    }

    /// Persist an artifact. Returns `false` when one already existed.
    ///
    /// Writes to a temporary sibling and renames it into place so a reader
    /// never sees a half-written file.
    pub fn write(&self, fingerprint: &str, artifact: &SubgraphArtifact) -> Result<bool, ArtifactError> {
        let path = self.path_for(fingerprint);
        if path.is_file() {
            return Ok(false);
        }

        fs::create_dir_all(&self.dir).map_err(|source| ArtifactError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let json = serde_json::to_vec_pretty(artifact).map_err(|source| ArtifactError::Serialization {
            path: path.clone(),
            source,
        })?;

        let tmp = self.dir.join(format!(".{}.json.tmp", fingerprint));
        fs::write(&tmp, json).map_err(|source| ArtifactError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| ArtifactError::Io {
            path: path.clone(),
            source,
        })?;

        Ok(true)
    }

    pub fn read(&self, fingerprint: &str) -> Result<SubgraphArtifact, ArtifactError> {
        self.read_path(&self.path_for(fingerprint))
    }

    pub fn read_path(&self, path: &Path) -> Result<SubgraphArtifact, ArtifactError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArtifactError::Missing(path.to_path_buf()))
            }
            Err(source) => {
                return Err(ArtifactError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_slice(&bytes).map_err(|source| ArtifactError::Serialization {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EntityRecord;
    use tempfile::tempdir;

    fn artifact(description: &str) -> SubgraphArtifact {
        SubgraphArtifact {
            source_id: "doc-abc".to_string(),
            content: "text".to_string(),
            file_path: "a.txt".to_string(),
            chunks: vec![],
            entities: vec![EntityRecord::new("X", "T", description, "doc-abc")],
            relationships: vec![],
        }
    }

    #[test]
    fn write_then_read() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("json"));

        assert!(!store.exists("abc"));
        assert!(store.write("abc", &artifact("d1")).unwrap());
        assert!(store.exists("abc"));
        assert_eq!(store.path_for("abc"), dir.path().join("json").join("abc.json"));
        assert_eq!(store.read("abc").unwrap(), artifact("d1"));
    }

    #[test]
    fn existing_artifact_is_never_rewritten() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        assert!(store.write("abc", &artifact("first")).unwrap());
        assert!(!store.write("abc", &artifact("second")).unwrap());
        assert_eq!(store.read("abc").unwrap().entities[0].description, "first");
    }

    #[test]
    fn missing_artifact_is_reported() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(matches!(store.read("nope"), Err(ArtifactError::Missing(_))));
    }

    #[test]
    fn corrupt_artifact_is_serialization_error() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        fs::write(store.path_for("bad"), b"{not json").unwrap();
        assert!(matches!(store.read("bad"), Err(ArtifactError::Serialization { .. })));
    }
}
