//! Rename-based generation swap with startup recovery
//!
//! Three sibling directories take part: `staging` (built by Phase 2),
//! `published` (read by queries) and `retired` (the previous generation,
//! kept only while a swap is in flight). A swap is two renames:
//!
//! 1. `published -> retired`
//! 2. `staging -> published`
//!
//! after which `retired` is removed. The old generation survives until the
//! new one is in place, and `recover` resolves a swap interrupted between
//! any two steps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Marker file confirming a staging tree was fully written
pub const GENERATION_MARKER: &str = "GENERATION.json";

/// The marker is written here first and renamed into place
const GENERATION_MARKER_TMP: &str = ".GENERATION.json.tmp";

/// Whether `name` is taken by generation bookkeeping inside a generation
/// root, and so cannot name a partition directory
pub fn is_reserved_name(name: &str) -> bool {
    name == GENERATION_MARKER || name == GENERATION_MARKER_TMP
}

#[derive(Debug, Error)]
pub enum SwapError {
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Staging generation at {0:?} has no GENERATION.json marker")]
    Unconfirmed(PathBuf),

    #[error("Bad generation marker at {path:?}: {source}")]
    Marker {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> SwapError + '_ {
    move |source| SwapError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Contents of `GENERATION.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationMarker {
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub merged_partitions: Vec<String>,
    pub failed_partitions: Vec<String>,
}

impl GenerationMarker {
    pub fn new(merged_partitions: Vec<String>, failed_partitions: Vec<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            created_at: Utc::now(),
            merged_partitions,
            failed_partitions,
        }
    }
}

/// What `recover` found and did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// No interrupted swap
    Clean,
    /// Published was missing; the confirmed staging tree was moved in
    RolledForward,
    /// Published was missing; the retired generation was moved back
    Restored,
    /// The swap had completed; the leftover retired generation was removed
    DroppedRetired,
}

#[derive(Debug, Clone)]
pub struct GenerationSwap {
    staging: PathBuf,
    published: PathBuf,
    retired: PathBuf,
}

impl GenerationSwap {
    pub fn new(staging: impl Into<PathBuf>, published: impl Into<PathBuf>, retired: impl Into<PathBuf>) -> Self {
        Self {
            staging: staging.into(),
            published: published.into(),
            retired: retired.into(),
        }
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging
    }

    /// Root of the generation visible to readers
    pub fn published_path(&self) -> &Path {
        &self.published
    }

    /// Confirm the staging tree as fully written.
    ///
    /// The marker appears atomically: a torn write leaves only the temp file,
    /// which `read_marker` ignores.
    pub fn write_marker(&self, marker: &GenerationMarker) -> Result<PathBuf, SwapError> {
        let path = self.staging.join(GENERATION_MARKER);
        let json = serde_json::to_vec_pretty(marker).map_err(|source| SwapError::Marker {
            path: path.clone(),
            source,
        })?;
        let tmp = self.staging.join(GENERATION_MARKER_TMP);
        fs::write(&tmp, json).map_err(io_error(&tmp))?;
        fs::rename(&tmp, &path).map_err(io_error(&path))?;
        Ok(path)
    }

    /// Marker of the generation rooted at `dir`, if any
    pub fn read_marker(dir: &Path) -> Result<Option<GenerationMarker>, SwapError> {
        let path = dir.join(GENERATION_MARKER);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(SwapError::Io { path, source }),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| SwapError::Marker { path, source })
    }

    /// Resolve an interrupted swap.
    pub fn recover(&self) -> Result<RecoveryAction, SwapError> {
        let action = match (self.published.exists(), self.retired.exists()) {
            (false, true) => {
                if self.staging.is_dir() && Self::read_marker(&self.staging)?.is_some() {
                    fs::rename(&self.staging, &self.published).map_err(io_error(&self.staging))?;
                    fs::remove_dir_all(&self.retired).map_err(io_error(&self.retired))?;
                    RecoveryAction::RolledForward
                } else {
                    fs::rename(&self.retired, &self.published).map_err(io_error(&self.retired))?;
                    RecoveryAction::Restored
                }
            }
            (true, true) => {
                fs::remove_dir_all(&self.retired).map_err(io_error(&self.retired))?;
                RecoveryAction::DroppedRetired
            }
            _ => RecoveryAction::Clean,
        };

        if action != RecoveryAction::Clean {
            warn!(action = ?action, published = %self.published.display(), "recovered interrupted generation swap");
        }
        Ok(action)
    }

    /// Make the confirmed staging generation the published one.
    pub fn publish(&self) -> Result<GenerationMarker, SwapError> {
        if self.recover()? == RecoveryAction::RolledForward {
            // The interrupted swap already moved the staging tree in.
            return Self::read_marker(&self.published)?
                .ok_or_else(|| SwapError::Unconfirmed(self.published.clone()));
        }

        let marker = Self::read_marker(&self.staging)?
            .ok_or_else(|| SwapError::Unconfirmed(self.staging.clone()))?;

        let had_published = self.published.exists();
        if had_published {
            fs::rename(&self.published, &self.retired).map_err(io_error(&self.published))?;
        }

        if let Err(source) = fs::rename(&self.staging, &self.published) {
            if had_published {
                if let Err(e) = fs::rename(&self.retired, &self.published) {
                    warn!(error = %e, "could not restore retired generation; recover will retry");
                }
            }
            return Err(SwapError::Io {
                path: self.staging.clone(),
                source,
            });
        }

        if had_published {
            if let Err(e) = fs::remove_dir_all(&self.retired) {
                warn!(error = %e, retired = %self.retired.display(), "could not remove retired generation");
            }
        }

        info!(run_id = %marker.run_id, published = %self.published.display(), "generation published");
        Ok(marker)
    }
}
