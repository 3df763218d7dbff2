//! Configuration and on-disk layout
//!
//! Every field has a default, so an absent or partial YAML file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::extract::{DEFAULT_CHUNK_OVERLAP_TOKENS, DEFAULT_CHUNK_TOKEN_SIZE};
use crate::publish::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// `<platform data dir>/jigsaw`, falling back to `~/.local/share/jigsaw`
pub fn default_data_dir() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("jigsaw")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 0,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Completion command: program followed by its arguments
    pub command: Vec<String>,
    pub timeout_seconds: u64,
    pub chunk_token_size: usize,
    pub chunk_overlap_tokens: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_seconds: 120,
            chunk_token_size: DEFAULT_CHUNK_TOKEN_SIZE,
            chunk_overlap_tokens: DEFAULT_CHUNK_OVERLAP_TOKENS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Root that document `filepath`s are resolved against
    pub documents_root: PathBuf,
    pub retry: RetryConfig,
    pub extraction: ExtractionConfig,
    pub embedding: EmbeddingConfig,
    /// Label stored with every recorded extraction request
    pub scenario: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            documents_root: PathBuf::from("."),
            retry: RetryConfig::default(),
            extraction: ExtractionConfig::default(),
            embedding: EmbeddingConfig::default(),
            scenario: None,
        }
    }
}

impl Config {
    pub fn from_yaml(path: &Path, yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(yaml) => Self::from_yaml(path, &yaml),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn layout(&self) -> Layout {
        Layout::new(&self.data_dir)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction.timeout_seconds)
    }
}

/// Paths of all core-owned state under the data directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub lifecycle_db: PathBuf,
    /// Artifact files, `<fingerprint>.json`
    pub json_dir: PathBuf,
    pub staging_root: PathBuf,
    pub published_root: PathBuf,
    pub retired_root: PathBuf,
}

impl Layout {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            lifecycle_db: data_dir.join("lifecycle.db"),
            json_dir: data_dir.join("json"),
            staging_root: data_dir.join("kg_staging"),
            published_root: data_dir.join("kg"),
            retired_root: data_dir.join("kg_retired"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_is_all_defaults() {
        let config = Config::from_yaml(Path::new("c.yaml"), "{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.retry.policy(), RetryPolicy::new(3, Duration::ZERO));
        assert_eq!(config.extraction.chunk_token_size, 1200);
        assert_eq!(config.extraction.chunk_overlap_tokens, 100);
        assert!(!config.embedding.enabled);
    }

    #[test]
    fn partial_yaml_overrides_fields() {
        let yaml = r#"
data_dir: /srv/jigsaw
retry:
  max_attempts: 5
extraction:
  command: ["llm", "-m", "small"]
  timeout_seconds: 30
scenario: nightly
"#;
        let config = Config::from_yaml(Path::new("c.yaml"), yaml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/jigsaw"));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.backoff_ms, 0);
        assert_eq!(config.extraction.command, vec!["llm", "-m", "small"]);
        assert_eq!(config.extraction_timeout(), Duration::from_secs(30));
        assert_eq!(config.extraction.chunk_token_size, 1200);
        assert_eq!(config.scenario.as_deref(), Some("nightly"));
    }

    #[test]
    fn invalid_yaml_is_reported() {
        let err = Config::from_yaml(Path::new("c.yaml"), "retry: [1, 2").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn layout_derives_from_data_dir() {
        let layout = Layout::new(Path::new("/data"));
        assert_eq!(layout.lifecycle_db, PathBuf::from("/data/lifecycle.db"));
        assert_eq!(layout.json_dir, PathBuf::from("/data/json"));
        assert_eq!(layout.staging_root, PathBuf::from("/data/kg_staging"));
        assert_eq!(layout.published_root, PathBuf::from("/data/kg"));
        assert_eq!(layout.retired_root, PathBuf::from("/data/kg_retired"));
    }
}
