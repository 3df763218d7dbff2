//! Raw document source: `read(filepath) -> text`

use std::path::PathBuf;

/// Where raw document text comes from.
///
/// Reads are byte-for-byte passthrough; text is assumed to be UTF-8.
pub trait DocumentSource: Send + Sync {
    fn read(&self, filepath: &str) -> std::io::Result<String>;
}

/// Documents on the local filesystem, resolved against a root directory.
///
/// Absolute `filepath`s are used as given.
#[derive(Debug, Clone)]
pub struct FsDocumentSource {
    root: PathBuf,
}

impl FsDocumentSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl DocumentSource for FsDocumentSource {
    fn read(&self, filepath: &str) -> std::io::Result<String> {
        std::fs::read_to_string(self.root.join(filepath))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_relative_and_absolute_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        let source = FsDocumentSource::new(dir.path());

        assert_eq!(source.read("a.txt").unwrap(), "alpha");
        let absolute = dir.path().join("a.txt");
        assert_eq!(source.read(absolute.to_str().unwrap()).unwrap(), "alpha");
        assert!(source.read("missing.txt").is_err());
    }
}
