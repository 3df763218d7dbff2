//! Document lifecycle records and the status state machine

use crate::llm::CompletionUsage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle status of a source document.
///
/// ```text
/// New ──────┐
///           ├─(extraction ok)─▶ Persistent ─(edit signal)─▶ Modified
/// Modified ─┘
/// any ─(operator)─▶ Deleted   (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentStatus {
    /// Never extracted
    New,
    /// Previously extracted, flagged stale by an external signal
    Modified,
    /// Has a valid current artifact; eligible for aggregation
    Persistent,
    /// Retired by an operator; excluded from extraction and aggregation
    Deleted,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "New",
            Self::Modified => "Modified",
            Self::Persistent => "Persistent",
            Self::Deleted => "Deleted",
        }
    }

    /// Whether this status selects a document for (re)extraction
    pub fn needs_extraction(&self) -> bool {
        matches!(self, Self::New | Self::Modified)
    }

    /// Whether the state machine allows moving from `self` to `target`.
    pub fn can_transition_to(&self, target: DocumentStatus) -> bool {
        match (self, target) {
            (Self::Deleted, _) => false,
            (_, Self::Deleted) => true,
            (Self::New | Self::Modified, Self::Persistent) => true,
            (Self::Persistent, Self::Modified) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "New" => Ok(Self::New),
            "Modified" => Ok(Self::Modified),
            "Persistent" => Ok(Self::Persistent),
            "Deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown document status: {}", other)),
        }
    }
}

/// Row id of a document in the lifecycle store
pub type DocumentId = i64;

/// A document tracked by the lifecycle store
///
/// Invariant: `fingerprint.is_some()` iff `status == Persistent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub filename: String,
    /// Location of the raw text, relative to the documents root
    pub filepath: String,
    /// Fingerprint of the current subgraph artifact
    pub fingerprint: Option<String>,
    pub status: DocumentStatus,
    /// Partition ("base entry") whose global graph this document feeds
    pub partition_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentRecord {
    /// Trimmed partition key, or `None` when absent or blank
    pub fn partition(&self) -> Option<&str> {
        self.partition_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    /// Whether the document may enter Phase 2 aggregation
    pub fn is_aggregatable(&self) -> bool {
        self.status == DocumentStatus::Persistent && self.fingerprint.is_some()
    }
}

/// Registration request for a new document
#[derive(Debug, Clone, PartialEq)]
pub struct NewDocument {
    pub filename: String,
    pub filepath: String,
    pub partition_key: Option<String>,
}

impl NewDocument {
    pub fn new(filename: impl Into<String>, filepath: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            filepath: filepath.into(),
            partition_key: None,
        }
    }

    pub fn with_partition(mut self, partition_key: impl Into<String>) -> Self {
        self.partition_key = Some(partition_key.into());
        self
    }
}

/// Request type of a document extraction
pub const REQUEST_GENERATE: &str = "GENERATE";

/// One tracked request: a document extraction in Phase 1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: i64,
    pub req_id: Uuid,
    /// What was requested; the document filename for extractions
    pub content: String,
    pub req_type: String,
    pub scenario: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Token consumption of one completion made on behalf of a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: i64,
    pub req_id: Uuid,
    pub req_type: String,
    pub usage: CompletionUsage,
    pub scenario: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use DocumentStatus::*;

    #[test]
    fn extraction_moves_new_and_modified_to_persistent() {
        assert!(New.can_transition_to(Persistent));
        assert!(Modified.can_transition_to(Persistent));
        assert!(!Persistent.can_transition_to(Persistent));
    }

    #[test]
    fn edit_signal_only_applies_to_persistent() {
        assert!(Persistent.can_transition_to(Modified));
        assert!(!New.can_transition_to(Modified));
        assert!(!Modified.can_transition_to(New));
    }

    #[test]
    fn deleted_is_reachable_from_anywhere_and_terminal() {
        for s in [New, Modified, Persistent] {
            assert!(s.can_transition_to(Deleted));
        }
        for s in [New, Modified, Persistent, Deleted] {
            assert!(!Deleted.can_transition_to(s));
        }
    }

    #[test]
    fn status_round_trips_through_text() {
        for s in [New, Modified, Persistent, Deleted] {
            assert_eq!(s.as_str().parse::<DocumentStatus>().unwrap(), s);
        }
        assert!("persistent".parse::<DocumentStatus>().is_err());
    }

    #[test]
    fn blank_partition_keys_are_absent() {
        let now = Utc::now();
        let mut doc = DocumentRecord {
            id: 1,
            filename: "a".into(),
            filepath: "a.txt".into(),
            fingerprint: None,
            status: New,
            partition_key: Some("  P1 ".into()),
            created_at: now,
            updated_at: now,
        };
        assert_eq!(doc.partition(), Some("P1"));
        doc.partition_key = Some("   ".into());
        assert_eq!(doc.partition(), None);
        doc.partition_key = None;
        assert_eq!(doc.partition(), None);
    }
}
