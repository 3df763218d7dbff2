//! Phase 1: subgraph refresh

use super::{DocumentError, PhaseError};
use crate::artifact::ArtifactStore;
use crate::extract::{ExtractionError, SubgraphExtractor};
use crate::lifecycle::{DocumentId, DocumentRecord, DocumentStatus, LifecycleStore, REQUEST_GENERATE};
use crate::llm::CompletionUsage;
use crate::source::DocumentSource;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A document that could not be refreshed
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentFailure {
    pub document: DocumentId,
    pub filename: String,
    pub error: String,
}

/// Outcome of one Phase 1 batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshReport {
    /// Documents moved to `Persistent`, in processing order
    pub refreshed: Vec<DocumentId>,
    pub failed: Vec<DocumentFailure>,
    /// Completion usage of the refreshed documents
    pub usage: CompletionUsage,
}

impl RefreshReport {
    /// The batch result contract: `true` only if no document failed
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Phase 1: extracts every `New`/`Modified` document and marks it `Persistent`.
///
/// Documents are processed strictly in sequence; a failing document is
/// logged and left in its current status while the batch continues. Each
/// extraction opens a `GENERATE` request in the lifecycle store and records
/// the usage of its completions under that request id.
pub struct SubgraphRefresh {
    lifecycle: Arc<dyn LifecycleStore>,
    source: Arc<dyn DocumentSource>,
    extractor: SubgraphExtractor,
    artifacts: ArtifactStore,
    scenario: Option<String>,
}

impl SubgraphRefresh {
    pub fn new(
        lifecycle: Arc<dyn LifecycleStore>,
        source: Arc<dyn DocumentSource>,
        extractor: SubgraphExtractor,
        artifacts: ArtifactStore,
    ) -> Self {
        Self {
            lifecycle,
            source,
            extractor,
            artifacts,
            scenario: None,
        }
    }

    /// Label stored with every request this refresh records
    pub fn with_scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = Some(scenario.into());
        self
    }

    pub async fn run(&self) -> Result<RefreshReport, PhaseError> {
        let candidates = self
            .lifecycle
            .query_by_status(&[DocumentStatus::New, DocumentStatus::Modified])?;
        info!(candidates = candidates.len(), "phase 1: refreshing subgraphs");

        let mut report = RefreshReport::default();
        for record in candidates {
            match self.refresh_document(&record).await {
                Ok((fingerprint, usage)) => {
                    debug!(
                        document = record.id,
                        fingerprint = %fingerprint,
                        tokens = usage.total_tokens(),
                        "document refreshed"
                    );
                    report.refreshed.push(record.id);
                    report.usage += usage;
                }
                Err(e) => {
                    warn!(
                        document = record.id,
                        filename = %record.filename,
                        error = %e,
                        "document refresh failed; continuing"
                    );
                    report.failed.push(DocumentFailure {
                        document: record.id,
                        filename: record.filename.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            refreshed = report.refreshed.len(),
            failed = report.failed.len(),
            prompt_tokens = report.usage.prompt_tokens,
            completion_tokens = report.usage.completion_tokens,
            "phase 1 finished"
        );
        Ok(report)
    }

    /// Read, extract, persist the artifact, then commit the status change.
    async fn refresh_document(&self, record: &DocumentRecord) -> Result<(String, CompletionUsage), DocumentError> {
        let document = record.id.to_string();
        let text = self
            .source
            .read(&record.filepath)
            .map_err(|source| ExtractionError::Read {
                document: document.clone(),
                source,
            })?;

        let request = self
            .lifecycle
            .record_request(&record.filename, REQUEST_GENERATE, self.scenario.as_deref())?;
        let extracted = self
            .extractor
            .extract(&text, &document, &record.filepath)
            .await?;
        for usage in &extracted.usage {
            self.lifecycle.record_usage(request.req_id, usage)?;
        }

        if !self.artifacts.write(&extracted.fingerprint, &extracted.artifact)? {
            debug!(document = record.id, fingerprint = %extracted.fingerprint, "artifact already stored");
        }

        self.lifecycle.mark_persistent(record.id, &extracted.fingerprint)?;
        Ok((extracted.fingerprint, extracted.usage.into_iter().sum()))
    }
}
