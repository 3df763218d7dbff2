//! Publish controller: Phase 1, Phase 2, then the generation swap

use super::retry::{retry, RetryError, RetryPolicy};
use super::swap::{GenerationMarker, GenerationSwap, SwapError};
use crate::pipeline::{AggregationReport, PartitionAggregator, PhaseError, RefreshReport, SubgraphRefresh};
use thiserror::Error;
use tracing::{error, info};

/// Run-level failure seen by the retry loop
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Phase 1 left {failed} document(s) unrefreshed")]
    IncompleteBatch { failed: usize },

    #[error("Phase error: {0}")]
    Phase(#[from] PhaseError),

    #[error("Swap error: {0}")]
    Swap(#[from] SwapError),
}

impl PublishError {
    fn is_retryable(&self) -> bool {
        !matches!(self, PublishError::Swap(SwapError::Unconfirmed(_)))
    }
}

/// The entire external result contract of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failed,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Success => "SUCCESS",
            RunOutcome::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable states of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Phase1Running,
    Phase2Running,
    Publishing,
    Success,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "Idle",
            RunState::Phase1Running => "Phase1Running",
            RunState::Phase2Running => "Phase2Running",
            RunState::Publishing => "Publishing",
            RunState::Success => "Success",
            RunState::Failed => "Failed",
        }
    }
}

/// Everything a run produced, for callers that want more than the outcome
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// States visited, starting at `Idle`
    pub states: Vec<RunState>,
    pub refresh: Option<RefreshReport>,
    pub aggregation: Option<AggregationReport>,
    pub published: Option<GenerationMarker>,
}

impl RunReport {
    fn new() -> Self {
        Self {
            outcome: RunOutcome::Failed,
            states: vec![RunState::Idle],
            refresh: None,
            aggregation: None,
            published: None,
        }
    }

    fn transition(&mut self, next: RunState) {
        let from = self.states.last().copied().unwrap_or(RunState::Idle);
        info!(from = from.as_str(), to = next.as_str(), "run state");
        self.states.push(next);
    }

    fn fail(mut self, phase: &str, error: RetryError<PublishError>) -> Self {
        error!(phase, error = %error, "run failed");
        self.transition(RunState::Failed);
        self.outcome = RunOutcome::Failed;
        self
    }
}

/// Orchestrates one publish run.
///
/// At most one run may be in flight against a given lifecycle store and
/// data directory.
pub struct PublishController {
    refresh: SubgraphRefresh,
    aggregator: PartitionAggregator,
    swap: GenerationSwap,
    policy: RetryPolicy,
}

impl PublishController {
    pub fn new(
        refresh: SubgraphRefresh,
        aggregator: PartitionAggregator,
        swap: GenerationSwap,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            refresh,
            aggregator,
            swap,
            policy,
        }
    }

    /// Run both phases and publish; returns `SUCCESS` or `FAILED`
    pub async fn run(&self) -> RunOutcome {
        self.execute().await.outcome
    }

    pub async fn execute(&self) -> RunReport {
        let mut report = RunReport::new();

        if let Err(e) = self.swap.recover() {
            return report.fail("recover", RetryError::Fatal(PublishError::Swap(e)));
        }

        report.transition(RunState::Phase1Running);
        let refreshed = retry(&self.policy, PublishError::is_retryable, |attempt| async move {
            info!(attempt, "phase 1 attempt");
            let batch = self.refresh.run().await?;
            if batch.all_succeeded() {
                Ok::<_, PublishError>(batch)
            } else {
                Err(PublishError::IncompleteBatch {
                    failed: batch.failed.len(),
                })
            }
        })
        .await;
        match refreshed {
            Ok(batch) => report.refresh = Some(batch),
            Err(e) => return report.fail("phase1", e),
        }

        report.transition(RunState::Phase2Running);
        let aggregated = retry(&self.policy, PublishError::is_retryable, |attempt| async move {
            info!(attempt, "phase 2 attempt");
            let staging = self.swap.staging_path();
            let aggregation = self.aggregator.run(staging)?;
            self.swap.write_marker(&GenerationMarker::new(
                aggregation.merged_partitions(),
                aggregation.failed_partitions(),
            ))?;
            Ok::<_, PublishError>(aggregation)
        })
        .await;
        match aggregated {
            Ok(aggregation) => report.aggregation = Some(aggregation),
            Err(e) => return report.fail("phase2", e),
        }

        report.transition(RunState::Publishing);
        let published = retry(&self.policy, PublishError::is_retryable, |_| async {
            Ok::<_, PublishError>(self.swap.publish()?)
        })
        .await;
        match published {
            Ok(marker) => report.published = Some(marker),
            Err(e) => return report.fail("publish", e),
        }

        report.transition(RunState::Success);
        report.outcome = RunOutcome::Success;
        report
    }
}
