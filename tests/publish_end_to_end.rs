//! Full runs through the publish controller

mod common;

use common::{ScriptedExtractor, Workspace};
use jigsaw::publish::GENERATION_MARKER;
use jigsaw::{DocumentStatus, GraphStore, RunOutcome, RunState, GRAPH_FIELD_SEP};
use std::sync::Arc;

#[tokio::test]
async fn end_to_end_publishes_merged_partition() {
    let ws = Workspace::new();
    ws.add_document("docA", "document A", Some("P1"));
    ws.add_document("docB", "document B", Some("P1"));
    let extractor = Arc::new(
        ScriptedExtractor::new()
            .with_entities("document A", &[("X", "typeT1", "a")])
            .with_entities("document B", &[("X", "typeT2", "b")]),
    );

    let report = ws.controller(extractor).execute().await;

    assert_eq!(report.outcome, RunOutcome::Success);
    assert_eq!(
        report.states,
        vec![
            RunState::Idle,
            RunState::Phase1Running,
            RunState::Phase2Running,
            RunState::Publishing,
            RunState::Success
        ]
    );
    assert_eq!(report.published.unwrap().merged_partitions, vec!["P1"]);

    assert!(!ws.layout.staging_root.exists());
    assert!(!ws.layout.retired_root.exists());
    assert!(ws.layout.published_root.join(GENERATION_MARKER).is_file());

    let graph = ws.graph(&ws.layout.published_root, "P1");
    let x = graph.load_node("X").unwrap().unwrap();
    assert_eq!(x.entity_type, format!("typeT2{}typeT1", GRAPH_FIELD_SEP));
}

#[tokio::test]
async fn phase_one_exhaustion_never_runs_phase_two() {
    let ws = Workspace::new();
    let good = ws.add_document("good", "good text", Some("P1"));
    let bad = ws.add_document("bad", "bad text", Some("P1"));
    let extractor = Arc::new(ScriptedExtractor::new().failing("bad text"));

    let report = ws.controller(extractor.clone()).execute().await;

    assert_eq!(report.outcome, RunOutcome::Failed);
    assert_eq!(report.outcome.as_str(), "FAILED");
    assert_eq!(
        report.states,
        vec![RunState::Idle, RunState::Phase1Running, RunState::Failed]
    );
    assert!(report.aggregation.is_none());
    assert_eq!(extractor.calls_for("bad text"), 3);
    assert_eq!(extractor.calls_for("good text"), 1);

    assert!(!ws.layout.staging_root.exists());
    assert!(!ws.layout.published_root.exists());
    assert_eq!(ws.document(good).status, DocumentStatus::Persistent);
    assert_eq!(ws.document(bad).status, DocumentStatus::New);
}

#[tokio::test]
async fn partition_failure_does_not_fail_the_run() {
    let ws = Workspace::new();
    let a = ws.add_document("a", "text a", Some("P1"));
    ws.add_document("b", "text b", Some("P2"));
    let extractor = Arc::new(ScriptedExtractor::new());

    assert_eq!(ws.controller(extractor.clone()).run().await, RunOutcome::Success);

    let fingerprint = ws.document(a).fingerprint.unwrap();
    std::fs::remove_file(ws.artifacts().path_for(&fingerprint)).unwrap();

    let report = ws.controller(extractor).execute().await;
    assert_eq!(report.outcome, RunOutcome::Success);
    let published = report.published.unwrap();
    assert_eq!(published.merged_partitions, vec!["P2"]);
    assert_eq!(published.failed_partitions, vec!["P1"]);

    // P1 keeps serving the previous generation's graph
    assert!(ws.layout.published_root.join("P1").join("graph.db").is_file());
}

#[tokio::test]
async fn rerun_republishes_without_reextracting() {
    let ws = Workspace::new();
    ws.add_document("a", "text a", Some("P1"));
    let extractor = Arc::new(ScriptedExtractor::new().with_entities("text a", &[("X", "T", "d")]));

    assert_eq!(ws.controller(extractor.clone()).run().await, RunOutcome::Success);
    assert_eq!(ws.controller(extractor.clone()).run().await, RunOutcome::Success);
    assert_eq!(extractor.call_count(), 1);

    let graph = ws.graph(&ws.layout.published_root, "P1");
    assert_eq!(graph.load_node("X").unwrap().unwrap().description, "d");
}

#[tokio::test]
async fn interrupted_swap_is_recovered_before_publishing() {
    let ws = Workspace::new();
    ws.add_document("a", "text a", Some("P1"));
    let extractor = Arc::new(ScriptedExtractor::new().with_entities("text a", &[("X", "T", "d")]));
    assert_eq!(ws.controller(extractor.clone()).run().await, RunOutcome::Success);

    // Crash after `published -> retired`, before the new generation moved in
    std::fs::rename(&ws.layout.published_root, &ws.layout.retired_root).unwrap();

    assert_eq!(ws.controller(extractor).run().await, RunOutcome::Success);
    assert!(!ws.layout.retired_root.exists());
    let graph = ws.graph(&ws.layout.published_root, "P1");
    assert!(graph.load_node("X").unwrap().is_some());
}

#[tokio::test]
async fn bookkeeping_named_partition_fails_alone() {
    let ws = Workspace::new();
    ws.add_document("good", "good text", Some("P1"));
    ws.add_document("clash", "clash text", Some(GENERATION_MARKER));
    let extractor = Arc::new(
        ScriptedExtractor::new()
            .with_entities("good text", &[("X", "T", "d")])
            .with_entities("clash text", &[("Y", "T", "d")]),
    );

    let report = ws.controller(extractor).execute().await;

    assert_eq!(report.outcome, RunOutcome::Success);
    let published = report.published.unwrap();
    assert_eq!(published.merged_partitions, vec!["P1"]);
    assert_eq!(published.failed_partitions, vec![GENERATION_MARKER]);
    assert!(ws.layout.published_root.join(GENERATION_MARKER).is_file());
    assert!(ws.graph(&ws.layout.published_root, "P1").load_node("X").unwrap().is_some());
}
