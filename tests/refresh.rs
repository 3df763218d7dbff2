//! Phase 1 scenarios: continue-on-error, idempotence, re-extraction

mod common;

use common::{ScriptedExtractor, Workspace};
use jigsaw::extract::{clean_text, fingerprint};
use jigsaw::{
    CompletionUsage, DocumentStatus, LifecycleStore, MockCompletionClient, PromptExtractor,
    REQUEST_GENERATE,
};
use std::sync::Arc;

#[tokio::test]
async fn failing_document_does_not_block_the_batch() {
    let ws = Workspace::new();
    let a = ws.add_document("a", "alpha text", Some("P1"));
    let b = ws.add_document("b", "beta text", Some("P1"));
    let c = ws.add_document("c", "gamma text", Some("P1"));

    let extractor = Arc::new(ScriptedExtractor::new().failing("beta text"));
    let report = ws.refresh(extractor.clone()).run().await.unwrap();

    assert!(!report.all_succeeded());
    assert_eq!(report.refreshed, vec![a, c]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].document, b);
    assert_eq!(report.failed[0].filename, "b");

    assert_eq!(ws.document(a).status, DocumentStatus::Persistent);
    assert_eq!(ws.document(c).status, DocumentStatus::Persistent);
    let failed = ws.document(b);
    assert_eq!(failed.status, DocumentStatus::New);
    assert!(failed.fingerprint.is_none());

    assert_eq!(extractor.calls(), vec!["alpha text", "beta text", "gamma text"]);
}

#[tokio::test]
async fn persistent_documents_get_fingerprint_and_artifact() {
    let ws = Workspace::new();
    let a = ws.add_document("a", "  alpha text\n", Some("P1"));

    let extractor = Arc::new(ScriptedExtractor::new().with_entities("alpha text", &[("X", "T", "d")]));
    let report = ws.refresh(extractor).run().await.unwrap();
    assert!(report.all_succeeded());

    let record = ws.document(a);
    let expected = fingerprint(&clean_text("  alpha text\n"));
    assert_eq!(record.fingerprint.as_deref(), Some(expected.as_str()));

    let artifact = ws.artifacts().read(&expected).unwrap();
    assert_eq!(artifact.source_id, format!("doc-{}", expected));
    assert_eq!(artifact.file_path, "a.txt");
    assert_eq!(artifact.entities[0].name, "X");
    assert_eq!(artifact.entities[0].source_id, artifact.source_id);
}

#[tokio::test]
async fn rerun_over_persistent_documents_is_a_no_op() {
    let ws = Workspace::new();
    ws.add_document("a", "alpha text", Some("P1"));
    ws.add_document("b", "beta text", Some("P1"));

    let extractor = Arc::new(ScriptedExtractor::new());
    let first = ws.refresh(extractor.clone()).run().await.unwrap();
    assert_eq!(first.refreshed.len(), 2);
    let artifacts = ws.artifact_count();
    let calls = extractor.call_count();

    let second = ws.refresh(extractor.clone()).run().await.unwrap();
    assert!(second.all_succeeded());
    assert!(second.refreshed.is_empty());
    assert_eq!(extractor.call_count(), calls);
    assert_eq!(ws.artifact_count(), artifacts);
}

#[tokio::test]
async fn modified_document_gets_a_new_artifact() {
    let ws = Workspace::new();
    let a = ws.add_document("a", "first revision", Some("P1"));
    let extractor = Arc::new(ScriptedExtractor::new());

    ws.refresh(extractor.clone()).run().await.unwrap();
    let old = ws.document(a).fingerprint.unwrap();

    std::fs::write(ws.documents_root.join("a.txt"), "second revision").unwrap();
    ws.lifecycle.mark_modified(a).unwrap();
    assert!(ws.document(a).fingerprint.is_none());

    let report = ws.refresh(extractor).run().await.unwrap();
    assert_eq!(report.refreshed, vec![a]);

    let new = ws.document(a).fingerprint.unwrap();
    assert_ne!(old, new);
    assert!(ws.artifacts().exists(&old));
    assert!(ws.artifacts().exists(&new));
}

#[tokio::test]
async fn unreadable_source_is_a_document_failure() {
    let ws = Workspace::new();
    let a = ws.add_document("a", "alpha", Some("P1"));
    std::fs::remove_file(ws.documents_root.join("a.txt")).unwrap();

    let report = ws.refresh(Arc::new(ScriptedExtractor::new())).run().await.unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].document, a);
    assert_eq!(ws.document(a).status, DocumentStatus::New);
}

#[tokio::test]
async fn deleted_documents_are_never_extracted() {
    let ws = Workspace::new();
    let a = ws.add_document("a", "alpha", Some("P1"));
    ws.lifecycle.mark_deleted(a).unwrap();

    let extractor = Arc::new(ScriptedExtractor::new());
    let report = ws.refresh(extractor.clone()).run().await.unwrap();
    assert!(report.refreshed.is_empty());
    assert_eq!(extractor.call_count(), 0);
}

#[tokio::test]
async fn each_extraction_records_a_request_with_its_usage() {
    let ws = Workspace::new();
    let a = ws.add_document("a", "alpha text", Some("P1"));
    ws.add_document("b", "beta text", Some("P1"));

    let extractor = Arc::new(
        ScriptedExtractor::new()
            .with_usage("alpha text", &[CompletionUsage::new(100, 20), CompletionUsage::new(40, 10)])
            .with_usage("beta text", &[CompletionUsage::new(7, 3)]),
    );
    let report = ws
        .refresh(extractor)
        .with_scenario("nightly")
        .run()
        .await
        .unwrap();
    assert_eq!(report.usage, CompletionUsage::new(147, 33));
    assert_eq!(ws.document(a).status, DocumentStatus::Persistent);

    let requests = ws.lifecycle.requests().unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].content, "a");
    assert_eq!(requests[0].req_type, REQUEST_GENERATE);
    assert_eq!(requests[0].scenario.as_deref(), Some("nightly"));
    assert_ne!(requests[0].req_id, requests[1].req_id);

    let usage = ws.lifecycle.usage_for(requests[0].req_id).unwrap();
    let recorded: Vec<_> = usage.iter().map(|u| u.usage).collect();
    assert_eq!(recorded, vec![CompletionUsage::new(100, 20), CompletionUsage::new(40, 10)]);
    assert_eq!(ws.lifecycle.usage_for(requests[1].req_id).unwrap().len(), 1);
}

#[tokio::test]
async fn failed_extraction_still_leaves_its_request() {
    let ws = Workspace::new();
    ws.add_document("bad", "bad text", Some("P1"));

    let report = ws
        .refresh(Arc::new(ScriptedExtractor::new().failing("bad text")))
        .run()
        .await
        .unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.usage, CompletionUsage::default());

    let requests = ws.lifecycle.requests().unwrap();
    assert_eq!(requests.len(), 1);
    assert!(ws.lifecycle.usage_for(requests[0].req_id).unwrap().is_empty());
}

#[tokio::test]
async fn prompt_extraction_usage_reaches_the_ledger() {
    let ws = Workspace::new();
    ws.add_document("a", "word word word word word", Some("P1"));

    let client = Arc::new(
        MockCompletionClient::new()
            .with_fallback(r#"{"entities": [{"entity_name": "X"}]}"#)
            .with_usage(CompletionUsage::new(30, 5)),
    );
    let extractor = Arc::new(PromptExtractor::new(client).with_chunking(3, 0));
    let report = ws.refresh(extractor).run().await.unwrap();
    assert!(report.all_succeeded());
    assert_eq!(report.usage, CompletionUsage::new(60, 10));

    let request = &ws.lifecycle.requests().unwrap()[0];
    assert_eq!(ws.lifecycle.usage_for(request.req_id).unwrap().len(), 2);
}
