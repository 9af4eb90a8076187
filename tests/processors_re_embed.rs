//! RE_EMBED: model migration, the one path that changes vector identity.

mod common;

use common::*;
use gleanforge::job::Job;
use gleanforge::processor::{JobProcessor, ProcessorError};
use gleanforge::processors::ReEmbedProcessor;
use gleanforge::stores::{ChunkStore, DocumentStore};
use gleanforge::types::JobKind;
use serde_json::json;

#[tokio::test]
async fn migration_restamps_every_chunk_and_the_document() {
    let h = harness();
    h.seed_embedded(
        "doc-1",
        "Content embedded under the old model.",
        "text-embedding-3-small",
        vec![vec![1.0, 0.0]],
    )
    .await;

    let report = ReEmbedProcessor
        .process(&Job::re_embed("doc-1", "text-embedding-3-large"), &h.ctx)
        .await
        .unwrap();

    assert_eq!(
        report.summary,
        "re-embedded 1 chunks under text-embedding-3-large"
    );
    assert_eq!(report.follow_on, vec![Job::dedup_check("doc-1")]);

    let document = h.store.fetch_document("doc-1").await.unwrap().unwrap();
    assert_eq!(
        document.embedding_model_id.as_deref(),
        Some("text-embedding-3-large")
    );
    let chunks = h.store.chunks_for_source("doc-1").await.unwrap();
    assert!(chunks.iter().all(|c| c.model_id == "text-embedding-3-large"));

    let calls = h.embeddings.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "text-embedding-3-large");
}

#[tokio::test]
async fn missing_new_model_fails_before_touching_the_store() {
    let h = harness();
    h.seed_embedded("doc-1", "content", "model-a", vec![vec![1.0, 0.0]])
        .await;
    let before = h.store.fetch_document("doc-1").await.unwrap().unwrap();

    // A RE_EMBED assembled without its payload.
    let job = Job::new(JobKind::ReEmbed, Some("doc-1".to_string()));
    let error = ReEmbedProcessor.process(&job, &h.ctx).await.unwrap_err();

    assert!(matches!(
        error,
        ProcessorError::Validation { field: "newModelId" }
    ));
    assert!(!error.is_retryable());

    let after = h.store.fetch_document("doc-1").await.unwrap().unwrap();
    assert_eq!(after.embedding_model_id, before.embedding_model_id);
    assert_eq!(after.metadata, before.metadata);
    assert_eq!(h.embeddings.call_count(), 0);
}

#[tokio::test]
async fn an_empty_new_model_is_rejected_as_invalid() {
    let h = harness();
    let job = Job::new(JobKind::ReEmbed, Some("doc-1".to_string()))
        .with_payload(json!({ "newModelId": "" }));

    let error = ReEmbedProcessor.process(&job, &h.ctx).await.unwrap_err();
    assert!(matches!(
        error,
        ProcessorError::InvalidField { field: "newModelId", .. }
    ));
}

#[tokio::test]
async fn empty_content_migrates_nothing() {
    let h = harness();
    h.seed(
        gleanforge::model::Document::new("Empty", "   ").with_id("doc-1"),
    )
    .await;

    let report = ReEmbedProcessor
        .process(&Job::re_embed("doc-1", "text-embedding-3-large"), &h.ctx)
        .await
        .unwrap();

    assert_eq!(report.summary, "nothing to re-embed");
    assert!(report.follow_on.is_empty());
    // The model identity only changes when new vectors actually land.
    let document = h.store.fetch_document("doc-1").await.unwrap().unwrap();
    assert!(document.embedding_model_id.is_none());
}

#[tokio::test]
async fn a_failed_migration_keeps_the_old_model() {
    let h = harness();
    h.seed_embedded("doc-1", "old vectors", "text-embedding-3-small", vec![vec![1.0, 0.0]])
        .await;
    h.embeddings.fail_times(1);

    let error = ReEmbedProcessor
        .process(&Job::re_embed("doc-1", "text-embedding-3-large"), &h.ctx)
        .await
        .unwrap_err();
    assert!(error.is_retryable());

    // The store still serves the old model's vectors untouched.
    let document = h.store.fetch_document("doc-1").await.unwrap().unwrap();
    assert_eq!(
        document.embedding_model_id.as_deref(),
        Some("text-embedding-3-small")
    );
    let chunks = h.store.chunks_for_source("doc-1").await.unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].model_id, "text-embedding-3-small");
}
