//! EMBED: chunk, vector, replace, and converge on redelivery.

mod common;

use common::*;
use gleanforge::job::Job;
use gleanforge::model::{Document, metadata_keys};
use gleanforge::processor::{JobProcessor, ProcessorError};
use gleanforge::processors::EmbedProcessor;
use gleanforge::runtimes::RuntimeConfig;
use gleanforge::stores::{ChunkStore, DocumentStore};
use gleanforge::budget::BudgetLimits;
use gleanforge::types::JobKind;
use serde_json::Value;

#[tokio::test]
async fn embedding_a_document_stores_chunks_and_queues_dedup() {
    let h = harness();
    let doc = h
        .seed(Document::new("Guide", "First paragraph.\n\nSecond paragraph.").with_id("doc-1"))
        .await;

    let report = EmbedProcessor
        .process(&Job::embed(&doc.id), &h.ctx)
        .await
        .unwrap();

    assert_eq!(report.summary, "embedded 1 chunks");
    assert_eq!(report.follow_on, vec![Job::dedup_check("doc-1")]);
    assert!(report.faults.is_empty());

    let chunks = h.store.chunks_for_source("doc-1").await.unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].model_id, "text-embedding-3-small");

    let stored = h.store.fetch_document("doc-1").await.unwrap().unwrap();
    assert_eq!(
        stored.embedding_model_id.as_deref(),
        Some("text-embedding-3-small")
    );
    assert_eq!(
        stored.metadata[metadata_keys::EMBEDDING]["chunkCount"],
        1
    );
    assert_eq!(stored.metadata[metadata_keys::EMBEDDING]["error"], Value::Null);
}

#[tokio::test]
async fn embed_reuses_the_documents_recorded_model() {
    let h = harness();
    let doc = h
        .seed_embedded("doc-1", "already vectored once", "custom-embedder", vec![vec![1.0, 0.0]])
        .await;

    EmbedProcessor
        .process(&Job::embed(&doc.id), &h.ctx)
        .await
        .unwrap();

    // The recorded model wins over the configured default.
    let calls = h.embeddings.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "custom-embedder");
}

#[tokio::test]
async fn rerunning_embed_replaces_instead_of_accumulating() {
    let h = harness();
    let doc = h
        .seed(Document::new("Guide", "Body worth embedding.").with_id("doc-1"))
        .await;

    let job = Job::embed(&doc.id);
    EmbedProcessor.process(&job, &h.ctx).await.unwrap();
    EmbedProcessor.process(&job, &h.ctx).await.unwrap();

    assert_eq!(h.store.chunks_for_source("doc-1").await.unwrap().len(), 1);
    assert_eq!(h.store.count_chunks().await.unwrap(), 1);
}

#[tokio::test]
async fn missing_document_id_fails_validation() {
    let h = harness();
    let job = Job::new(JobKind::Embed, None);

    let error = EmbedProcessor.process(&job, &h.ctx).await.unwrap_err();
    assert!(matches!(
        error,
        ProcessorError::Validation { field: "documentId" }
    ));
    assert!(!error.is_retryable());
}

#[tokio::test]
async fn a_deleted_document_is_not_retryable() {
    let h = harness();

    let error = EmbedProcessor
        .process(&Job::embed("ghost"), &h.ctx)
        .await
        .unwrap_err();
    assert!(matches!(error, ProcessorError::DocumentNotFound { .. }));
    assert!(!error.is_retryable());
}

#[tokio::test]
async fn whitespace_content_is_a_clean_no_op() {
    let h = harness();
    h.seed(Document::new("Empty", "  \n\t ").with_id("doc-1")).await;

    let report = EmbedProcessor
        .process(&Job::embed("doc-1"), &h.ctx)
        .await
        .unwrap();

    assert_eq!(report.summary, "nothing to embed");
    assert!(report.follow_on.is_empty());
    assert_eq!(h.embeddings.call_count(), 0);
}

#[tokio::test]
async fn provider_outage_marks_the_document_and_propagates() {
    let h = harness();
    h.seed(Document::new("Guide", "Body worth embedding.").with_id("doc-1"))
        .await;
    h.embeddings.fail_times(1);

    let error = EmbedProcessor
        .process(&Job::embed("doc-1"), &h.ctx)
        .await
        .unwrap_err();
    assert!(error.is_retryable());

    let stored = h.store.fetch_document("doc-1").await.unwrap().unwrap();
    let marker = &stored.metadata[metadata_keys::EMBEDDING]["error"];
    assert!(marker["message"].as_str().unwrap().contains("scripted outage"));
    // No half-written chunk rows.
    assert!(h.store.chunks_for_source("doc-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn a_count_mismatch_dead_ends_instead_of_retrying() {
    let h = harness();
    h.seed(Document::new("Guide", "One paragraph only.").with_id("doc-1"))
        .await;
    h.embeddings.push_batch(vec![]);

    let error = EmbedProcessor
        .process(&Job::embed("doc-1"), &h.ctx)
        .await
        .unwrap_err();
    assert!(!error.is_retryable());
    assert!(error.to_string().contains("embedding count mismatch"));
}

#[tokio::test]
async fn budget_denial_is_retryable_and_precedes_the_call() {
    let h = harness_with(
        RuntimeConfig::default(),
        BudgetLimits::unlimited().with_max_tokens(2),
    );
    h.seed(Document::new("Guide", "A body considerably longer than two tokens.").with_id("doc-1"))
        .await;

    let error = EmbedProcessor
        .process(&Job::embed("doc-1"), &h.ctx)
        .await
        .unwrap_err();

    assert!(matches!(error, ProcessorError::Budget(_)));
    assert!(error.is_retryable());
    assert_eq!(h.embeddings.call_count(), 0);
    assert!(h.store.chunks_for_source("doc-1").await.unwrap().is_empty());
}
