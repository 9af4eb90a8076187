//! The shared persistence path: dedup by content hash, inline embedding,
//! and follow-on job scheduling.

mod common;

use common::*;
use gleanforge::ingest::PersistInput;
use gleanforge::model::{content_hash_hex, metadata_keys};
use gleanforge::stores::{ChunkStore, DocumentStore, JobQueue};
use gleanforge::types::JobKind;
use serde_json::Value;

const CONTENT: &str = "Rust gives you control without a garbage collector.";

#[tokio::test]
async fn a_new_persist_creates_row_chunks_and_metadata() {
    let h = harness();

    let receipt = h
        .persistence
        .persist_document(PersistInput::text("Guide", CONTENT))
        .await
        .unwrap();

    assert!(receipt.persisted);
    assert!(!receipt.duplicate);
    assert!(!receipt.partial_failure);
    assert_eq!(receipt.chunks_created, 1);
    assert_eq!(receipt.embeddings_generated, 1);
    assert_eq!(
        receipt.embedding_model_id.as_deref(),
        Some("text-embedding-3-small")
    );
    assert_eq!(receipt.content_hash, content_hash_hex(CONTENT.as_bytes()));

    let document = h
        .store
        .fetch_document(&receipt.document_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        document.embedding_model_id.as_deref(),
        Some("text-embedding-3-small")
    );
    assert_eq!(
        document.metadata[metadata_keys::EMBEDDING]["model"],
        "text-embedding-3-small"
    );
    assert_eq!(
        document.metadata[metadata_keys::EMBEDDING]["error"],
        Value::Null
    );

    let chunks = h
        .store
        .chunks_for_source(&receipt.document_id)
        .await
        .unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].chunk_index, 0);
    assert_eq!(chunks[0].model_id, "text-embedding-3-small");
}

#[tokio::test]
async fn identical_content_reports_the_surviving_row() {
    let h = harness();

    let first = h
        .persistence
        .persist_document(PersistInput::text("Original", CONTENT))
        .await
        .unwrap();
    let second = h
        .persistence
        .persist_document(PersistInput::text("Repost under a new title", CONTENT))
        .await
        .unwrap();

    assert!(second.duplicate);
    assert!(!second.persisted);
    assert_eq!(second.document_id, first.document_id);
    assert_eq!(second.chunks_created, first.chunks_created);
    assert_eq!(h.store.count_documents().await.unwrap(), 1);
}

#[tokio::test]
async fn raw_bytes_do_not_defeat_content_dedup() {
    let h = harness();

    h.persistence
        .persist_document(
            PersistInput::text("Scraped Monday", CONTENT)
                .with_raw_content(b"<p id=\"mon\">...</p>".to_vec()),
        )
        .await
        .unwrap();
    let second = h
        .persistence
        .persist_document(
            PersistInput::text("Scraped Tuesday", CONTENT)
                .with_raw_content(b"<p id=\"tue\">...</p>".to_vec()),
        )
        .await
        .unwrap();

    assert!(second.duplicate);
    assert_eq!(h.store.count_documents().await.unwrap(), 1);
}

#[tokio::test]
async fn inline_embedding_failure_downgrades_to_partial() {
    let h = harness();
    h.embeddings.fail_times(1);

    let receipt = h
        .persistence
        .persist_document(PersistInput::text("Guide", CONTENT))
        .await
        .unwrap();

    assert!(receipt.persisted);
    assert!(receipt.partial_failure);
    assert_eq!(receipt.chunks_created, 0);
    assert!(receipt.embedding_model_id.is_none());

    let document = h
        .store
        .fetch_document(&receipt.document_id)
        .await
        .unwrap()
        .unwrap();
    assert!(document.embedding_model_id.is_none());
    let marker = &document.metadata[metadata_keys::EMBEDDING]["error"];
    assert!(
        marker["message"]
            .as_str()
            .unwrap()
            .contains("scripted outage")
    );
}

#[tokio::test]
async fn a_clean_persist_queues_enrich_then_dedup() {
    let h = harness();

    let receipt = h
        .persistence
        .persist_document(PersistInput::text("Guide", CONTENT))
        .await
        .unwrap();
    let job_ids = h
        .persistence
        .enqueue_post_persist_jobs(&receipt)
        .await
        .unwrap();
    assert_eq!(job_ids.len(), 2);

    let first = h.store.claim().await.unwrap().unwrap();
    let second = h.store.claim().await.unwrap().unwrap();
    assert_eq!(first.job.kind, JobKind::Enrich);
    assert_eq!(second.job.kind, JobKind::DedupCheck);
    assert_eq!(first.job.document_id.as_deref(), Some(receipt.document_id.as_str()));
    assert_eq!(second.job.document_id.as_deref(), Some(receipt.document_id.as_str()));
}

#[tokio::test]
async fn a_partial_persist_queues_an_embed_retry_instead_of_dedup() {
    let h = harness();
    h.embeddings.fail_times(1);

    let receipt = h
        .persistence
        .persist_document(PersistInput::text("Guide", CONTENT))
        .await
        .unwrap();
    let job_ids = h
        .persistence
        .enqueue_post_persist_jobs(&receipt)
        .await
        .unwrap();
    assert_eq!(job_ids.len(), 2);

    let kinds: Vec<JobKind> = vec![
        h.store.claim().await.unwrap().unwrap().job.kind,
        h.store.claim().await.unwrap().unwrap().job.kind,
    ];
    assert_eq!(kinds, vec![JobKind::Enrich, JobKind::Embed]);
}

#[tokio::test]
async fn duplicates_enqueue_nothing() {
    let h = harness();

    let first = h
        .persistence
        .persist_document(PersistInput::text("Original", CONTENT))
        .await
        .unwrap();
    h.persistence
        .enqueue_post_persist_jobs(&first)
        .await
        .unwrap();
    let before = h.store.depth().await.unwrap();

    let dup = h
        .persistence
        .persist_document(PersistInput::text("Repost", CONTENT))
        .await
        .unwrap();
    let job_ids = h.persistence.enqueue_post_persist_jobs(&dup).await.unwrap();

    assert!(job_ids.is_empty());
    assert_eq!(h.store.depth().await.unwrap(), before);
}

#[tokio::test]
async fn whitespace_content_skips_embedding_but_still_enriches() {
    let h = harness();

    let receipt = h
        .persistence
        .persist_document(PersistInput::text("Placeholder", "   \n  "))
        .await
        .unwrap();

    assert!(receipt.persisted);
    assert!(!receipt.partial_failure);
    assert_eq!(receipt.chunks_created, 0);
    assert_eq!(h.embeddings.call_count(), 0);

    let job_ids = h
        .persistence
        .enqueue_post_persist_jobs(&receipt)
        .await
        .unwrap();
    assert_eq!(job_ids.len(), 1);
    let queued = h.store.claim().await.unwrap().unwrap();
    assert_eq!(queued.job.kind, JobKind::Enrich);
}

#[tokio::test]
async fn caller_metadata_survives_the_persist() {
    let h = harness();

    let receipt = h
        .persistence
        .persist_document(
            PersistInput::text("Guide", CONTENT)
                .with_metadata(serde_json::json!({"sourceType": "upload", "owner": "docs-team"})),
        )
        .await
        .unwrap();

    let document = h
        .store
        .fetch_document(&receipt.document_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(document.metadata["sourceType"], "upload");
    assert_eq!(document.metadata["owner"], "docs-team");
    // The embed pass wrote its own slice next to the caller's keys.
    assert_eq!(
        document.metadata[metadata_keys::EMBEDDING]["chunkCount"],
        1
    );
}
