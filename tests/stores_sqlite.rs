//! SQLite backend coverage: row fidelity, the dedup candidate join, and the
//! queue state machine.

#![cfg(feature = "sqlite")]

use std::time::Duration;

use chrono::{TimeZone, Utc};
use gleanforge::job::Job;
use gleanforge::model::{ChunkRecord, Document};
use gleanforge::stores::{ChunkStore, DocumentStore, JobQueue, SqliteStore, StoreError};
use gleanforge::types::JobKind;
use serde_json::json;
use tempfile::TempDir;

async fn store() -> (SqliteStore, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("glean.db")).await.unwrap();
    (store, dir)
}

/// Whole-second timestamps survive the TEXT column round trip exactly, so
/// fetched rows compare equal to what was inserted.
fn document(id: &str, content: &str) -> Document {
    let mut doc = Document::new(format!("Doc {id}"), content).with_id(id);
    doc.ingested_at = Utc.with_ymd_and_hms(2026, 1, 15, 8, 30, 0).unwrap();
    doc.updated_at = doc.ingested_at;
    doc
}

#[tokio::test]
async fn a_document_row_survives_with_every_field_intact() {
    let (store, _dir) = store().await;
    let mut doc = document("doc-1", "Borrow checking at a distance.")
        .with_source_uri("https://example.com/post")
        .with_raw_content(b"<p>Borrow checking at a distance.</p>".to_vec())
        .with_metadata(json!({"sourceType": "web", "owner": "docs-team"}));
    doc.valid_until = Some(Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap());
    doc.mark_embedded(
        "text-embedding-3-small",
        Utc.with_ymd_and_hms(2026, 1, 15, 8, 31, 0).unwrap(),
    );
    doc.updated_at = doc.ingested_at;

    store.insert_document(doc.clone()).await.unwrap();

    let fetched = store.fetch_document("doc-1").await.unwrap().unwrap();
    assert_eq!(fetched, doc);

    let by_hash = store
        .find_by_content_hash(&doc.content_hash)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_hash.id, "doc-1");
}

#[tokio::test]
async fn a_second_row_with_the_same_hash_is_rejected() {
    let (store, _dir) = store().await;
    store
        .insert_document(document("doc-1", "identical words"))
        .await
        .unwrap();

    let err = store
        .insert_document(document("doc-2", "identical words"))
        .await
        .unwrap_err();
    match err {
        StoreError::Duplicate { content_hash } => {
            assert_eq!(
                content_hash,
                document("doc-1", "identical words").content_hash
            );
        }
        other => panic!("expected Duplicate, got {other:?}"),
    }
    assert_eq!(store.count_documents().await.unwrap(), 1);
}

#[tokio::test]
async fn missing_rows_read_as_none_and_patch_as_not_found() {
    let (store, _dir) = store().await;
    assert!(store.fetch_document("ghost").await.unwrap().is_none());

    let err = store
        .update_metadata("ghost", json!({"k": 1}))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}

#[tokio::test]
async fn metadata_patches_merge_into_nested_slices() {
    let (store, _dir) = store().await;
    let doc = document("doc-1", "merge target").with_metadata(json!({
        "owner": "docs-team",
        "enrichment": {"language": "en"},
    }));
    store.insert_document(doc).await.unwrap();

    let updated = store
        .update_metadata("doc-1", json!({"enrichment": {"entities": ["Tokio"]}}))
        .await
        .unwrap();

    // Siblings survive at both levels of the merge.
    assert_eq!(updated.metadata["owner"], "docs-team");
    assert_eq!(updated.metadata["enrichment"]["language"], "en");
    assert_eq!(updated.metadata["enrichment"]["entities"][0], "Tokio");

    let fetched = store.fetch_document("doc-1").await.unwrap().unwrap();
    assert_eq!(fetched.metadata, updated.metadata);
}

#[tokio::test]
async fn replace_chunks_swaps_the_whole_set() {
    let (store, _dir) = store().await;
    store
        .insert_document(document("doc-1", "chunked content"))
        .await
        .unwrap();

    let first: Vec<_> = (0..3)
        .map(|i| {
            ChunkRecord::new(
                "doc-1",
                i,
                &format!("piece {i}"),
                vec![i as f32, 1.0],
                "text-embedding-3-small",
            )
        })
        .collect();
    assert_eq!(store.replace_chunks("doc-1", first).await.unwrap(), 3);

    let second = vec![
        ChunkRecord::new("doc-1", 0, "new piece 0", vec![0.5, 0.5], "text-embedding-3-large"),
        ChunkRecord::new("doc-1", 1, "new piece 1", vec![0.6, 0.4], "text-embedding-3-large"),
    ];
    assert_eq!(store.replace_chunks("doc-1", second).await.unwrap(), 2);

    let chunks = store.chunks_for_source("doc-1").await.unwrap();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].chunk_index, 0);
    assert_eq!(chunks[1].chunk_index, 1);
    assert!(chunks.iter().all(|c| c.model_id == "text-embedding-3-large"));
    assert_eq!(store.count_chunks().await.unwrap(), 2);

    let primary = store.primary_chunk("doc-1").await.unwrap().unwrap();
    assert_eq!(primary.chunk_index, 0);

    assert_eq!(store.delete_chunks("doc-1").await.unwrap(), 2);
    assert!(store.chunks_for_source("doc-1").await.unwrap().is_empty());
}

async fn seed_embedded(store: &SqliteStore, id: &str, doc_model: &str, chunk_model: &str) {
    let mut doc = document(id, &format!("content for {id}"));
    doc.mark_embedded(doc_model, Utc::now());
    store.insert_document(doc).await.unwrap();
    let chunks = vec![
        ChunkRecord::new(id, 0, "head", vec![1.0, 0.0], chunk_model),
        ChunkRecord::new(id, 1, "tail", vec![0.0, 1.0], chunk_model),
    ];
    store.replace_chunks(id, chunks).await.unwrap();
}

#[tokio::test]
async fn dedup_candidates_require_matching_models_on_both_tables() {
    const MODEL: &str = "text-embedding-3-small";
    let (store, _dir) = store().await;

    seed_embedded(&store, "doc-subject", MODEL, MODEL).await;
    seed_embedded(&store, "doc-peer", MODEL, MODEL).await;
    // Document already restamped to the new model, chunks not yet migrated.
    seed_embedded(&store, "doc-mid-migration", "text-embedding-3-large", MODEL).await;
    // Chunks ahead of the document stamp.
    seed_embedded(&store, "doc-chunks-ahead", MODEL, "text-embedding-3-large").await;

    let candidates = store.dedup_candidates("doc-subject", MODEL).await.unwrap();

    // Only the settled peer qualifies, and only through its primary chunk.
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].source_id, "doc-peer");
    assert_eq!(candidates[0].chunk_index, 0);
}

#[tokio::test]
async fn jobs_are_claimed_oldest_first_and_completed_away() {
    let (store, _dir) = store().await;
    store.enqueue(Job::enrich("doc-1")).await.unwrap();
    store.enqueue(Job::dedup_check("doc-1")).await.unwrap();

    let depth = store.depth().await.unwrap();
    assert_eq!(depth.ready, 2);
    assert!(!depth.is_idle());

    let first = store.claim().await.unwrap().unwrap();
    assert_eq!(first.kind(), JobKind::Enrich);
    assert_eq!(first.attempt, 0);

    let depth = store.depth().await.unwrap();
    assert_eq!((depth.ready, depth.running), (1, 1));

    store.complete(&first.id).await.unwrap();
    let second = store.claim().await.unwrap().unwrap();
    assert_eq!(second.kind(), JobKind::DedupCheck);
    store.complete(&second.id).await.unwrap();

    assert!(store.depth().await.unwrap().is_idle());
    assert!(store.claim().await.unwrap().is_none());

    let err = store.complete("no-such-job").await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}

#[tokio::test]
async fn a_delayed_retry_is_counted_but_not_claimable_early() {
    let (store, _dir) = store().await;
    store.enqueue(Job::embed("doc-1")).await.unwrap();
    let claimed = store.claim().await.unwrap().unwrap();

    store
        .retry(&claimed.id, Duration::from_secs(3600), "transient outage")
        .await
        .unwrap();

    assert!(store.claim().await.unwrap().is_none());
    let depth = store.depth().await.unwrap();
    assert_eq!(depth.ready, 1);
    assert_eq!(depth.running, 0);
}

#[tokio::test]
async fn an_immediate_retry_redelivers_with_the_attempt_bumped() {
    let (store, _dir) = store().await;
    store.enqueue(Job::embed("doc-1")).await.unwrap();
    let claimed = store.claim().await.unwrap().unwrap();

    store
        .retry(&claimed.id, Duration::ZERO, "transient outage")
        .await
        .unwrap();

    let redelivered = store.claim().await.unwrap().unwrap();
    assert_eq!(redelivered.id, claimed.id);
    assert_eq!(redelivered.attempt, 1);
}

#[tokio::test]
async fn dead_letters_keep_the_job_and_the_reason() {
    let (store, _dir) = store().await;
    store
        .enqueue(Job::re_embed("doc-1", "text-embedding-3-large"))
        .await
        .unwrap();
    let claimed = store.claim().await.unwrap().unwrap();
    store
        .dead_letter(&claimed.id, "provider request failed (401): bad key")
        .await
        .unwrap();

    assert!(store.claim().await.unwrap().is_none());
    let depth = store.depth().await.unwrap();
    assert_eq!(depth.dead, 1);

    let dead = store.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].job.kind(), JobKind::ReEmbed);
    assert_eq!(
        dead[0].job.job.payload_str("newModelId"),
        Some("text-embedding-3-large")
    );
    assert!(dead[0].reason.contains("bad key"));
}

#[tokio::test]
async fn reopening_the_same_file_sees_earlier_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("glean.db");

    let store = SqliteStore::open(&path).await.unwrap();
    store
        .insert_document(document("doc-1", "durable content"))
        .await
        .unwrap();
    store.enqueue(Job::freshness_sweep()).await.unwrap();
    store.pool().close().await;

    let reopened = SqliteStore::open(&path).await.unwrap();
    assert!(reopened.fetch_document("doc-1").await.unwrap().is_some());
    assert_eq!(reopened.depth().await.unwrap().ready, 1);
}
