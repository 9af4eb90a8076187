//! Core domain records shared by the stores and processors.
//!
//! A [`Document`] is the unit of ingestion: canonical text (what gets
//! chunked, embedded, and enriched) plus the original bytes as provenance,
//! a content hash for dedup, a metadata object that processors extend in
//! namespaced slices, and the embedding state the pipeline maintains. A
//! [`ChunkRecord`] is one embedded segment of a document; chunks carry the
//! vector and a hash of their text rather than the text itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::chunking::ChunkStrategy;

/// `source_type` value for chunks produced from documents. Kept as a column
/// so future source kinds (conversations, code files) can share the chunk
/// table.
pub const SOURCE_TYPE_DOCUMENT: &str = "document";

/// Hex-encoded SHA-256 of `bytes`; the pipeline's identity for content.
pub fn content_hash_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Namespaces under `Document::metadata` owned by individual processors.
/// Each processor writes only its own slice and leaves the others alone;
/// patches are applied with a deep merge, arrays replacing rather than
/// concatenating across runs.
pub mod metadata_keys {
    /// Entities, topics, summary, and language from the enrichment pass,
    /// or an error marker when extraction failed.
    pub const ENRICHMENT: &str = "enrichment";
    /// Duplicate flag and near-match list from the dedup pass.
    pub const DEDUP: &str = "dedup";
    /// Decay multiplier from the freshness pass.
    pub const FRESHNESS: &str = "freshness";
    /// Error marker left by a partially failed embed pass.
    pub const EMBEDDING: &str = "embedding";
}

/// An ingested document and its pipeline state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    /// Canonical text; the input to chunking, enrichment, and hashing when
    /// no raw bytes are present.
    pub content: String,
    /// Original payload as fetched, when ingestion had one (scraped HTML,
    /// uploaded file). Provenance only; the pipeline reads `content`.
    pub raw_content: Option<Vec<u8>>,
    pub source_uri: Option<String>,
    /// Hex SHA-256 of `content`; two documents with equal hashes are the
    /// same content regardless of title, source, or raw payload.
    pub content_hash: String,
    /// Arbitrary JSON object. Processor-owned slices live under the keys in
    /// [`metadata_keys`]; everything else belongs to the caller.
    pub metadata: Value,
    pub chunk_strategy: ChunkStrategy,
    /// Model whose vectors currently back this document's chunks. `None`
    /// until the first successful embed pass.
    pub embedding_model_id: Option<String>,
    pub embedded_at: Option<DateTime<Utc>>,
    /// Hard expiry; past this instant the freshness multiplier is zero.
    pub valid_until: Option<DateTime<Utc>>,
    pub ingested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Creates a document with a fresh id, hashed content, and empty
    /// metadata. Builder methods refine the rest.
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            content_hash: content_hash_hex(content.as_bytes()),
            content,
            raw_content: None,
            source_uri: None,
            metadata: json!({}),
            chunk_strategy: ChunkStrategy::default(),
            embedding_model_id: None,
            embedded_at: None,
            valid_until: None,
            ingested_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_source_uri(mut self, uri: impl Into<String>) -> Self {
        self.source_uri = Some(uri.into());
        self
    }

    /// Attaches the original payload bytes. The content hash stays derived
    /// from the canonical text, so volatile markup around identical text
    /// (timestamps in scraped HTML, say) does not defeat dedup.
    pub fn with_raw_content(mut self, raw: Vec<u8>) -> Self {
        self.raw_content = Some(raw);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_chunk_strategy(mut self, strategy: ChunkStrategy) -> Self {
        self.chunk_strategy = strategy;
        self
    }

    pub fn with_valid_until(mut self, valid_until: DateTime<Utc>) -> Self {
        self.valid_until = Some(valid_until);
        self
    }

    /// Records a completed embed pass.
    pub fn mark_embedded(&mut self, model_id: impl Into<String>, at: DateTime<Utc>) {
        self.embedding_model_id = Some(model_id.into());
        self.embedded_at = Some(at);
        self.updated_at = at;
    }
}

/// One embedded segment of a source record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    /// Kind of the owning record; currently always [`SOURCE_TYPE_DOCUMENT`].
    pub source_type: String,
    pub source_id: String,
    /// Zero-based position within the source; index 0 is the document's
    /// primary vector for dedup comparisons.
    pub chunk_index: usize,
    /// Hex SHA-256 of the chunk text. The text itself is not stored.
    pub content_hash: String,
    pub vector: Vec<f32>,
    /// Embedding model that produced `vector`; vectors from different
    /// models are never compared.
    pub model_id: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl ChunkRecord {
    pub fn new(
        source_id: impl Into<String>,
        chunk_index: usize,
        text: &str,
        vector: Vec<f32>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_type: SOURCE_TYPE_DOCUMENT.to_string(),
            source_id: source_id.into(),
            chunk_index,
            content_hash: content_hash_hex(text.as_bytes()),
            vector,
            model_id: model_id.into(),
            metadata: json!({}),
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A near-duplicate hit found by the dedup pass, recorded in both
/// documents' metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupMatch {
    /// Document on the other side of the match.
    pub source_id: String,
    /// Cosine similarity of the primary vectors, in `[-1.0, 1.0]`.
    pub similarity: f64,
}

/// Structured fields the enrichment pass asks the completion model for.
/// Every field is optional on the wire; a model that returns a bare
/// `{}` still parses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractedMetadata {
    pub entities: Vec<String>,
    pub topics: Vec<String>,
    pub summary: Option<String>,
    pub language: Option<String>,
}

impl ExtractedMetadata {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
            && self.topics.is_empty()
            && self.summary.is_none()
            && self.language.is_none()
    }
}
