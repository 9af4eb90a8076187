//! SQLite backend for documents, chunks, and the job queue.
//!
//! One connection pool serves all three traits so the dedup candidate query
//! can join chunks against documents. Vectors and metadata are stored as
//! JSON text; timestamps use sqlx's chrono encoding, which compares
//! lexicographically for UTC values.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Row, SqlitePool, sqlite::SqliteConnectOptions, sqlite::SqliteRow};
use tracing::instrument;

use super::{ChunkStore, DeadLetter, DocumentStore, JobQueue, QueueDepth, StoreError};
use crate::chunking::ChunkStrategy;
use crate::job::{Job, QueuedJob};
use crate::model::{ChunkRecord, Document};
use crate::types::JobKind;
use crate::utils::json_ext::{MergeStrategy, deep_merge};

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::backend(e.to_string())
    }
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        content TEXT NOT NULL,
        raw_content BLOB,
        source_uri TEXT,
        content_hash TEXT NOT NULL UNIQUE,
        metadata TEXT NOT NULL DEFAULT '{}',
        chunk_strategy TEXT NOT NULL,
        embedding_model_id TEXT,
        embedded_at TEXT,
        valid_until TEXT,
        ingested_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS chunks (
        id TEXT PRIMARY KEY,
        source_type TEXT NOT NULL,
        source_id TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        content_hash TEXT NOT NULL,
        vector TEXT NOT NULL,
        model_id TEXT NOT NULL,
        metadata TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source_id, chunk_index)",
    "CREATE INDEX IF NOT EXISTS idx_chunks_model ON chunks(model_id)",
    "CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        document_id TEXT,
        payload TEXT NOT NULL DEFAULT '{}',
        status TEXT NOT NULL DEFAULT 'ready',
        attempt INTEGER NOT NULL DEFAULT 0,
        enqueued_at TEXT NOT NULL,
        not_before TEXT,
        last_error TEXT,
        failed_at TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_jobs_claimable ON jobs(status, not_before, enqueued_at)",
];

/// SQLite-backed store implementing documents, chunks, and the job queue.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish()
    }
}

impl SqliteStore {
    /// Connects to a SQLite database URL, e.g. `sqlite://gleanforge.db`.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(database_url).await?;
        Self::from_pool(pool).await
    }

    /// Opens (or creates) a database file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        Self::from_pool(pool).await
    }

    /// Wraps an existing pool, creating any missing tables.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_document(row: &SqliteRow) -> Result<Document, StoreError> {
    let metadata_raw: String = row.try_get("metadata")?;
    let strategy_raw: String = row.try_get("chunk_strategy")?;
    Ok(Document {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        raw_content: row.try_get("raw_content")?,
        source_uri: row.try_get("source_uri")?,
        content_hash: row.try_get("content_hash")?,
        metadata: serde_json::from_str(&metadata_raw)?,
        chunk_strategy: ChunkStrategy::from_str(&strategy_raw)
            .map_err(|e| StoreError::corrupt(e.to_string()))?,
        embedding_model_id: row.try_get("embedding_model_id")?,
        embedded_at: row.try_get("embedded_at")?,
        valid_until: row.try_get("valid_until")?,
        ingested_at: row.try_get("ingested_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_chunk(row: &SqliteRow) -> Result<ChunkRecord, StoreError> {
    let vector_raw: String = row.try_get("vector")?;
    let metadata_raw: String = row.try_get("metadata")?;
    let chunk_index: i64 = row.try_get("chunk_index")?;
    Ok(ChunkRecord {
        id: row.try_get("id")?,
        source_type: row.try_get("source_type")?,
        source_id: row.try_get("source_id")?,
        chunk_index: chunk_index as usize,
        content_hash: row.try_get("content_hash")?,
        vector: serde_json::from_str(&vector_raw)?,
        model_id: row.try_get("model_id")?,
        metadata: serde_json::from_str(&metadata_raw)?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_queued_job(row: &SqliteRow) -> Result<QueuedJob, StoreError> {
    let kind_raw: String = row.try_get("kind")?;
    let payload_raw: String = row.try_get("payload")?;
    let attempt: i64 = row.try_get("attempt")?;
    Ok(QueuedJob {
        id: row.try_get("id")?,
        job: Job {
            kind: JobKind::decode(&kind_raw).map_err(|e| StoreError::corrupt(e.to_string()))?,
            document_id: row.try_get("document_id")?,
            payload: serde_json::from_str(&payload_raw)?,
        },
        attempt: attempt as u32,
        enqueued_at: row.try_get("enqueued_at")?,
        not_before: row.try_get("not_before")?,
    })
}

#[async_trait]
impl DocumentStore for SqliteStore {
    #[instrument(skip(self, document), fields(document_id = %document.id), err)]
    async fn insert_document(&self, document: Document) -> Result<(), StoreError> {
        let metadata = serde_json::to_string(&document.metadata)?;
        let result = sqlx::query(
            r#"
            INSERT INTO documents (
                id, title, content, raw_content, source_uri, content_hash,
                metadata, chunk_strategy, embedding_model_id, embedded_at,
                valid_until, ingested_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&document.id)
        .bind(&document.title)
        .bind(&document.content)
        .bind(&document.raw_content)
        .bind(&document.source_uri)
        .bind(&document.content_hash)
        .bind(&metadata)
        .bind(document.chunk_strategy.as_str())
        .bind(&document.embedding_model_id)
        .bind(document.embedded_at)
        .bind(document.valid_until)
        .bind(document.ingested_at)
        .bind(document.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::Duplicate {
                    content_hash: document.content_hash,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch_document(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn find_by_content_hash(
        &self,
        content_hash: &str,
    ) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query("SELECT * FROM documents WHERE content_hash = ?1")
            .bind(content_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    #[instrument(skip(self, patch), err)]
    async fn update_metadata(&self, id: &str, patch: Value) -> Result<Document, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM documents WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        let mut document = row_to_document(&row)?;

        document.metadata = deep_merge(&document.metadata, &patch, MergeStrategy::DeepMerge)
            .map_err(|e| StoreError::backend(e.to_string()))?;
        document.updated_at = Utc::now();

        sqlx::query("UPDATE documents SET metadata = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(serde_json::to_string(&document.metadata)?)
            .bind(document.updated_at)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(document)
    }

    async fn update_embedding_state(
        &self,
        id: &str,
        model_id: &str,
        embedded_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE documents SET embedding_model_id = ?1, embedded_at = ?2, updated_at = ?3 WHERE id = ?4",
        )
        .bind(model_id)
        .bind(embedded_at)
        .bind(embedded_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    async fn sweep_candidates(
        &self,
        stale_before: DateTime<Utc>,
        expired_by: DateTime<Utc>,
    ) -> Result<Vec<Document>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM documents
            WHERE ingested_at < ?1
               OR (valid_until IS NOT NULL AND valid_until <= ?2)
            ORDER BY ingested_at
            "#,
        )
        .bind(stale_before)
        .bind(expired_by)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_document).collect()
    }

    async fn count_documents(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl ChunkStore for SqliteStore {
    #[instrument(skip(self, chunks), fields(count = chunks.len()), err)]
    async fn replace_chunks(
        &self,
        source_id: &str,
        chunks: Vec<ChunkRecord>,
    ) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE source_id = ?1")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;

        let count = chunks.len();
        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (
                    id, source_type, source_id, chunk_index, content_hash,
                    vector, model_id, metadata, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.source_type)
            .bind(&chunk.source_id)
            .bind(chunk.chunk_index as i64)
            .bind(&chunk.content_hash)
            .bind(serde_json::to_string(&chunk.vector)?)
            .bind(&chunk.model_id)
            .bind(serde_json::to_string(&chunk.metadata)?)
            .bind(chunk.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(count)
    }

    async fn chunks_for_source(&self, source_id: &str) -> Result<Vec<ChunkRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE source_id = ?1 ORDER BY chunk_index")
            .bind(source_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_chunk).collect()
    }

    async fn primary_chunk(&self, source_id: &str) -> Result<Option<ChunkRecord>, StoreError> {
        let row =
            sqlx::query("SELECT * FROM chunks WHERE source_id = ?1 ORDER BY chunk_index LIMIT 1")
                .bind(source_id)
                .fetch_optional(&self.pool)
                .await?;
        row.as_ref().map(row_to_chunk).transpose()
    }

    async fn dedup_candidates(
        &self,
        exclude_source_id: &str,
        model_id: &str,
    ) -> Result<Vec<ChunkRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT c.* FROM chunks c
            JOIN documents d ON d.id = c.source_id
            WHERE c.source_id != ?1
              AND c.model_id = ?2
              AND d.embedding_model_id = ?2
              AND c.chunk_index = (
                  SELECT MIN(c2.chunk_index) FROM chunks c2 WHERE c2.source_id = c.source_id
              )
            ORDER BY c.source_id
            "#,
        )
        .bind(exclude_source_id)
        .bind(model_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_chunk).collect()
    }

    async fn delete_chunks(&self, source_id: &str) -> Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM chunks WHERE source_id = ?1")
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn count_chunks(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl JobQueue for SqliteStore {
    #[instrument(skip(self, job), fields(kind = %job.kind), err)]
    async fn enqueue(&self, job: Job) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO jobs (id, kind, document_id, payload, status, attempt, enqueued_at)
            VALUES (?1, ?2, ?3, ?4, 'ready', 0, ?5)
            "#,
        )
        .bind(&id)
        .bind(job.kind.encode())
        .bind(&job.document_id)
        .bind(serde_json::to_string(&job.payload)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn claim(&self) -> Result<Option<QueuedJob>, StoreError> {
        // Single statement so two workers can never claim the same job.
        let row = sqlx::query(
            r#"
            UPDATE jobs SET status = 'running'
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'ready'
                  AND (not_before IS NULL OR not_before <= ?1)
                ORDER BY enqueued_at
                LIMIT 1
            )
            RETURNING id, kind, document_id, payload, attempt, enqueued_at, not_before
            "#,
        )
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_queued_job).transpose()
    }

    async fn complete(&self, job_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                id: job_id.to_string(),
            });
        }
        Ok(())
    }

    async fn retry(&self, job_id: &str, delay: Duration, error: &str) -> Result<(), StoreError> {
        let not_before = Utc::now() + delay;
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'ready', attempt = attempt + 1, not_before = ?1, last_error = ?2
            WHERE id = ?3
            "#,
        )
        .bind(not_before)
        .bind(error)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                id: job_id.to_string(),
            });
        }
        Ok(())
    }

    async fn dead_letter(&self, job_id: &str, reason: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'dead', last_error = ?1, failed_at = ?2 WHERE id = ?3",
        )
        .bind(reason)
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                id: job_id.to_string(),
            });
        }
        Ok(())
    }

    async fn depth(&self) -> Result<QueueDepth, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        let mut depth = QueueDepth::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("n")?;
            match status.as_str() {
                "ready" => depth.ready = count as u64,
                "running" => depth.running = count as u64,
                "dead" => depth.dead = count as u64,
                other => {
                    return Err(StoreError::corrupt(format!("unknown job status: {other}")));
                }
            }
        }
        Ok(depth)
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE status = 'dead' ORDER BY failed_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let job = row_to_queued_job(row)?;
                let reason: Option<String> = row.try_get("last_error")?;
                let failed_at: Option<DateTime<Utc>> = row.try_get("failed_at")?;
                Ok(DeadLetter {
                    job,
                    reason: reason.unwrap_or_default(),
                    failed_at: failed_at.unwrap_or_else(Utc::now),
                })
            })
            .collect()
    }
}
