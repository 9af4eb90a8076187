//! # Gleanforge: Asynchronous Ingestion & Enrichment Pipeline
//!
//! Gleanforge turns heterogeneous source material (uploaded text, scraped
//! web pages) into a retrieval-ready knowledge store: chunked, embedded,
//! deduplicated, enriched with LLM-extracted metadata, and kept fresh over
//! time. Downstream retrieval queries embeddings by similarity and gets
//! freshness- and model-version-aware results.
//!
//! ## Core Concepts
//!
//! - **Documents & Chunks**: a [`model::Document`] owns its canonical text
//!   and a metadata map; its embeddings live in [`model::ChunkRecord`] rows
//!   that are replaced wholesale on every (re-)embed
//! - **Jobs**: six [`types::JobKind`]s flow through a durable queue with
//!   at-least-once delivery; every processor is idempotent, so redelivery is
//!   safe
//! - **Processors**: one async unit of work per kind, reading and writing
//!   through a shared [`processor::ProcessorContext`]
//! - **Budgets**: every paid provider call goes through a
//!   check-then-reserve-then-settle [`budget::BudgetGuard`]; denial is a
//!   retryable error, never a silent skip
//! - **Events**: processors narrate progress onto an
//!   [`event_bus::EventBus`] with pluggable sinks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gleanforge::ingest::PersistInput;
//! use gleanforge::job::Job;
//! use gleanforge::providers::{OpenAiClient, OpenAiConfig};
//! use gleanforge::runtimes::{PipelineRunner, RuntimeConfig};
//!
//! # async fn example() -> miette::Result<()> {
//! gleanforge::telemetry::init_tracing("info,gleanforge=debug");
//!
//! let openai = OpenAiClient::new(OpenAiConfig::new(std::env::var("OPENAI_API_KEY").unwrap()))?;
//! let runner = PipelineRunner::builder()
//!     .with_config(RuntimeConfig::from_env())
//!     .with_openai(openai)
//!     .build()
//!     .await?;
//!
//! // Direct ingestion: persists, embeds inline, queues ENRICH + DEDUP_CHECK.
//! let receipt = runner
//!     .ingest(PersistInput::text(
//!         "release notes",
//!         "Parsing is now twice as fast.",
//!     ))
//!     .await?;
//! println!("{} chunks for {}", receipt.chunks_created, receipt.document_id);
//!
//! // Queue-driven work: scrape a page, then recompute freshness everywhere.
//! runner.enqueue(Job::scrape("https://example.com/blog/post")).await?;
//! runner.enqueue(Job::freshness_sweep()).await?;
//!
//! runner.run_until_idle().await?;
//! runner.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ### Working with Jobs
//!
//! Jobs are plain data; constructors fill the payload shape each processor
//! expects:
//!
//! ```
//! use gleanforge::job::Job;
//! use gleanforge::types::JobKind;
//!
//! let job = Job::scrape("https://example.com/changelog");
//! assert_eq!(job.kind, JobKind::Scrape);
//! assert_eq!(job.payload_str("url"), Some("https://example.com/changelog"));
//!
//! let migrate = Job::re_embed("doc-42", "text-embedding-3-large");
//! assert_eq!(migrate.payload_str("newModelId"), Some("text-embedding-3-large"));
//! ```
//!
//! ### Chunking
//!
//! ```
//! use gleanforge::chunking::{ChunkStrategy, ChunkingConfig, chunk_text};
//!
//! let pieces = chunk_text(
//!     "Rust gives you control.\n\nTokio gives you concurrency.",
//!     ChunkStrategy::Paragraph,
//!     &ChunkingConfig::default(),
//! );
//! // Short paragraphs repack into one chunk under the default cap.
//! assert_eq!(pieces.len(), 1);
//! ```
//!
//! ### Budgets
//!
//! ```
//! use gleanforge::budget::{BudgetGuard, BudgetLimits, estimate_tokens};
//!
//! # fn main() -> Result<(), gleanforge::budget::BudgetError> {
//! let guard = BudgetGuard::new(BudgetLimits::unlimited().with_max_tokens(10_000));
//! let reservation = guard.check_token_budget(estimate_tokens("some prompt text"))?;
//! // ...make the paid call, then settle with record_usage, or release on failure.
//! guard.release(reservation);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`model`] - documents, chunk records, metadata slice keys
//! - [`types`] / [`job`] - job kinds, payloads, and the retry policy
//! - [`chunking`] - strategy-driven text segmentation
//! - [`similarity`] - cosine similarity over embedding vectors
//! - [`budget`] - token/cost ceilings, reservations, and pricing
//! - [`providers`] - OpenAI-compatible clients and the web ingester
//! - [`stores`] - document/chunk/queue traits; memory and sqlite backends
//! - [`ingest`] - the shared persistence path and its receipts
//! - [`processor`] / [`processors`] - execution framework and the six
//!   processors
//! - [`dispatcher`] - kind-to-processor routing
//! - [`event_bus`] - structured progress events with pluggable sinks
//! - [`runtimes`] - configuration, worker pool, and pipeline assembly
//! - [`telemetry`] - tracing setup for binaries and tests
//! - [`utils`] - JSON deep-merge and path helpers

pub mod budget;
pub mod chunking;
pub mod dispatcher;
pub mod event_bus;
pub mod ingest;
pub mod job;
pub mod model;
pub mod processor;
pub mod processors;
pub mod providers;
pub mod runtimes;
pub mod similarity;
pub mod stores;
pub mod telemetry;
pub mod types;
pub mod utils;
