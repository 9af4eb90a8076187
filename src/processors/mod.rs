//! The six job processors behind the pipeline.
//!
//! One processor per [`JobKind`](crate::types::JobKind), dispatched by the
//! worker pool:
//!
//! - [`EmbedProcessor`]: chunk a document and replace its vector rows
//! - [`EnrichProcessor`]: LLM metadata extraction, soft-failing to a marker
//! - [`DedupCheckProcessor`]: cosine comparison against same-model peers
//! - [`ReEmbedProcessor`]: migrate a document to a new embedding model
//! - [`FreshnessProcessor`]: exponential-decay freshness multipliers
//! - [`ScrapeProcessor`]: fetch a URL into the shared persistence path
//!
//! The queue redelivers at least once, so every processor is safe to re-run:
//! embeds replace their rows wholesale, the metadata writers merge an
//! idempotent slice keyed by [`metadata_keys`](crate::model::metadata_keys),
//! and scrapes defer to content-hash duplicate rejection.

pub mod dedup;
pub mod embed;
pub mod enrich;
pub mod freshness;
pub mod re_embed;
pub mod scrape;

pub use dedup::DedupCheckProcessor;
pub use embed::EmbedProcessor;
pub use enrich::EnrichProcessor;
pub use freshness::FreshnessProcessor;
pub use re_embed::ReEmbedProcessor;
pub use scrape::ScrapeProcessor;
