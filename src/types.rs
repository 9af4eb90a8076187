//! Core job-type definitions shared across the pipeline.
//!
//! Every queue message names exactly one [`JobKind`]. The set is closed on
//! purpose: routing is an exhaustive `match`, so adding a kind is a
//! compile-time-checked change to the dispatcher, and a kind string the
//! decoder does not recognize is a configuration fault, never a retry.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The six processor families the dispatcher can route to.
///
/// Wire names (queue rows, payload JSON) use the upper snake form produced by
/// [`JobKind::encode`]; the serde representation matches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    /// Chunk a document's raw content and (re)generate its embeddings under
    /// the current model.
    Embed,
    /// Extract entities/topics/summary/language via chat completion;
    /// best-effort.
    Enrich,
    /// Flag near-duplicate documents by cosine similarity, advisory only.
    DedupCheck,
    /// Re-generate embeddings under an explicitly named new model.
    ReEmbed,
    /// Compute and persist a freshness decay multiplier.
    Freshness,
    /// Fetch a web page and hand it to the shared persistence path.
    Scrape,
}

impl JobKind {
    /// All kinds, in dispatch order. Useful for registries and tests.
    pub const ALL: [JobKind; 6] = [
        JobKind::Embed,
        JobKind::Enrich,
        JobKind::DedupCheck,
        JobKind::ReEmbed,
        JobKind::Freshness,
        JobKind::Scrape,
    ];

    /// Stable wire representation used in queue rows.
    pub fn encode(&self) -> &'static str {
        match self {
            JobKind::Embed => "EMBED",
            JobKind::Enrich => "ENRICH",
            JobKind::DedupCheck => "DEDUP_CHECK",
            JobKind::ReEmbed => "RE_EMBED",
            JobKind::Freshness => "FRESHNESS",
            JobKind::Scrape => "SCRAPE",
        }
    }

    /// Inverse of [`JobKind::encode`].
    ///
    /// An unrecognized kind means the queue row was written by an
    /// incompatible producer; callers dead-letter such rows instead of
    /// retrying them.
    pub fn decode(raw: &str) -> Result<Self, UnknownJobKind> {
        match raw {
            "EMBED" => Ok(JobKind::Embed),
            "ENRICH" => Ok(JobKind::Enrich),
            "DEDUP_CHECK" => Ok(JobKind::DedupCheck),
            "RE_EMBED" => Ok(JobKind::ReEmbed),
            "FRESHNESS" => Ok(JobKind::Freshness),
            "SCRAPE" => Ok(JobKind::Scrape),
            other => Err(UnknownJobKind {
                kind: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode())
    }
}

impl FromStr for JobKind {
    type Err = UnknownJobKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::decode(s)
    }
}

/// Raised when a queue row names a job kind this build does not know.
#[derive(Debug, Clone, Error, Diagnostic)]
#[error("unknown job kind: {kind}")]
#[diagnostic(
    code(gleanforge::job::unknown_kind),
    help("job kinds are fixed at compile time; dead-letter this row and check the producer's version")
)]
pub struct UnknownJobKind {
    pub kind: String,
}
