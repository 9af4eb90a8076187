//! Runtime tunables for the pipeline.

use std::str::FromStr;
use std::time::Duration;

use crate::budget::BudgetLimits;
use crate::chunking::ChunkingConfig;
use crate::job::RetryPolicy;

/// Knobs for the worker pool and the six processors.
///
/// Every field has a serviceable default; [`RuntimeConfig::from_env`] layers
/// process environment on top for the handful of deployment knobs.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Model EMBED uses for documents without a recorded model. A document
    /// that already carries `embedding_model_id` keeps it; only RE_EMBED
    /// changes an established identity.
    pub embedding_model: String,
    /// Chat model ENRICH extracts metadata with.
    pub completion_model: String,
    pub chunking: ChunkingConfig,
    /// Cosine similarity at or above which two documents count as
    /// near-duplicates.
    pub dedup_threshold: f64,
    /// Cap on matches recorded per document.
    pub dedup_max_matches: usize,
    /// Characters of content handed to the enrichment prompt; longer
    /// documents are truncated.
    pub enrich_max_chars: usize,
    /// Days for a freshness multiplier to halve.
    pub freshness_half_life_days: f64,
    /// Lowest multiplier decay alone can reach. Expiry still forces zero.
    pub freshness_floor: f64,
    /// Age in days at which a sweep picks a document up.
    pub freshness_stale_after_days: f64,
    /// Worker tasks pulling from the queue.
    pub workers: usize,
    pub retry: RetryPolicy,
    /// How long an idle worker sleeps before polling the queue again.
    pub poll_interval: Duration,
    pub budget: BudgetLimits,
    /// Database file for the sqlite-backed runner; `None` keeps the
    /// environment default.
    pub sqlite_db_name: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            embedding_model: "text-embedding-3-small".to_string(),
            completion_model: "gpt-4o-mini".to_string(),
            chunking: ChunkingConfig::default(),
            dedup_threshold: 0.95,
            dedup_max_matches: 5,
            enrich_max_chars: 6_000,
            freshness_half_life_days: 30.0,
            freshness_floor: 0.05,
            freshness_stale_after_days: 7.0,
            workers: 5,
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_millis(100),
            budget: BudgetLimits::unlimited(),
            sqlite_db_name: None,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overlaid with process environment (a `.env` file is honored
    /// via `dotenvy`):
    ///
    /// - `GLEANFORGE_EMBEDDING_MODEL`, `GLEANFORGE_COMPLETION_MODEL`
    /// - `GLEANFORGE_WORKERS`
    /// - `GLEANFORGE_TOKEN_BUDGET`, `GLEANFORGE_COST_BUDGET_USD`
    /// - `SQLITE_DB_NAME`
    ///
    /// Unparseable values fall back to the default rather than failing
    /// startup.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        if let Ok(model) = std::env::var("GLEANFORGE_EMBEDDING_MODEL") {
            config.embedding_model = model;
        }
        if let Ok(model) = std::env::var("GLEANFORGE_COMPLETION_MODEL") {
            config.completion_model = model;
        }
        if let Some(workers) = env_parse::<usize>("GLEANFORGE_WORKERS") {
            config.workers = workers.max(1);
        }
        if let Some(tokens) = env_parse::<u64>("GLEANFORGE_TOKEN_BUDGET") {
            config.budget = config.budget.with_max_tokens(tokens);
        }
        if let Some(cost) = env_parse::<f64>("GLEANFORGE_COST_BUDGET_USD") {
            config.budget = config.budget.with_max_cost_usd(cost);
        }
        if let Ok(name) = std::env::var("SQLITE_DB_NAME") {
            config.sqlite_db_name = Some(name);
        }
        config
    }

    #[must_use]
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    #[must_use]
    pub fn with_completion_model(mut self, model: impl Into<String>) -> Self {
        self.completion_model = model.into();
        self
    }

    #[must_use]
    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    #[must_use]
    pub fn with_dedup_threshold(mut self, threshold: f64) -> Self {
        self.dedup_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn with_budget(mut self, budget: BudgetLimits) -> Self {
        self.budget = budget;
        self
    }

    #[must_use]
    pub fn with_sqlite_db_name(mut self, name: impl Into<String>) -> Self {
        self.sqlite_db_name = Some(name.into());
        self
    }

    /// Database file the sqlite runner should open: the configured name,
    /// else `SQLITE_DB_NAME`, else `gleanforge.db`.
    pub fn resolve_sqlite_db_name(&self) -> String {
        if let Some(name) = &self.sqlite_db_name {
            return name.clone();
        }
        dotenvy::dotenv().ok();
        std::env::var("SQLITE_DB_NAME").unwrap_or_else(|_| "gleanforge.db".to_string())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|raw| raw.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_runnable() {
        let config = RuntimeConfig::default();
        assert_eq!(config.workers, 5);
        assert_eq!(config.dedup_threshold, 0.95);
        assert!(config.budget.max_tokens.is_none());
        assert!(config.budget.max_cost_usd.is_none());
    }

    #[test]
    fn builders_clamp_workers_to_one() {
        let config = RuntimeConfig::default().with_workers(0);
        assert_eq!(config.workers, 1);
    }

    #[test]
    fn sqlite_name_prefers_the_explicit_setting() {
        let config = RuntimeConfig::default().with_sqlite_db_name("custom.db");
        assert_eq!(config.resolve_sqlite_db_name(), "custom.db");
    }
}
