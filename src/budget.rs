//! Process-wide token and dollar budgets for paid provider calls.
//!
//! Every embedding or completion call goes through the same sequence:
//! check the cost ceiling, reserve an estimated token count, make the call,
//! then settle the reservation with actual usage (or release it when the
//! call failed). Reserving before the call closes the window where many
//! concurrent workers each pass a check the budget can only afford once.
//!
//! Pricing is a per-1K-token rate table keyed by model-family substrings,
//! so `deepseek-ai/DeepSeek-V3.1` prices as the `deepseek` family without
//! an exact-name entry.

use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Token counts reported by a provider for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    /// Prompt-only usage, as embedding endpoints report.
    pub fn prompt_only(prompt_tokens: u64) -> Self {
        Self::new(prompt_tokens, 0)
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Rough token count for budgeting purposes, using the common
/// four-characters-per-token heuristic.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// Per-1K-token rates for one model family.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelRate {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

impl ModelRate {
    pub const fn new(prompt_per_1k: f64, completion_per_1k: f64) -> Self {
        Self {
            prompt_per_1k,
            completion_per_1k,
        }
    }

    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        (usage.prompt_tokens as f64 / 1000.0) * self.prompt_per_1k
            + (usage.completion_tokens as f64 / 1000.0) * self.completion_per_1k
    }
}

/// Rate used when no family pattern matches the model name.
const DEFAULT_RATE: ModelRate = ModelRate::new(0.003, 0.015);

/// Model-family pricing table. Lookup is a case-insensitive substring match,
/// longest pattern first, so `gpt-4o-mini` wins over `gpt-4o`.
#[derive(Debug, Clone)]
pub struct PricingTable {
    rates: Vec<(String, ModelRate)>,
}

impl Default for PricingTable {
    fn default() -> Self {
        let mut table = Self { rates: Vec::new() };
        for (pattern, prompt, completion) in [
            ("deepseek", 0.00015, 0.00045),
            ("meta-llama", 0.00018, 0.00018),
            ("claude-haiku", 0.001, 0.005),
            ("claude-sonnet", 0.003, 0.015),
            ("claude-opus", 0.015, 0.075),
            ("gpt-4o-mini", 0.00015, 0.0006),
            ("gpt-4o", 0.0025, 0.01),
            ("text-embedding-3-small", 0.00002, 0.0),
            ("text-embedding-3-large", 0.00013, 0.0),
        ] {
            table = table.with_rate(pattern, ModelRate::new(prompt, completion));
        }
        table
    }
}

impl PricingTable {
    /// Adds or replaces a family rate, keeping longest-first lookup order.
    pub fn with_rate(mut self, pattern: impl Into<String>, rate: ModelRate) -> Self {
        let pattern = pattern.into().to_lowercase();
        self.rates.retain(|(existing, _)| *existing != pattern);
        self.rates.push((pattern, rate));
        self.rates
            .sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        self
    }

    pub fn rate_for(&self, model: &str) -> ModelRate {
        let model = model.to_lowercase();
        self.rates
            .iter()
            .find(|(pattern, _)| model.contains(pattern.as_str()))
            .map(|(_, rate)| *rate)
            .unwrap_or(DEFAULT_RATE)
    }

    pub fn cost(&self, model: &str, usage: &TokenUsage) -> f64 {
        self.rate_for(model).cost(usage)
    }
}

/// Ceilings for one pipeline run. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BudgetLimits {
    pub max_tokens: Option<u64>,
    pub max_cost_usd: Option<f64>,
}

impl BudgetLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_max_cost_usd(mut self, max_cost_usd: f64) -> Self {
        self.max_cost_usd = Some(max_cost_usd);
        self
    }
}

/// Budget denial. Both variants are transient from a job's point of view:
/// the work is valid and may succeed after a reset or a raised ceiling, so
/// callers retry rather than dead-letter.
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum BudgetError {
    #[error("token budget exhausted: requested {requested}, remaining {remaining}")]
    #[diagnostic(
        code(gleanforge::budget::tokens_exhausted),
        help("raise the token ceiling or reset the budget guard")
    )]
    TokensExhausted { requested: u64, remaining: u64 },

    #[error("cost budget exhausted: spent ${spent:.4} of ${ceiling:.4}")]
    #[diagnostic(
        code(gleanforge::budget::cost_exhausted),
        help("raise the cost ceiling or reset the budget guard")
    )]
    CostExhausted { spent: f64, ceiling: f64 },
}

/// A held token estimate. Must be settled with [`BudgetGuard::record_usage`]
/// after a successful call or returned with [`BudgetGuard::release`] after a
/// failed one; not `Clone`, so a reservation cannot be settled twice.
#[derive(Debug)]
pub struct BudgetReservation {
    id: u64,
    tokens: u64,
}

impl BudgetReservation {
    pub fn tokens(&self) -> u64 {
        self.tokens
    }
}

/// Aggregated usage for one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub model: String,
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
}

/// Point-in-time snapshot of the guard's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetReport {
    pub tokens_used: u64,
    pub tokens_reserved: u64,
    pub cost_usd: f64,
    pub calls: u64,
    /// Tokens still spendable under the ceiling, `None` when unlimited.
    pub remaining_tokens: Option<u64>,
    pub remaining_cost_usd: Option<f64>,
    /// Per-model breakdown, sorted by model name.
    pub models: Vec<ModelUsage>,
}

#[derive(Debug, Default)]
struct BudgetState {
    tokens_used: u64,
    tokens_reserved: u64,
    cost_usd: f64,
    calls: u64,
    per_model: FxHashMap<String, ModelUsage>,
    open_reservations: FxHashMap<u64, u64>,
    next_reservation_id: u64,
}

/// Shared token/dollar budget, consulted before every paid provider call.
#[derive(Debug)]
pub struct BudgetGuard {
    limits: BudgetLimits,
    pricing: PricingTable,
    state: Mutex<BudgetState>,
}

impl BudgetGuard {
    pub fn new(limits: BudgetLimits) -> Self {
        Self::with_pricing(limits, PricingTable::default())
    }

    pub fn with_pricing(limits: BudgetLimits, pricing: PricingTable) -> Self {
        Self {
            limits,
            pricing,
            state: Mutex::new(BudgetState::default()),
        }
    }

    /// Guard with no ceilings; every check passes.
    pub fn unlimited() -> Self {
        Self::new(BudgetLimits::unlimited())
    }

    pub fn limits(&self) -> BudgetLimits {
        self.limits
    }

    /// Atomically checks `estimated_tokens` against the ceiling, counting
    /// both settled usage and outstanding reservations, and holds the
    /// estimate on success.
    pub fn check_token_budget(
        &self,
        estimated_tokens: u64,
    ) -> Result<BudgetReservation, BudgetError> {
        let mut state = self.state.lock();
        if let Some(max) = self.limits.max_tokens {
            let committed = state.tokens_used.saturating_add(state.tokens_reserved);
            if committed.saturating_add(estimated_tokens) > max {
                return Err(BudgetError::TokensExhausted {
                    requested: estimated_tokens,
                    remaining: max.saturating_sub(committed),
                });
            }
        }
        state.next_reservation_id += 1;
        let id = state.next_reservation_id;
        state.tokens_reserved = state.tokens_reserved.saturating_add(estimated_tokens);
        state.open_reservations.insert(id, estimated_tokens);
        Ok(BudgetReservation {
            id,
            tokens: estimated_tokens,
        })
    }

    /// Compares settled spend to the dollar ceiling. Spend is only known
    /// after calls complete, so a run may finish the call that crosses the
    /// ceiling; every later check is denied.
    pub fn check_cost_budget(&self) -> Result<(), BudgetError> {
        if let Some(ceiling) = self.limits.max_cost_usd {
            let spent = self.state.lock().cost_usd;
            if spent >= ceiling {
                return Err(BudgetError::CostExhausted { spent, ceiling });
            }
        }
        Ok(())
    }

    /// Settles a reservation with actual usage: the estimate is dropped,
    /// real tokens are counted, and the call is priced against `model`.
    /// Returns the dollar cost of this call.
    pub fn record_usage(
        &self,
        reservation: BudgetReservation,
        model: &str,
        usage: &TokenUsage,
    ) -> f64 {
        let cost = self.pricing.cost(model, usage);
        let mut state = self.state.lock();
        if let Some(reserved) = state.open_reservations.remove(&reservation.id) {
            state.tokens_reserved = state.tokens_reserved.saturating_sub(reserved);
        }
        state.tokens_used = state.tokens_used.saturating_add(usage.total());
        state.cost_usd += cost;
        state.calls += 1;

        let entry = state
            .per_model
            .entry(model.to_string())
            .or_insert_with(|| ModelUsage {
                model: model.to_string(),
                ..ModelUsage::default()
            });
        entry.calls += 1;
        entry.prompt_tokens += usage.prompt_tokens;
        entry.completion_tokens += usage.completion_tokens;
        entry.cost_usd += cost;
        cost
    }

    /// Returns a reservation whose call never produced usage.
    pub fn release(&self, reservation: BudgetReservation) {
        let mut state = self.state.lock();
        if let Some(reserved) = state.open_reservations.remove(&reservation.id) {
            state.tokens_reserved = state.tokens_reserved.saturating_sub(reserved);
        }
    }

    /// Zeroes all counters and drops outstanding reservations.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        *state = BudgetState::default();
    }

    pub fn report(&self) -> BudgetReport {
        let state = self.state.lock();
        let mut models: Vec<ModelUsage> = state.per_model.values().cloned().collect();
        models.sort_by(|a, b| a.model.cmp(&b.model));
        BudgetReport {
            tokens_used: state.tokens_used,
            tokens_reserved: state.tokens_reserved,
            cost_usd: state.cost_usd,
            calls: state.calls,
            remaining_tokens: self.limits.max_tokens.map(|max| {
                max.saturating_sub(state.tokens_used.saturating_add(state.tokens_reserved))
            }),
            remaining_cost_usd: self
                .limits
                .max_cost_usd
                .map(|ceiling| (ceiling - state.cost_usd).max(0.0)),
            models,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn pricing_matches_model_families_by_substring() {
        let table = PricingTable::default();
        let usage = TokenUsage::new(1000, 1000);
        // Vendor-prefixed names still land on their family rate.
        let cost = table.cost("deepseek-ai/DeepSeek-V3.1", &usage);
        assert!((cost - (0.00015 + 0.00045)).abs() < 1e-9);
        // Longest pattern wins: gpt-4o-mini is not priced as gpt-4o.
        let mini = table.cost("gpt-4o-mini-2024-07-18", &usage);
        assert!((mini - (0.00015 + 0.0006)).abs() < 1e-9);
    }

    #[test]
    fn unknown_models_use_the_default_rate() {
        let table = PricingTable::default();
        let cost = table.cost("mystery-model", &TokenUsage::new(1000, 1000));
        assert!((cost - (0.003 + 0.015)).abs() < 1e-9);
    }

    #[test]
    fn reservations_count_against_the_ceiling() {
        let guard = BudgetGuard::new(BudgetLimits::default().with_max_tokens(100));
        let first = guard.check_token_budget(60).unwrap();
        let denied = guard.check_token_budget(60).unwrap_err();
        match denied {
            BudgetError::TokensExhausted {
                requested,
                remaining,
            } => {
                assert_eq!(requested, 60);
                assert_eq!(remaining, 40);
            }
            other => panic!("unexpected error: {other}"),
        }
        guard.release(first);
        assert!(guard.check_token_budget(60).is_ok());
    }

    #[test]
    fn settling_replaces_the_estimate_with_actuals() {
        let guard = BudgetGuard::new(BudgetLimits::default().with_max_tokens(100));
        let reservation = guard.check_token_budget(80).unwrap();
        guard.record_usage(reservation, "text-embedding-3-small", &TokenUsage::prompt_only(10));

        let report = guard.report();
        assert_eq!(report.tokens_used, 10);
        assert_eq!(report.tokens_reserved, 0);
        assert_eq!(report.remaining_tokens, Some(90));
        // The freed estimate is spendable again.
        assert!(guard.check_token_budget(80).is_ok());
    }

    #[test]
    fn cost_ceiling_denies_after_spend_crosses_it() {
        let guard = BudgetGuard::new(BudgetLimits::default().with_max_cost_usd(0.01));
        assert!(guard.check_cost_budget().is_ok());
        let reservation = guard.check_token_budget(0).unwrap();
        // 10K tokens of claude-opus prompt is $0.15, well past the ceiling.
        guard.record_usage(reservation, "claude-opus-4", &TokenUsage::prompt_only(10_000));
        assert!(matches!(
            guard.check_cost_budget(),
            Err(BudgetError::CostExhausted { .. })
        ));
    }

    #[test]
    fn report_breaks_usage_down_per_model() {
        let guard = BudgetGuard::unlimited();
        for _ in 0..2 {
            let r = guard.check_token_budget(10).unwrap();
            guard.record_usage(r, "text-embedding-3-small", &TokenUsage::prompt_only(8));
        }
        let r = guard.check_token_budget(10).unwrap();
        guard.record_usage(r, "gpt-4o-mini", &TokenUsage::new(5, 7));

        let report = guard.report();
        assert_eq!(report.calls, 3);
        assert_eq!(report.models.len(), 2);
        let small = report
            .models
            .iter()
            .find(|m| m.model == "text-embedding-3-small")
            .unwrap();
        assert_eq!(small.calls, 2);
        assert_eq!(small.prompt_tokens, 16);
    }

    #[test]
    fn reset_zeroes_everything() {
        let guard = BudgetGuard::new(BudgetLimits::default().with_max_tokens(50));
        let r = guard.check_token_budget(50).unwrap();
        guard.record_usage(r, "gpt-4o", &TokenUsage::new(40, 0));
        guard.reset();
        let report = guard.report();
        assert_eq!(report.tokens_used, 0);
        assert_eq!(report.calls, 0);
        assert!(guard.check_token_budget(50).is_ok());
    }
}
