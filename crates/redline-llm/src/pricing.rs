//! Per-model pricing and the per-call cost tracker.

use crate::provider::TokenUsage;
use redline_core::config::PriceOverride;
use redline_core::usage::CallUsage;
use std::collections::BTreeMap;

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Price {
    pub input: f64,
    pub output: f64,
}

impl Price {
    pub const FREE: Price = Price {
        input: 0.0,
        output: 0.0,
    };

    /// Cost in USD for the given token counts.
    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 / 1_000_000.0) * self.input
            + (completion_tokens as f64 / 1_000_000.0) * self.output
    }
}

impl From<PriceOverride> for Price {
    fn from(p: PriceOverride) -> Self {
        Self {
            input: p.input,
            output: p.output,
        }
    }
}

const fn price(input: f64, output: f64) -> Price {
    Price { input, output }
}

const BUILTIN_PRICES: &[(&str, Price)] = &[
    // OpenAI
    ("gpt-4.1", price(2.00, 8.00)),
    ("gpt-4.1-mini", price(0.40, 1.60)),
    ("chatgpt-4o-latest", price(5.00, 15.00)),
    ("gpt-4o", price(2.50, 10.00)),
    ("gpt-4o-2024-11-20", price(2.50, 10.00)),
    ("gpt-4o-mini", price(0.15, 0.60)),
    ("o4-mini", price(1.10, 4.40)),
    ("gpt-5", price(1.25, 10.00)),
    ("gpt-5-mini", price(0.25, 2.00)),
    // OpenRouter
    ("openai/o3-mini", price(1.10, 4.40)),
    ("anthropic/claude-3.5-sonnet", price(3.00, 15.00)),
    ("anthropic/claude-3.7-sonnet", price(3.00, 15.00)),
    ("anthropic/claude-sonnet-4", price(3.00, 15.00)),
    ("google/gemini-2.5-flash-preview", price(0.15, 0.60)),
    ("google/gemini-2.5-flash-preview-05-20", price(0.15, 0.60)),
    ("google/gemini-2.5-flash", price(0.30, 2.50)),
    ("google/gemini-2.0-flash-001", price(0.10, 0.40)),
    ("google/gemini-2.5-pro-preview-03-25", price(1.25, 10.00)),
    ("perplexity/sonar", price(1.00, 1.00)),
    ("perplexity/sonar-pro", price(3.00, 15.00)),
];

/// Price for an exact model id: configured overrides first, then the built-in
/// table. `None` means the model is unpriced and its calls cost zero.
pub fn price_for(model: &str, overrides: &BTreeMap<String, PriceOverride>) -> Option<Price> {
    if let Some(p) = overrides.get(model) {
        return Some((*p).into());
    }
    BUILTIN_PRICES
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, p)| *p)
}

/// Running token and cost counters for one top-level call.
#[derive(Debug, Clone)]
pub struct CostTracker {
    model: String,
    price: Option<Price>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl CostTracker {
    pub fn new(model: impl Into<String>, price: Option<Price>) -> Self {
        Self {
            model: model.into(),
            price,
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
        }
    }

    /// Zero the counters before a new top-level call.
    pub fn reset(&mut self) {
        self.prompt_tokens = 0;
        self.completion_tokens = 0;
        self.total_tokens = 0;
    }

    /// Record token usage from one response.
    pub fn record(&mut self, usage: TokenUsage) {
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.total_tokens += usage.total_tokens;
    }

    /// Current cost in USD.
    pub fn total_cost_usd(&self) -> f64 {
        self.price
            .unwrap_or(Price::FREE)
            .cost(self.prompt_tokens, self.completion_tokens)
    }

    pub fn is_priced(&self) -> bool {
        self.price.is_some()
    }

    pub fn to_usage(&self) -> CallUsage {
        CallUsage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
            cost: self.total_cost_usd(),
            model: self.model.clone(),
        }
    }
}
