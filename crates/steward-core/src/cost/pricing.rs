//! Static per-model token pricing

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Price per 1K tokens, input and output priced separately
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TokenPrice {
    /// USD per 1K input tokens
    pub input_per_1k: f64,
    /// USD per 1K output tokens
    pub output_per_1k: f64,
}

impl TokenPrice {
    /// Create a new token price
    pub const fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }
}

/// Static per-model price table
#[derive(Debug, Clone, Default)]
pub struct PricingTable {
    models: HashMap<String, TokenPrice>,
}

impl PricingTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Table seeded with current list prices for the supported models
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        table.register("gpt-4o", TokenPrice::new(0.0025, 0.01));
        table.register("gpt-4o-mini", TokenPrice::new(0.00015, 0.0006));
        table.register("gpt-4-turbo", TokenPrice::new(0.01, 0.03));
        table.register("claude-3-5-sonnet-20241022", TokenPrice::new(0.003, 0.015));
        table.register("claude-3-5-haiku-20241022", TokenPrice::new(0.0008, 0.004));
        table.register("gemini-1.5-pro", TokenPrice::new(0.00125, 0.005));
        table.register("gemini-2.0-flash", TokenPrice::new(0.000075, 0.0003));
        table
    }

    /// Register or replace a model price
    pub fn register(&mut self, model: impl Into<String>, price: TokenPrice) {
        self.models.insert(model.into(), price);
    }

    /// Price for a model, if known
    pub fn price_for(&self, model: &str) -> Option<TokenPrice> {
        self.models.get(model).copied()
    }

    /// Cost in USD for a token count, rounded to 6 decimals.
    ///
    /// Unknown models cost zero and log a warning; pricing gaps must never
    /// fail a request.
    pub fn cost(&self, model: &str, tokens_in: u32, tokens_out: u32) -> f64 {
        let Some(price) = self.models.get(model) else {
            warn!(model, "no pricing entry for model, assuming zero cost");
            return 0.0;
        };
        let cost = (tokens_in as f64 / 1000.0) * price.input_per_1k
            + (tokens_out as f64 / 1000.0) * price.output_per_1k;
        round6(cost)
    }
}

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}
