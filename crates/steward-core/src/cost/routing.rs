//! Cost-aware routing optimizer
//!
//! Picks the cheapest provider/model adequate for an operation given its
//! estimated size. The choice feeds the quota gate's cost estimate; the
//! dispatcher still walks the configured provider hierarchy for fallback.

use crate::types::{OperationType, ProviderId};

/// Request complexity, bucketed by estimated prompt tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    /// Under 100 tokens
    Simple,
    /// Under 500 tokens
    Medium,
    /// Under 2000 tokens
    Complex,
    /// Everything larger
    VeryComplex,
}

impl Complexity {
    /// Bucket an estimated token count
    pub fn from_tokens(estimated_tokens: u32) -> Self {
        match estimated_tokens {
            0..=99 => Complexity::Simple,
            100..=499 => Complexity::Medium,
            500..=1999 => Complexity::Complex,
            _ => Complexity::VeryComplex,
        }
    }
}

/// A provider/model pair selected by the optimizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingChoice {
    /// Provider to prefer
    pub provider: ProviderId,
    /// Model to price the request against
    pub model: String,
}

impl RoutingChoice {
    fn new(provider: ProviderId, model: &str) -> Self {
        Self {
            provider,
            model: model.to_string(),
        }
    }
}

/// Model tiers used by the optimizer
#[derive(Debug, Clone)]
pub struct RoutingOptimizer {
    cheapest: RoutingChoice,
    mid_tier: RoutingChoice,
    capable: RoutingChoice,
    premium: RoutingChoice,
    vision: RoutingChoice,
}

impl Default for RoutingOptimizer {
    fn default() -> Self {
        Self {
            cheapest: RoutingChoice::new(ProviderId::Google, "gemini-2.0-flash"),
            mid_tier: RoutingChoice::new(ProviderId::OpenAi, "gpt-4o-mini"),
            capable: RoutingChoice::new(ProviderId::OpenAi, "gpt-4o"),
            premium: RoutingChoice::new(ProviderId::Anthropic, "claude-3-5-sonnet-20241022"),
            vision: RoutingChoice::new(ProviderId::OpenAi, "gpt-4o"),
        }
    }
}

impl RoutingOptimizer {
    /// Create an optimizer with the default model tiers
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the cheapest adequate provider/model for a request.
    ///
    /// Order of precedence: a hot cache (hit rate above 0.7) makes the live
    /// call rare enough that the cheapest model wins outright; vision
    /// requests force a vision-capable model regardless of cost; otherwise
    /// operation criticality and the complexity bucket decide.
    pub fn optimal_choice(
        &self,
        operation: OperationType,
        estimated_tokens: u32,
        requires_vision: bool,
        cache_hit_rate: f64,
    ) -> RoutingChoice {
        if cache_hit_rate > 0.7 {
            return self.cheapest.clone();
        }
        if requires_vision {
            return self.vision.clone();
        }

        match operation {
            // accuracy-critical: always the highest-accuracy model
            OperationType::TaxConsultation
            | OperationType::ComplianceCheck
            | OperationType::TaxOptimization => self.premium.clone(),
            // high-volume and forgiving: always the cheapest
            OperationType::Categorization => self.cheapest.clone(),
            _ => match Complexity::from_tokens(estimated_tokens) {
                Complexity::Simple => self.cheapest.clone(),
                Complexity::Medium => self.mid_tier.clone(),
                Complexity::Complex => self.capable.clone(),
                Complexity::VeryComplex => self.premium.clone(),
            },
        }
    }
}
