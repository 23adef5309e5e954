//! Engine configuration
//!
//! All configuration is supplied once at construction and treated as
//! immutable afterwards. There are no module-level registries; every piece
//! of state is owned by the dispatcher instance built from this config.

use crate::cost::quota::QuotaTier;
use crate::types::{OperationType, ProviderId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Settings for one provider adapter, immutable after construction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Which vendor this configures
    pub provider: ProviderId,
    /// API key for the vendor
    pub api_key: String,
    /// Override for the vendor base URL (proxies, test servers)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Model identifier to request
    pub model: String,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Position in the default fallback chain (lower = earlier). Explicit
    /// per-operation hierarchies and the vision chain take precedence.
    pub priority: u32,
    /// Local retry attempts per provider before falling back
    pub max_retries: u32,
    /// Base delay for exponential retry backoff, in milliseconds
    pub retry_base_delay_ms: u64,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// End-to-end request timeout in seconds
    pub request_timeout_secs: u64,
    /// Sliding-window rate limit per user for this provider
    pub requests_per_minute: u32,
    /// Whether the configured model accepts image input
    pub supports_vision: bool,
}

impl ProviderSettings {
    /// Create settings with defaults for everything but the identity fields
    pub fn new(
        provider: ProviderId,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            base_url: None,
            model: model.into(),
            max_tokens: 4096,
            temperature: 0.7,
            priority: 0,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            connect_timeout_secs: 10,
            request_timeout_secs: 60,
            requests_per_minute: 50,
            supports_vision: false,
        }
    }

    /// Override the base URL
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the fallback priority
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the per-provider retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the per-user rate limit
    pub fn with_requests_per_minute(mut self, rpm: u32) -> Self {
        self.requests_per_minute = rpm;
        self
    }

    /// Mark the model as vision-capable
    pub fn with_vision(mut self) -> Self {
        self.supports_vision = true;
        self
    }

    /// Set the generation parameters
    pub fn with_generation(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }
}

/// Per-operation provider hierarchies
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    hierarchies: HashMap<OperationType, Vec<ProviderId>>,
    /// Override chain used when the request is image-bearing
    vision_chain: Vec<ProviderId>,
    /// Fallback chain for operations without an explicit entry
    default_chain: Vec<ProviderId>,
    /// Whether the host set the default chain itself. When it did not, the
    /// dispatcher derives the chain from provider priorities at build time.
    default_chain_explicit: bool,
}

impl RoutingTable {
    /// Create an empty routing table
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard hierarchy: Anthropic leads for accuracy-critical tax work,
    /// OpenAI leads elsewhere, Google is the budget tertiary.
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        let accuracy = vec![ProviderId::Anthropic, ProviderId::OpenAi, ProviderId::Google];
        let general = vec![ProviderId::OpenAi, ProviderId::Anthropic, ProviderId::Google];
        let budget = vec![ProviderId::Google, ProviderId::OpenAi, ProviderId::Anthropic];

        table.set_hierarchy(OperationType::TaxConsultation, accuracy.clone());
        table.set_hierarchy(OperationType::ComplianceCheck, accuracy.clone());
        table.set_hierarchy(OperationType::TaxOptimization, accuracy);
        table.set_hierarchy(OperationType::Categorization, budget);
        table.vision_chain = vec![ProviderId::OpenAi, ProviderId::Anthropic, ProviderId::Google];
        table.default_chain = general;
        table
    }

    /// Set the hierarchy for one operation
    pub fn set_hierarchy(&mut self, operation: OperationType, chain: Vec<ProviderId>) {
        self.hierarchies.insert(operation, chain);
    }

    /// Set the vision override chain
    pub fn set_vision_chain(&mut self, chain: Vec<ProviderId>) {
        self.vision_chain = chain;
    }

    /// Set the default chain, overriding priority-derived ordering
    pub fn set_default_chain(&mut self, chain: Vec<ProviderId>) {
        self.default_chain = chain;
        self.default_chain_explicit = true;
    }

    /// Whether the host pinned the default chain
    pub fn has_explicit_default_chain(&self) -> bool {
        self.default_chain_explicit
    }

    /// Resolve the provider order for a request
    pub fn chain_for(&self, operation: OperationType, requires_vision: bool) -> &[ProviderId] {
        if requires_vision && !self.vision_chain.is_empty() {
            return &self.vision_chain;
        }
        self.hierarchies
            .get(&operation)
            .map(Vec::as_slice)
            .unwrap_or(&self.default_chain)
    }
}

/// Cache TTLs by operation type. Table-driven, never hardcoded per call site.
#[derive(Debug, Clone)]
pub struct TtlTable {
    ttls: HashMap<OperationType, Duration>,
    default_ttl: Duration,
}

impl Default for TtlTable {
    fn default() -> Self {
        let mut ttls = HashMap::new();
        ttls.insert(OperationType::TaxConsultation, Duration::from_secs(24 * 3600));
        ttls.insert(OperationType::ReceiptExtraction, Duration::from_secs(7 * 24 * 3600));
        ttls.insert(OperationType::FinancialInsight, Duration::from_secs(3600));
        ttls.insert(OperationType::Chat, Duration::from_secs(30 * 60));
        ttls.insert(OperationType::Categorization, Duration::from_secs(12 * 3600));
        ttls.insert(OperationType::ComplianceCheck, Duration::from_secs(24 * 3600));
        ttls.insert(OperationType::TaxOptimization, Duration::from_secs(24 * 3600));
        Self {
            ttls,
            default_ttl: Duration::from_secs(30 * 60),
        }
    }
}

impl TtlTable {
    /// TTL for an operation type
    pub fn ttl_for(&self, operation: OperationType) -> Duration {
        self.ttls.get(&operation).copied().unwrap_or(self.default_ttl)
    }

    /// Override the TTL for one operation
    pub fn set_ttl(&mut self, operation: OperationType, ttl: Duration) {
        self.ttls.insert(operation, ttl);
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// One entry per configured provider
    pub providers: Vec<ProviderSettings>,
    /// Feature-to-provider hierarchies
    pub routing: RoutingTable,
    /// Cache TTLs by operation
    pub cache_ttls: TtlTable,
    /// Failures before a breaker opens
    pub breaker_failure_threshold: u32,
    /// How long an open breaker rejects before probing
    pub breaker_recovery_timeout: Duration,
    /// Sliding window size for the rate limiter
    pub rate_limit_window: Duration,
    /// Interval of the background sweep that drops idle rate-limit keys
    pub sweep_interval: Duration,
    /// Quota tier used for users without an explicit assignment
    pub default_tier: QuotaTier,
    /// Per-user quota tier assignments
    pub user_tiers: HashMap<String, QuotaTier>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            routing: RoutingTable::with_defaults(),
            cache_ttls: TtlTable::default(),
            breaker_failure_threshold: 5,
            breaker_recovery_timeout: Duration::from_secs(30),
            rate_limit_window: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(300),
            default_tier: QuotaTier::Free,
            user_tiers: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Create a config with default tables and no providers
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider, keeping the list sorted by priority
    pub fn with_provider(mut self, settings: ProviderSettings) -> Self {
        self.providers.push(settings);
        self.providers.sort_by_key(|p| p.priority);
        self
    }

    /// Assign a quota tier to a user
    pub fn with_user_tier(mut self, user_id: impl Into<String>, tier: QuotaTier) -> Self {
        self.user_tiers.insert(user_id.into(), tier);
        self
    }

    /// Look up settings for a provider
    pub fn provider_settings(&self, provider: &ProviderId) -> Option<&ProviderSettings> {
        self.providers.iter().find(|p| &p.provider == provider)
    }
}
