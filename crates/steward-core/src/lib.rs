//! Steward: an orchestration engine for external AI providers.
//!
//! A single [`Dispatcher`] fronts every AI request in the host application.
//! Requests carry a business [`OperationType`]; the engine resolves the
//! provider hierarchy for that operation, short-circuits through a
//! content-addressed response cache, enforces per-user monthly budgets and
//! per-provider rate limits, and walks the hierarchy with per-provider
//! circuit breakers and retries until a provider answers.
//!
//! ```no_run
//! use steward_core::{
//!     ChatMessage, ChatRequest, Dispatcher, EngineConfig, OperationType, ProviderId,
//!     ProviderSettings,
//! };
//!
//! # async fn run() -> steward_core::StewardResult<()> {
//! let config = EngineConfig::new()
//!     .with_provider(ProviderSettings::new(ProviderId::OpenAi, "sk-...", "gpt-4o-mini"))
//!     .with_provider(
//!         ProviderSettings::new(ProviderId::Anthropic, "sk-ant-...", "claude-3-5-haiku-20241022")
//!             .with_priority(1),
//!     );
//! let dispatcher = Dispatcher::builder(config).build()?;
//!
//! let request = ChatRequest::new(
//!     "user-42",
//!     OperationType::Chat,
//!     vec![ChatMessage::user("Can I deduct my home office?")],
//! );
//! let response = dispatcher.send_message(&request).await?;
//! println!("{} (${:.4})", response.content, response.cost);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod cost;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod providers;
pub mod rate_limit;
pub mod recovery;
pub mod storage;
pub mod types;
pub mod usage;

pub use cache::{cache_key, CacheEntry, ResponseCache};
pub use config::{EngineConfig, ProviderSettings, RoutingTable, TtlTable};
pub use cost::{
    CostReport, CostReporter, PricingTable, QuotaCheck, QuotaManager, QuotaTier, RoutingChoice,
    RoutingOptimizer, TokenPrice,
};
pub use dispatcher::{ChatRequest, Dispatcher, DispatcherBuilder};
pub use error::{StewardError, StewardResult};
pub use health::{HealthRegistry, HealthStatus, ProviderHealth};
pub use providers::ProviderAdapter;
pub use rate_limit::{RateLimitDecision, SlidingWindowLimiter};
pub use recovery::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use storage::{
    CacheStore, ConversationStore, HealthStore, MemoryCacheStore, MemoryConversationStore,
    MemoryHealthStore, MemoryUsageStore, UsageStore,
};
pub use types::{
    requires_vision, AiResponse, ChatMessage, MessageRole, OperationType, ProviderId, TokenUsage,
};
pub use usage::{UsageRecord, UsageTracker};
