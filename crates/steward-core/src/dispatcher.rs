//! Request dispatcher
//!
//! The single entry point for AI requests. A request flows through the cache
//! short-circuit, the quota gate, and then the provider hierarchy for its
//! operation; each provider is guarded by its circuit breaker, the durable
//! health registry and the sliding-window rate limiter. Retries against one
//! provider happen here rather than inside the adapters so every HTTP
//! attempt is visible to breaker, health and usage accounting.

use crate::cache::{cache_key, ResponseCache};
use crate::config::EngineConfig;
use crate::cost::pricing::PricingTable;
use crate::cost::quota::QuotaManager;
use crate::cost::routing::RoutingOptimizer;
use crate::error::{StewardError, StewardResult};
use crate::health::{HealthRegistry, ProviderHealth};
use crate::providers::{
    estimate_message_tokens, AnthropicAdapter, GoogleAdapter, OpenAiAdapter, ProviderAdapter,
};
use crate::rate_limit::SlidingWindowLimiter;
use crate::recovery::{
    BackoffConfig, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, ExponentialBackoff,
};
use crate::storage::{
    CacheStore, ConversationStore, HealthStore, MemoryCacheStore, MemoryHealthStore,
    MemoryUsageStore, UsageStore,
};
use crate::types::{requires_vision, AiResponse, ChatMessage, OperationType, ProviderId};
use crate::usage::{UsageRecord, UsageTracker};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One dispatchable request
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Ordered conversation messages
    pub messages: Vec<ChatMessage>,
    /// User the request is made for
    pub user_id: String,
    /// Business operation, drives routing and cache TTL
    pub operation: OperationType,
    /// Session to append the exchange to, when history is kept
    pub session_id: Option<String>,
    /// Whether the response cache may serve and store this request
    pub use_cache: bool,
}

impl ChatRequest {
    /// Create a cacheable request without session history
    pub fn new(
        user_id: impl Into<String>,
        operation: OperationType,
        messages: Vec<ChatMessage>,
    ) -> Self {
        Self {
            messages,
            user_id: user_id.into(),
            operation,
            session_id: None,
            use_cache: true,
        }
    }

    /// Attach a session for conversation history
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Opt out of the response cache
    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }
}

/// Per-provider retry policy, derived from [`crate::config::ProviderSettings`]
#[derive(Debug, Clone)]
struct RetryPolicy {
    max_retries: u32,
    backoff: BackoffConfig,
}

/// The orchestration engine
pub struct Dispatcher {
    adapters: HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
    retry_policies: HashMap<ProviderId, RetryPolicy>,
    breakers: HashMap<ProviderId, Arc<CircuitBreaker>>,
    health: HealthRegistry,
    limiter: Arc<SlidingWindowLimiter>,
    cache: ResponseCache,
    quota: QuotaManager,
    optimizer: RoutingOptimizer,
    usage: UsageTracker,
    conversations: Option<Arc<dyn ConversationStore>>,
    pricing_table: Arc<PricingTable>,
    config: EngineConfig,
    sweep_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Start building a dispatcher from an engine config
    pub fn builder(config: EngineConfig) -> DispatcherBuilder {
        DispatcherBuilder::new(config)
    }

    /// Dispatch one request.
    ///
    /// Order of gates: cache short-circuit, quota, then the provider
    /// hierarchy walk. Within the walk a provider is skipped (never counted
    /// as a failure) when its breaker is open, the health registry fences it
    /// off, or the rate limiter denies the user. A non-retryable provider
    /// error aborts the whole walk since it would fail identically
    /// everywhere it could fail.
    pub async fn send_message(&self, request: &ChatRequest) -> StewardResult<AiResponse> {
        if request.messages.is_empty() {
            return Err(StewardError::config("request has no messages"));
        }
        let vision = requires_vision(&request.messages);

        let key = if request.use_cache {
            let key = cache_key(&request.messages, request.operation)?;
            if let Some(hit) = self.cache.lookup(&key, request.operation).await {
                self.append_history(request, &hit).await;
                return Ok(hit);
            }
            Some(key)
        } else {
            None
        };

        self.check_quota(request, vision).await?;

        let chain = self.config.routing.chain_for(request.operation, vision);
        let mut attempts: u32 = 0;
        let mut last_error: Option<StewardError> = None;

        for provider in chain {
            let Some(adapter) = self.adapters.get(provider) else {
                debug!(provider = %provider, "no adapter configured, skipping");
                continue;
            };
            if vision && !adapter.supports_vision() {
                debug!(provider = %provider, "model is not vision-capable, skipping");
                continue;
            }
            if let Some(breaker) = self.breakers.get(provider) {
                if breaker.is_open().await {
                    debug!(provider = %provider, "circuit open, skipping");
                    last_error = Some(StewardError::CircuitOpen(provider.clone()));
                    continue;
                }
            }
            if !self.health.check_health(provider).await {
                debug!(provider = %provider, "marked unhealthy, skipping");
                last_error = Some(StewardError::provider_retryable(
                    provider.clone(),
                    "provider fenced off by health registry",
                ));
                continue;
            }
            let decision = self.limiter.check(provider, &request.user_id).await;
            if !decision.allowed {
                last_error = Some(StewardError::RateLimited {
                    provider: provider.clone(),
                    retry_after_secs: decision.retry_after_secs.unwrap_or(1),
                });
                continue;
            }

            match self
                .try_provider(provider, adapter.as_ref(), request, &mut attempts)
                .await
            {
                Ok(response) => {
                    if let Some(key) = &key {
                        self.cache.store(key, request.operation, &response).await;
                    }
                    self.append_history(request, &response).await;
                    return Ok(response);
                }
                // a breaker that opened mid-walk is a skip, not a failure
                Err(err @ StewardError::CircuitOpen(_)) => last_error = Some(err),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => last_error = Some(err),
            }
        }

        Err(StewardError::AllProvidersFailed {
            attempts,
            last_error: Box::new(
                last_error.unwrap_or_else(|| StewardError::config("no eligible providers")),
            ),
        })
    }

    /// Exercise one provider with its retry budget. Every attempt updates
    /// the breaker, the health registry and the usage log.
    async fn try_provider(
        &self,
        provider: &ProviderId,
        adapter: &dyn ProviderAdapter,
        request: &ChatRequest,
        attempts: &mut u32,
    ) -> StewardResult<AiResponse> {
        let policy = self
            .retry_policies
            .get(provider)
            .cloned()
            .unwrap_or(RetryPolicy {
                max_retries: 0,
                backoff: BackoffConfig::default(),
            });
        let mut backoff = ExponentialBackoff::with_config(policy.backoff);
        let breaker = self.breakers.get(provider);

        let mut attempt = 0;
        loop {
            let started = std::time::Instant::now();
            let result = match breaker {
                Some(breaker) => breaker.call(|| adapter.send_message(&request.messages)).await,
                None => adapter.send_message(&request.messages).await,
            };

            match result {
                Ok(response) => {
                    *attempts += 1;
                    self.health.record_success(provider).await;
                    self.usage
                        .track(UsageRecord::success(
                            &request.user_id,
                            provider.clone(),
                            &response.model,
                            request.operation,
                            response.usage,
                            response.cost,
                            response.response_time_ms,
                        ))
                        .await;
                    info!(
                        provider = %provider,
                        operation = %request.operation,
                        cost = response.cost,
                        "request served"
                    );
                    return Ok(response);
                }
                // the breaker opened between the skip check and this call;
                // no HTTP attempt happened, so nothing is recorded
                Err(err @ StewardError::CircuitOpen(_)) => return Err(err),
                Err(err) => {
                    *attempts += 1;
                    self.health.record_failure(provider, &err).await;
                    self.usage
                        .track(UsageRecord::failure(
                            &request.user_id,
                            provider.clone(),
                            adapter.model(),
                            request.operation,
                            &err,
                            started.elapsed().as_millis() as u64,
                        ))
                        .await;

                    if !err.is_retryable() {
                        warn!(provider = %provider, error = %err, "non-retryable failure");
                        return Err(err);
                    }
                    if attempt >= policy.max_retries {
                        warn!(
                            provider = %provider,
                            attempts = attempt + 1,
                            error = %err,
                            "retry budget exhausted, falling back"
                        );
                        return Err(err);
                    }
                    attempt += 1;
                    let delay = backoff.next_delay();
                    debug!(provider = %provider, attempt, ?delay, "retrying after backoff");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Quota gate. Denials are typed; a failing usage store fails open so
    /// billing storage problems never block every request.
    async fn check_quota(&self, request: &ChatRequest, vision: bool) -> StewardResult<()> {
        let estimated_tokens = estimate_message_tokens(&request.messages);
        let choice = self.optimizer.optimal_choice(
            request.operation,
            estimated_tokens,
            vision,
            self.cache.hit_rate(request.operation),
        );
        let estimated_cost = self
            .pricing()
            .cost(&choice.model, estimated_tokens, estimated_tokens);

        match self
            .quota
            .check_user_quota(&request.user_id, estimated_cost)
            .await
        {
            Ok(check) if check.allowed => Ok(()),
            Ok(check) => Err(StewardError::QuotaExceeded {
                current_usage: check.current_usage,
                limit: check.limit,
                reset_date: check.reset_date,
            }),
            Err(err) => {
                warn!(error = %err, "quota check failed, failing open");
                Ok(())
            }
        }
    }

    async fn append_history(&self, request: &ChatRequest, response: &AiResponse) {
        let (Some(store), Some(session)) = (&self.conversations, &request.session_id) else {
            return;
        };
        if let Err(err) = store
            .append_exchange(session, &request.messages, response)
            .await
        {
            warn!(session = %session, error = %err, "failed to append conversation history");
        }
    }

    fn pricing(&self) -> &PricingTable {
        &self.pricing_table
    }

    /// Spawn the background sweep that drops idle rate-limit keys. Idempotent.
    pub fn start(&self) {
        let mut guard = match self.sweep_task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_some() {
            return;
        }
        let limiter = Arc::clone(&self.limiter);
        let interval = self.config.sweep_interval;
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                limiter.sweep().await;
            }
        }));
    }

    /// Stop the background sweep
    pub fn stop(&self) {
        let mut guard = match self.sweep_task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(task) = guard.take() {
            task.abort();
        }
    }

    /// Breaker snapshot for a provider
    pub async fn breaker_stats(&self, provider: &ProviderId) -> Option<CircuitBreakerStats> {
        match self.breakers.get(provider) {
            Some(breaker) => Some(breaker.stats().await),
            None => None,
        }
    }

    /// Durable health record for a provider
    pub async fn provider_health(&self, provider: &ProviderId) -> Option<ProviderHealth> {
        self.health.health(provider).await
    }

    /// Trailing-window cache hit rate for an operation
    pub fn cache_hit_rate(&self, operation: OperationType) -> f64 {
        self.cache.hit_rate(operation)
    }

    /// Quota manager, for host-side balance displays
    pub fn quota(&self) -> &QuotaManager {
        &self.quota
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Builds a [`Dispatcher`], wiring default HTTP adapters for configured
/// providers and in-memory stores unless the host supplies its own.
pub struct DispatcherBuilder {
    config: EngineConfig,
    adapters: HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
    pricing: Arc<PricingTable>,
    optimizer: RoutingOptimizer,
    health_store: Option<Arc<dyn HealthStore>>,
    cache_store: Option<Arc<dyn CacheStore>>,
    usage_store: Option<Arc<dyn UsageStore>>,
    conversation_store: Option<Arc<dyn ConversationStore>>,
}

impl DispatcherBuilder {
    /// Start from an engine config
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            adapters: HashMap::new(),
            pricing: Arc::new(PricingTable::with_defaults()),
            optimizer: RoutingOptimizer::new(),
            health_store: None,
            cache_store: None,
            usage_store: None,
            conversation_store: None,
        }
    }

    /// Register an adapter, replacing the default HTTP one for its provider
    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter.id(), adapter);
        self
    }

    /// Replace the default pricing table
    pub fn with_pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = Arc::new(pricing);
        self
    }

    /// Replace the routing optimizer tiers
    pub fn with_optimizer(mut self, optimizer: RoutingOptimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Use a durable health store
    pub fn with_health_store(mut self, store: Arc<dyn HealthStore>) -> Self {
        self.health_store = Some(store);
        self
    }

    /// Use a durable cache store
    pub fn with_cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    /// Use a durable usage store
    pub fn with_usage_store(mut self, store: Arc<dyn UsageStore>) -> Self {
        self.usage_store = Some(store);
        self
    }

    /// Keep conversation history in this store
    pub fn with_conversation_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.conversation_store = Some(store);
        self
    }

    /// Wire everything up
    pub fn build(mut self) -> StewardResult<Dispatcher> {
        if self.config.providers.is_empty() && self.adapters.is_empty() {
            return Err(StewardError::config("no providers configured"));
        }

        for settings in &self.config.providers {
            if self.adapters.contains_key(&settings.provider) {
                continue;
            }
            let adapter: Arc<dyn ProviderAdapter> = match &settings.provider {
                ProviderId::OpenAi => Arc::new(OpenAiAdapter::new(
                    settings.clone(),
                    Arc::clone(&self.pricing),
                )?),
                ProviderId::Anthropic => Arc::new(AnthropicAdapter::new(
                    settings.clone(),
                    Arc::clone(&self.pricing),
                )?),
                ProviderId::Google => Arc::new(GoogleAdapter::new(
                    settings.clone(),
                    Arc::clone(&self.pricing),
                )?),
                ProviderId::Custom(name) => {
                    return Err(StewardError::config(format!(
                        "custom provider '{name}' requires an adapter"
                    )))
                }
            };
            self.adapters.insert(settings.provider.clone(), adapter);
        }

        let breaker_config = CircuitBreakerConfig {
            failure_threshold: self.config.breaker_failure_threshold,
            recovery_timeout: self.config.breaker_recovery_timeout,
        };
        let mut breakers = HashMap::new();
        let mut retry_policies = HashMap::new();
        let mut rate_limits = HashMap::new();
        for provider in self.adapters.keys() {
            breakers.insert(
                provider.clone(),
                Arc::new(CircuitBreaker::with_config(
                    provider.clone(),
                    breaker_config.clone(),
                )),
            );
        }
        for settings in &self.config.providers {
            retry_policies.insert(
                settings.provider.clone(),
                RetryPolicy {
                    max_retries: settings.max_retries,
                    backoff: BackoffConfig::with_base_delay(Duration::from_millis(
                        settings.retry_base_delay_ms,
                    )),
                },
            );
            rate_limits.insert(settings.provider.clone(), settings.requests_per_minute);
        }

        // operations without an explicit hierarchy fall back to the
        // priority order of the configured providers
        if !self.config.routing.has_explicit_default_chain() && !self.config.providers.is_empty() {
            let mut by_priority = self.config.providers.clone();
            by_priority.sort_by_key(|s| s.priority);
            self.config
                .routing
                .set_default_chain(by_priority.into_iter().map(|s| s.provider).collect());
        }

        let health_store = self
            .health_store
            .unwrap_or_else(|| Arc::new(MemoryHealthStore::new()));
        let cache_store = self
            .cache_store
            .unwrap_or_else(|| Arc::new(MemoryCacheStore::new()));
        let usage_store = self
            .usage_store
            .unwrap_or_else(|| Arc::new(MemoryUsageStore::new()));

        Ok(Dispatcher {
            adapters: self.adapters,
            retry_policies,
            breakers,
            health: HealthRegistry::new(health_store),
            limiter: Arc::new(SlidingWindowLimiter::new(
                self.config.rate_limit_window,
                rate_limits,
            )),
            cache: ResponseCache::new(cache_store, self.config.cache_ttls.clone()),
            quota: QuotaManager::new(
                Arc::clone(&usage_store),
                self.config.default_tier,
                self.config.user_tiers.clone(),
            ),
            optimizer: self.optimizer,
            usage: UsageTracker::new(usage_store),
            conversations: self.conversation_store,
            pricing_table: self.pricing,
            config: self.config,
            sweep_task: std::sync::Mutex::new(None),
        })
    }
}
