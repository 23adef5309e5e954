//! End-to-end dispatcher behavior against scripted providers

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use steward_core::providers::ProviderAdapter;
use steward_core::recovery::CircuitState;
use steward_core::{
    AiResponse, ChatMessage, ChatRequest, Dispatcher, EngineConfig, MemoryConversationStore,
    MemoryUsageStore, OperationType, ProviderId, ProviderSettings, StewardError, StewardResult,
    TokenUsage, UsageRecord, UsageStore,
};
use tokio::sync::Mutex;

/// Route engine logs through the test harness, once per binary
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Adapter that replays a scripted sequence of outcomes
struct ScriptedAdapter {
    id: ProviderId,
    model: String,
    vision: bool,
    script: Mutex<VecDeque<StewardResult<AiResponse>>>,
    calls: AtomicU32,
}

impl ScriptedAdapter {
    fn new(id: ProviderId, model: &str, script: Vec<StewardResult<AiResponse>>) -> Arc<Self> {
        Arc::new(Self {
            id,
            model: model.to_string(),
            vision: false,
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
        })
    }

    fn always_ok(id: ProviderId, model: &str) -> Arc<Self> {
        Self::new(id, model, Vec::new())
    }

    fn always_ok_vision(id: ProviderId, model: &str) -> Arc<Self> {
        Arc::new(Self {
            id,
            model: model.to_string(),
            vision: true,
            script: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn id(&self) -> ProviderId {
        self.id.clone()
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn supports_vision(&self) -> bool {
        self.vision
    }

    async fn send_message(&self, _messages: &[ChatMessage]) -> StewardResult<AiResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().await.pop_front() {
            Some(outcome) => outcome,
            // an exhausted script keeps succeeding
            None => Ok(ok_response(self.id.clone(), &self.model)),
        }
    }

    fn estimate_cost(&self, _tokens_in: u32, _tokens_out: u32) -> f64 {
        0.001
    }
}

fn ok_response(provider: ProviderId, model: &str) -> AiResponse {
    AiResponse {
        content: format!("answer from {provider}"),
        provider,
        model: model.to_string(),
        usage: TokenUsage::new(100, 40),
        cost: 0.0015,
        response_time_ms: 120,
        cached: false,
    }
}

fn retryable(provider: ProviderId) -> StewardError {
    StewardError::provider_retryable(provider, "HTTP 500 Internal Server Error: upstream blew up")
}

fn settings(provider: ProviderId, model: &str, priority: u32) -> ProviderSettings {
    ProviderSettings::new(provider, "test-key", model).with_priority(priority)
}

fn chat(messages: &[&str]) -> ChatRequest {
    ChatRequest::new(
        "alice",
        OperationType::Chat,
        messages.iter().map(|m| ChatMessage::user(*m)).collect(),
    )
}

#[tokio::test]
async fn cache_hit_skips_providers_and_costs_nothing() {
    init_tracing();
    let openai = ScriptedAdapter::always_ok(ProviderId::OpenAi, "gpt-4o-mini");
    let usage = Arc::new(MemoryUsageStore::new());
    let dispatcher = Dispatcher::builder(
        EngineConfig::new().with_provider(settings(ProviderId::OpenAi, "gpt-4o-mini", 0)),
    )
    .with_adapter(openai.clone())
    .with_usage_store(usage.clone())
    .build()
    .unwrap();

    let request = chat(&["what is a W-2?"]);
    let first = dispatcher.send_message(&request).await.unwrap();
    assert!(!first.cached);
    assert_eq!(openai.calls(), 1);

    let second = dispatcher.send_message(&request).await.unwrap();
    assert!(second.cached);
    assert_eq!(second.cost, 0.0);
    assert_eq!(second.response_time_ms, 0);
    // the provider was not touched again
    assert_eq!(openai.calls(), 1);
    // and no new usage record was appended
    assert_eq!(usage.all().await.len(), 1);
}

#[tokio::test]
async fn each_failing_provider_leaves_one_usage_record() {
    init_tracing();
    let openai = ScriptedAdapter::new(
        ProviderId::OpenAi,
        "gpt-4o-mini",
        vec![Err(retryable(ProviderId::OpenAi))],
    );
    let anthropic = ScriptedAdapter::new(
        ProviderId::Anthropic,
        "claude-3-5-haiku-20241022",
        vec![Err(retryable(ProviderId::Anthropic))],
    );
    let google = ScriptedAdapter::always_ok(ProviderId::Google, "gemini-2.0-flash");
    let usage = Arc::new(MemoryUsageStore::new());

    let config = EngineConfig::new()
        .with_provider(settings(ProviderId::OpenAi, "gpt-4o-mini", 0).with_max_retries(0))
        .with_provider(
            settings(ProviderId::Anthropic, "claude-3-5-haiku-20241022", 1).with_max_retries(0),
        )
        .with_provider(settings(ProviderId::Google, "gemini-2.0-flash", 2).with_max_retries(0));
    let dispatcher = Dispatcher::builder(config)
        .with_adapter(openai)
        .with_adapter(anthropic)
        .with_adapter(google)
        .with_usage_store(usage.clone())
        .build()
        .unwrap();

    let response = dispatcher
        .send_message(&chat(&["hello"]).without_cache())
        .await
        .unwrap();
    assert_eq!(response.provider, ProviderId::Google);

    let records: Vec<UsageRecord> = usage.all().await;
    assert_eq!(records.len(), 3);
    assert!(!records[0].success);
    assert!(!records[1].success);
    assert!(records[2].success);
    assert_eq!(records[0].provider, ProviderId::OpenAi);
    assert_eq!(records[1].provider, ProviderId::Anthropic);
    assert_eq!(records[2].provider, ProviderId::Google);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_retry_in_place_and_record_every_attempt() {
    init_tracing();
    let openai = ScriptedAdapter::new(
        ProviderId::OpenAi,
        "gpt-4o-mini",
        vec![
            Err(retryable(ProviderId::OpenAi)),
            Err(retryable(ProviderId::OpenAi)),
            Err(retryable(ProviderId::OpenAi)),
        ],
    );
    let usage = Arc::new(MemoryUsageStore::new());
    let dispatcher = Dispatcher::builder(
        EngineConfig::new()
            .with_provider(settings(ProviderId::OpenAi, "gpt-4o-mini", 0).with_max_retries(3)),
    )
    .with_adapter(openai.clone())
    .with_usage_store(usage.clone())
    .build()
    .unwrap();

    let response = dispatcher
        .send_message(&chat(&["hello"]).without_cache())
        .await
        .unwrap();
    assert_eq!(response.provider, ProviderId::OpenAi);
    assert_eq!(openai.calls(), 4);

    // three failed attempts and one success, each with its own record
    let records = usage.all().await;
    assert_eq!(records.len(), 4);
    assert_eq!(records.iter().filter(|r| !r.success).count(), 3);
    assert!(records[3].success);

    // the success reset the breaker; the three failures left no residue
    let stats = dispatcher
        .breaker_stats(&ProviderId::OpenAi)
        .await
        .unwrap();
    assert_eq!(stats.state, CircuitState::Closed);
    assert_eq!(stats.failure_count, 0);
}

#[tokio::test]
async fn non_retryable_error_aborts_the_whole_walk() {
    init_tracing();
    let openai = ScriptedAdapter::new(
        ProviderId::OpenAi,
        "gpt-4o-mini",
        vec![Err(StewardError::provider_fatal(
            ProviderId::OpenAi,
            "HTTP 401 Unauthorized: invalid api key",
        ))],
    );
    let anthropic = ScriptedAdapter::always_ok(ProviderId::Anthropic, "claude-3-5-haiku-20241022");
    let usage = Arc::new(MemoryUsageStore::new());

    let config = EngineConfig::new()
        .with_provider(settings(ProviderId::OpenAi, "gpt-4o-mini", 0))
        .with_provider(settings(ProviderId::Anthropic, "claude-3-5-haiku-20241022", 1));
    let dispatcher = Dispatcher::builder(config)
        .with_adapter(openai.clone())
        .with_adapter(anthropic.clone())
        .with_usage_store(usage.clone())
        .build()
        .unwrap();

    let err = dispatcher
        .send_message(&chat(&["hello"]).without_cache())
        .await
        .unwrap_err();
    match err {
        StewardError::Provider { retryable, .. } => assert!(!retryable),
        other => panic!("expected provider error, got {other}"),
    }

    // no fallback happened and the single attempt was recorded
    assert_eq!(openai.calls(), 1);
    assert_eq!(anthropic.calls(), 0);
    assert_eq!(usage.all().await.len(), 1);
}

#[tokio::test]
async fn quota_denial_is_typed_and_reaches_no_provider() {
    init_tracing();
    let openai = ScriptedAdapter::always_ok(ProviderId::OpenAi, "gpt-4o-mini");
    let usage = Arc::new(MemoryUsageStore::new());
    // free tier allows $5/month; alice has already spent $6
    usage
        .append(UsageRecord::success(
            "alice",
            ProviderId::OpenAi,
            "gpt-4o",
            OperationType::Chat,
            TokenUsage::new(1000, 1000),
            6.0,
            500,
        ))
        .await
        .unwrap();

    let dispatcher = Dispatcher::builder(
        EngineConfig::new().with_provider(settings(ProviderId::OpenAi, "gpt-4o-mini", 0)),
    )
    .with_adapter(openai.clone())
    .with_usage_store(usage)
    .build()
    .unwrap();

    let err = dispatcher
        .send_message(&chat(&["hello"]).without_cache())
        .await
        .unwrap_err();
    match err {
        StewardError::QuotaExceeded {
            current_usage,
            limit,
            ..
        } => {
            assert_eq!(current_usage, 6.0);
            assert_eq!(limit, 5.0);
        }
        other => panic!("expected quota denial, got {other}"),
    }
    assert_eq!(openai.calls(), 0);
}

#[tokio::test]
async fn rate_limited_provider_is_skipped_not_failed() {
    init_tracing();
    let openai = ScriptedAdapter::always_ok(ProviderId::OpenAi, "gpt-4o-mini");
    let anthropic = ScriptedAdapter::always_ok(ProviderId::Anthropic, "claude-3-5-haiku-20241022");
    let usage = Arc::new(MemoryUsageStore::new());

    let config = EngineConfig::new()
        .with_provider(settings(ProviderId::OpenAi, "gpt-4o-mini", 0).with_requests_per_minute(1))
        .with_provider(settings(ProviderId::Anthropic, "claude-3-5-haiku-20241022", 1));
    let dispatcher = Dispatcher::builder(config)
        .with_adapter(openai.clone())
        .with_adapter(anthropic.clone())
        .with_usage_store(usage.clone())
        .build()
        .unwrap();

    let first = dispatcher
        .send_message(&chat(&["first"]).without_cache())
        .await
        .unwrap();
    assert_eq!(first.provider, ProviderId::OpenAi);

    // openai's per-user window is full, the walk moves on silently
    let second = dispatcher
        .send_message(&chat(&["second"]).without_cache())
        .await
        .unwrap();
    assert_eq!(second.provider, ProviderId::Anthropic);
    assert_eq!(openai.calls(), 1);

    // skips never show up as failed attempts
    assert!(usage.all().await.iter().all(|r| r.success));
}

#[tokio::test]
async fn open_breaker_skips_the_provider_without_calling_it() {
    init_tracing();
    let failures: Vec<StewardResult<AiResponse>> =
        (0..2).map(|_| Err(retryable(ProviderId::OpenAi))).collect();
    let openai = ScriptedAdapter::new(ProviderId::OpenAi, "gpt-4o-mini", failures);

    let mut config =
        EngineConfig::new().with_provider(settings(ProviderId::OpenAi, "gpt-4o-mini", 0).with_max_retries(0));
    config.breaker_failure_threshold = 2;
    let dispatcher = Dispatcher::builder(config)
        .with_adapter(openai.clone())
        .build()
        .unwrap();

    for _ in 0..2 {
        let err = dispatcher
            .send_message(&chat(&["hello"]).without_cache())
            .await
            .unwrap_err();
        assert!(matches!(err, StewardError::AllProvidersFailed { .. }));
    }
    assert_eq!(openai.calls(), 2);

    // the breaker is now open; the provider is skipped entirely
    let err = dispatcher
        .send_message(&chat(&["hello"]).without_cache())
        .await
        .unwrap_err();
    match err {
        StewardError::AllProvidersFailed {
            attempts,
            last_error,
        } => {
            assert_eq!(attempts, 0);
            assert!(matches!(*last_error, StewardError::CircuitOpen(_)));
        }
        other => panic!("expected exhaustion, got {other}"),
    }
    assert_eq!(openai.calls(), 2);
}

#[tokio::test]
async fn session_history_records_live_and_cached_exchanges() {
    init_tracing();
    let openai = ScriptedAdapter::always_ok(ProviderId::OpenAi, "gpt-4o-mini");
    let conversations = Arc::new(MemoryConversationStore::new());
    let dispatcher = Dispatcher::builder(
        EngineConfig::new().with_provider(settings(ProviderId::OpenAi, "gpt-4o-mini", 0)),
    )
    .with_adapter(openai)
    .with_conversation_store(conversations.clone())
    .build()
    .unwrap();

    let request = chat(&["hello"]).with_session("session-1");
    dispatcher.send_message(&request).await.unwrap();
    dispatcher.send_message(&request).await.unwrap(); // served from cache

    assert_eq!(conversations.exchange_count("session-1").await, 2);
}

#[tokio::test]
async fn provider_priority_orders_the_default_fallback_chain() {
    init_tracing();
    let openai = ScriptedAdapter::always_ok(ProviderId::OpenAi, "gpt-4o-mini");
    let google = ScriptedAdapter::always_ok(ProviderId::Google, "gemini-2.0-flash");

    // google is configured as the preferred provider despite being added last
    let config = EngineConfig::new()
        .with_provider(settings(ProviderId::OpenAi, "gpt-4o-mini", 5))
        .with_provider(settings(ProviderId::Google, "gemini-2.0-flash", 0));
    let dispatcher = Dispatcher::builder(config)
        .with_adapter(openai.clone())
        .with_adapter(google.clone())
        .build()
        .unwrap();

    let response = dispatcher
        .send_message(&chat(&["hello"]).without_cache())
        .await
        .unwrap();
    assert_eq!(response.provider, ProviderId::Google);
    assert_eq!(openai.calls(), 0);
    assert_eq!(google.calls(), 1);
}

#[tokio::test]
async fn vision_requests_skip_non_vision_models() {
    init_tracing();
    // openai leads the vision chain but its model is not vision-capable here
    let openai = ScriptedAdapter::always_ok(ProviderId::OpenAi, "gpt-3.5-turbo");
    let anthropic =
        ScriptedAdapter::always_ok_vision(ProviderId::Anthropic, "claude-3-5-sonnet-20241022");

    let config = EngineConfig::new()
        .with_provider(settings(ProviderId::OpenAi, "gpt-3.5-turbo", 0))
        .with_provider(
            settings(ProviderId::Anthropic, "claude-3-5-sonnet-20241022", 1).with_vision(),
        );
    let dispatcher = Dispatcher::builder(config)
        .with_adapter(openai.clone())
        .with_adapter(anthropic.clone())
        .build()
        .unwrap();

    let request = ChatRequest::new(
        "alice",
        OperationType::ReceiptExtraction,
        vec![ChatMessage::user_with_image(
            "extract totals",
            "https://example.com/receipt.jpg",
        )],
    );
    let response = dispatcher.send_message(&request).await.unwrap();
    assert_eq!(response.provider, ProviderId::Anthropic);
    assert_eq!(openai.calls(), 0);
}
