//! Anthropic messages adapter
//!
//! Anthropic takes system text as a top-level field rather than a message
//! role, so system messages are extracted and joined before the turns are
//! serialized.

use crate::config::ProviderSettings;
use crate::cost::pricing::PricingTable;
use crate::error::StewardResult;
use crate::providers::{
    build_client, estimate_message_tokens, estimate_tokens, malformed_response, status_error,
    transport_error, ProviderAdapter,
};
use crate::types::{AiResponse, ChatMessage, MessageRole, ProviderId, TokenUsage};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Adapter for the Anthropic `/v1/messages` endpoint
pub struct AnthropicAdapter {
    settings: ProviderSettings,
    pricing: Arc<PricingTable>,
    client: reqwest::Client,
}

impl AnthropicAdapter {
    /// Build an adapter from provider settings
    pub fn new(settings: ProviderSettings, pricing: Arc<PricingTable>) -> StewardResult<Self> {
        let client = build_client(settings.connect_timeout_secs, settings.request_timeout_secs)?;
        Ok(Self {
            settings,
            pricing,
            client,
        })
    }

    fn endpoint(&self) -> String {
        let base = self
            .settings
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL);
        format!("{}/v1/messages", base.trim_end_matches('/'))
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    fn supports_vision(&self) -> bool {
        self.settings.supports_vision
    }

    async fn send_message(&self, messages: &[ChatMessage]) -> StewardResult<AiResponse> {
        let provider = self.id();
        let (system, turns) = to_wire(messages);
        let mut body = json!({
            "model": self.settings.model,
            "messages": turns,
            "max_tokens": self.settings.max_tokens,
            "temperature": self.settings.temperature,
        });
        if let Some(system) = system {
            body["system"] = Value::String(system);
        }

        let started = Instant::now();
        let response = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.settings.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&provider, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(&provider, e))?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if !status.is_success() {
            return Err(status_error(&provider, status, &text));
        }

        let parsed: AnthropicResponse = serde_json::from_str(&text)
            .map_err(|e| malformed_response(&provider, &e.to_string()))?;
        let content: String = parsed
            .content
            .iter()
            .filter_map(|b| b.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        if content.is_empty() {
            return Err(malformed_response(&provider, "no text blocks in response"));
        }

        let usage = match parsed.usage {
            Some(u) => TokenUsage::new(u.input_tokens, u.output_tokens),
            None => TokenUsage::new(estimate_message_tokens(messages), estimate_tokens(&content)),
        };
        let cost = self.pricing.cost(&self.settings.model, usage.input, usage.output);
        debug!(model = %self.settings.model, tokens = usage.total, elapsed_ms, "anthropic call complete");

        Ok(AiResponse {
            content,
            provider,
            model: self.settings.model.clone(),
            usage,
            cost,
            response_time_ms: elapsed_ms,
            cached: false,
        })
    }

    fn estimate_cost(&self, tokens_in: u32, tokens_out: u32) -> f64 {
        self.pricing.cost(&self.settings.model, tokens_in, tokens_out)
    }
}

/// Split system text out and serialize the remaining turns
fn to_wire(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
    let system_parts: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == MessageRole::System)
        .map(|m| m.content.as_str())
        .collect();
    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };

    let turns = messages
        .iter()
        .filter(|m| m.role != MessageRole::System)
        .map(|m| match &m.image_url {
            Some(url) => json!({
                "role": m.role.to_string(),
                "content": [
                    {"type": "image", "source": {"type": "url", "url": url}},
                    {"type": "text", "text": m.content},
                ],
            }),
            None => json!({
                "role": m.role.to_string(),
                "content": m.content,
            }),
        })
        .collect();

    (system, turns)
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}
