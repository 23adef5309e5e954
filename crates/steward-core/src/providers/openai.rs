//! OpenAI chat-completions adapter

use crate::config::ProviderSettings;
use crate::cost::pricing::PricingTable;
use crate::error::StewardResult;
use crate::providers::{
    build_client, estimate_message_tokens, estimate_tokens, malformed_response, status_error,
    transport_error, ProviderAdapter,
};
use crate::types::{AiResponse, ChatMessage, ProviderId, TokenUsage};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Adapter for the OpenAI `/chat/completions` endpoint
pub struct OpenAiAdapter {
    settings: ProviderSettings,
    pricing: Arc<PricingTable>,
    client: reqwest::Client,
}

impl OpenAiAdapter {
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
        format!("{}/chat/completions", base.trim_end_matches('/'))
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    fn supports_vision(&self) -> bool {
        self.settings.supports_vision
    }

    async fn send_message(&self, messages: &[ChatMessage]) -> StewardResult<AiResponse> {
        let provider = self.id();
        let body = json!({
            "model": self.settings.model,
            "messages": to_wire(messages),
            "max_tokens": self.settings.max_tokens,
            "temperature": self.settings.temperature,
        });

        let started = Instant::now();
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.settings.api_key)
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

        let parsed: OpenAiResponse = serde_json::from_str(&text)
            .map_err(|e| malformed_response(&provider, &e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| malformed_response(&provider, "no choices in response"))?;

        let usage = match parsed.usage {
            Some(u) => TokenUsage::new(u.prompt_tokens, u.completion_tokens),
            None => TokenUsage::new(estimate_message_tokens(messages), estimate_tokens(&content)),
        };
        let cost = self.pricing.cost(&self.settings.model, usage.input, usage.output);
        debug!(model = %self.settings.model, tokens = usage.total, elapsed_ms, "openai call complete");

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

/// OpenAI wire format: plain string content, or content blocks when the
/// message carries an image.
fn to_wire(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| match &m.image_url {
            Some(url) => json!({
                "role": m.role.to_string(),
                "content": [
                    {"type": "text", "text": m.content},
                    {"type": "image_url", "image_url": {"url": url}},
                ],
            }),
            None => json!({
                "role": m.role.to_string(),
                "content": m.content,
            }),
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_messages_serialize_as_string_content() {
        let wire = to_wire(&[ChatMessage::system("be helpful"), ChatMessage::user("hi")]);
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[0]["content"], "be helpful");
        assert_eq!(wire[1]["role"], "user");
        assert_eq!(wire[1]["content"], "hi");
    }

    #[test]
    fn image_messages_serialize_as_content_blocks() {
        let wire = to_wire(&[ChatMessage::user_with_image(
            "what is this receipt",
            "https://example.com/r.jpg",
        )]);
        let blocks = wire[0]["content"].as_array().expect("content blocks");
        assert_eq!(blocks[0]["type"], "text");
        assert_eq!(blocks[1]["image_url"]["url"], "https://example.com/r.jpg");
    }

    #[test]
    fn response_parses_with_and_without_usage() {
        let with: OpenAiResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":"hello"}}],"usage":{"prompt_tokens":12,"completion_tokens":3}}"#,
        )
        .unwrap();
        assert_eq!(with.usage.unwrap().prompt_tokens, 12);

        let without: OpenAiResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"hello"}}]}"#).unwrap();
        assert!(without.usage.is_none());
    }

    #[test]
    fn endpoint_respects_base_url_override() {
        let settings = crate::config::ProviderSettings::new(ProviderId::OpenAi, "k", "gpt-4o")
            .with_base_url("http://localhost:9999/v1/");
        let adapter = OpenAiAdapter::new(settings, Arc::new(PricingTable::with_defaults())).unwrap();
        assert_eq!(adapter.endpoint(), "http://localhost:9999/v1/chat/completions");
    }
}
