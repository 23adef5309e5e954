//! Google Gemini generateContent adapter
//!
//! Gemini speaks `user`/`model` roles and wants system text in a separate
//! `systemInstruction` field. Image attachments ride as `file_data` parts
//! next to the text part.

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

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Adapter for the Gemini `models/{model}:generateContent` endpoint
pub struct GoogleAdapter {
    settings: ProviderSettings,
    pricing: Arc<PricingTable>,
    client: reqwest::Client,
}

impl GoogleAdapter {
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
        format!(
            "{}/models/{}:generateContent",
            base.trim_end_matches('/'),
            self.settings.model
        )
    }
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Google
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    fn supports_vision(&self) -> bool {
        self.settings.supports_vision
    }

    async fn send_message(&self, messages: &[ChatMessage]) -> StewardResult<AiResponse> {
        let provider = self.id();
        let (system, contents) = to_wire(messages);
        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": self.settings.max_tokens,
                "temperature": self.settings.temperature,
            },
        });
        if let Some(system) = system {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }

        let started = Instant::now();
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.settings.api_key)
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

        let parsed: GoogleResponse = serde_json::from_str(&text)
            .map_err(|e| malformed_response(&provider, &e.to_string()))?;
        let content: String = parsed
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        if content.is_empty() {
            return Err(malformed_response(&provider, "no candidates in response"));
        }

        let usage = match parsed.usage_metadata {
            Some(u) => TokenUsage::new(u.prompt_token_count, u.candidates_token_count),
            None => TokenUsage::new(estimate_message_tokens(messages), estimate_tokens(&content)),
        };
        let cost = self.pricing.cost(&self.settings.model, usage.input, usage.output);
        debug!(model = %self.settings.model, tokens = usage.total, elapsed_ms, "google call complete");

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

/// Split system text out and map roles to the Gemini `user`/`model` pair
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

    let contents = messages
        .iter()
        .filter(|m| m.role != MessageRole::System)
        .map(|m| {
            let role = match m.role {
                MessageRole::Assistant => "model",
                _ => "user",
            };
            let mut parts = vec![json!({"text": m.content})];
            if let Some(url) = &m.image_url {
                parts.push(json!({"file_data": {"file_uri": url}}));
            }
            json!({"role": role, "parts": parts})
        })
        .collect();

    (system, contents)
}

#[derive(Debug, Deserialize)]
struct GoogleResponse {
    candidates: Vec<GoogleCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GoogleUsage>,
}

#[derive(Debug, Deserialize)]
struct GoogleCandidate {
    content: GoogleContent,
}

#[derive(Debug, Deserialize)]
struct GoogleContent {
    #[serde(default)]
    parts: Vec<GooglePart>,
}

#[derive(Debug, Deserialize)]
struct GooglePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleUsage {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: u32,
}
