//! Provider adapters
//!
//! Each adapter wraps one vendor's chat-completion endpoint behind the
//! uniform [`ProviderAdapter`] contract: translate the message list to the
//! vendor wire format, issue one HTTP attempt, normalize the response, and
//! classify failures as retryable or not. Retry pacing and fallback belong
//! to the dispatcher, which must observe every attempt for breaker, health
//! and usage accounting.

pub mod anthropic;
pub mod google;
pub mod openai;

pub use anthropic::AnthropicAdapter;
pub use google::GoogleAdapter;
pub use openai::OpenAiAdapter;

use crate::error::{StewardError, StewardResult};
use crate::types::{AiResponse, ChatMessage, ProviderId};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

/// Largest slice of an error body kept in error messages
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Uniform contract over one vendor's API
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Which provider this adapter talks to
    fn id(&self) -> ProviderId;

    /// Model the adapter is configured for
    fn model(&self) -> &str;

    /// Whether the configured model accepts image input
    fn supports_vision(&self) -> bool;

    /// Issue one attempt against the vendor and normalize the response
    async fn send_message(&self, messages: &[ChatMessage]) -> StewardResult<AiResponse>;

    /// Estimated cost in USD for a token count
    fn estimate_cost(&self, tokens_in: u32, tokens_out: u32) -> f64;
}

/// Rough token estimate when the vendor reports no usage: `ceil(chars / 4)`
pub fn estimate_tokens(text: &str) -> u32 {
    (text.chars().count() as u32).div_ceil(4)
}

/// Token estimate for a whole message list
pub fn estimate_message_tokens(messages: &[ChatMessage]) -> u32 {
    messages.iter().map(|m| estimate_tokens(&m.content)).sum()
}

/// Build a shared HTTP client with the configured timeouts
pub(crate) fn build_client(
    connect_timeout_secs: u64,
    request_timeout_secs: u64,
) -> StewardResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .timeout(Duration::from_secs(request_timeout_secs))
        .build()
        .map_err(StewardError::from)
}

/// Map a transport error: network failures and timeouts are retryable
pub(crate) fn transport_error(provider: &ProviderId, error: reqwest::Error) -> StewardError {
    StewardError::provider_retryable(provider.clone(), format!("request failed: {error}"))
}

/// Classify a non-success HTTP status: 429 and 5xx are retryable, other
/// 4xx are not.
pub(crate) fn status_error(provider: &ProviderId, status: StatusCode, body: &str) -> StewardError {
    let body = truncate(body);
    let message = format!("HTTP {status}: {body}");
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        StewardError::provider_retryable(provider.clone(), message)
    } else {
        StewardError::provider_fatal(provider.clone(), message)
    }
}

/// A response that does not match the vendor contract is not worth retrying
pub(crate) fn malformed_response(provider: &ProviderId, detail: &str) -> StewardError {
    StewardError::provider_fatal(provider.clone(), format!("malformed response: {detail}"))
}

fn truncate(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_ERROR_BODY_CHARS {
        return trimmed.to_string();
    }
    let kept: String = trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect();
    format!("{kept}... [truncated]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn message_estimate_sums_contents() {
        let messages = vec![
            ChatMessage::system("12345678"), // 2 tokens
            ChatMessage::user("1234"),       // 1 token
        ];
        assert_eq!(estimate_message_tokens(&messages), 3);
    }

    #[test]
    fn status_classification() {
        let provider = ProviderId::OpenAi;
        assert!(status_error(&provider, StatusCode::TOO_MANY_REQUESTS, "slow down").is_retryable());
        assert!(status_error(&provider, StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(!status_error(&provider, StatusCode::UNAUTHORIZED, "bad key").is_retryable());
        assert!(!status_error(&provider, StatusCode::BAD_REQUEST, "").is_retryable());
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = "x".repeat(2000);
        let err = status_error(&ProviderId::OpenAi, StatusCode::BAD_REQUEST, &body);
        assert!(err.to_string().contains("[truncated]"));
        assert!(err.to_string().len() < 700);
    }
}
