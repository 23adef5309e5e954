//! Error types for the Steward orchestration engine

use crate::types::ProviderId;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias for engine operations
pub type StewardResult<T> = Result<T, StewardError>;

/// Main error type for the orchestration engine
#[derive(Error, Debug, Clone)]
pub enum StewardError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A provider call failed. `retryable` drives both the per-provider
    /// retry loop and the cross-provider fallback walk.
    #[error("Provider {provider} error: {message}")]
    Provider {
        provider: ProviderId,
        message: String,
        retryable: bool,
    },

    /// The circuit breaker for a provider is open
    #[error("Circuit breaker open for provider {0}")]
    CircuitOpen(ProviderId),

    /// Request denied by the sliding-window rate limiter
    #[error("Rate limited on provider {provider}, retry after {retry_after_secs}s")]
    RateLimited {
        provider: ProviderId,
        retry_after_secs: u64,
    },

    /// The user's monthly budget would be exceeded
    #[error(
        "Monthly quota exceeded: ${current_usage:.2} used of ${limit:.2}, resets {reset_date}"
    )]
    QuotaExceeded {
        current_usage: f64,
        limit: f64,
        reset_date: DateTime<Utc>,
    },

    /// Every provider in the hierarchy was exhausted without success
    #[error("All providers failed after {attempts} attempts: {last_error}")]
    AllProvidersFailed {
        attempts: u32,
        last_error: Box<StewardError>,
    },

    /// Persistence collaborator errors (health / cache / usage stores)
    #[error("Storage error: {0}")]
    Storage(String),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),
}

impl StewardError {
    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a retryable provider error (network failure, 429, 5xx)
    pub fn provider_retryable(provider: ProviderId, message: impl Into<String>) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable provider error (other 4xx, malformed response)
    pub fn provider_fatal(provider: ProviderId, message: impl Into<String>) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
            retryable: false,
        }
    }

    /// Create a new storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Whether retrying (locally or on another provider) can help.
    ///
    /// Quota and rate-limit denials are typed rejections, not provider
    /// failures, so they are never classified as retryable here.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { retryable, .. } => *retryable,
            Self::Http(_) => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for StewardError {
    fn from(error: reqwest::Error) -> Self {
        Self::Http(error.to_string())
    }
}

impl From<serde_json::Error> for StewardError {
    fn from(error: serde_json::Error) -> Self {
        Self::Json(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        let transient = StewardError::provider_retryable(ProviderId::OpenAi, "503");
        assert!(transient.is_retryable());

        let fatal = StewardError::provider_fatal(ProviderId::OpenAi, "401 unauthorized");
        assert!(!fatal.is_retryable());

        assert!(!StewardError::CircuitOpen(ProviderId::Anthropic).is_retryable());
        assert!(!StewardError::config("bad").is_retryable());
    }

    #[test]
    fn all_providers_failed_keeps_cause() {
        let cause = StewardError::provider_retryable(ProviderId::Google, "timeout");
        let err = StewardError::AllProvidersFailed {
            attempts: 3,
            last_error: Box::new(cause),
        };
        assert!(err.to_string().contains("timeout"));
    }
}
