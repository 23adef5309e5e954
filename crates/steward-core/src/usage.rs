//! Append-only usage tracking
//!
//! One record per provider attempt, success or failure. Tracking is an
//! observability side effect: persistence failures are logged and swallowed
//! so they can never degrade a user-facing call.

use crate::error::StewardError;
use crate::storage::UsageStore;
use crate::types::{OperationType, ProviderId, TokenUsage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Immutable record of one provider attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Unique identifier
    pub id: String,
    /// User the attempt was made for
    pub user_id: String,
    /// Provider attempted
    pub provider: ProviderId,
    /// Model attempted
    pub model: String,
    /// Business operation
    pub operation: OperationType,
    /// Input tokens (0 for failures without usage data)
    pub tokens_input: u32,
    /// Output tokens
    pub tokens_output: u32,
    /// Cost in USD
    pub cost_usd: f64,
    /// Wall-clock time of the attempt in milliseconds
    pub response_time_ms: u64,
    /// Whether the attempt succeeded
    pub success: bool,
    /// Error description for failed attempts
    pub error_message: Option<String>,
    /// When the attempt completed
    pub created_at: DateTime<Utc>,
}

impl UsageRecord {
    /// Record a successful attempt
    pub fn success(
        user_id: impl Into<String>,
        provider: ProviderId,
        model: impl Into<String>,
        operation: OperationType,
        usage: TokenUsage,
        cost_usd: f64,
        response_time_ms: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            provider,
            model: model.into(),
            operation,
            tokens_input: usage.input,
            tokens_output: usage.output,
            cost_usd,
            response_time_ms,
            success: true,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    /// Record a failed attempt
    pub fn failure(
        user_id: impl Into<String>,
        provider: ProviderId,
        model: impl Into<String>,
        operation: OperationType,
        error: &StewardError,
        response_time_ms: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            provider,
            model: model.into(),
            operation,
            tokens_input: 0,
            tokens_output: 0,
            cost_usd: 0.0,
            response_time_ms,
            success: false,
            error_message: Some(error.to_string()),
            created_at: Utc::now(),
        }
    }
}

/// Appends usage records through the persistence collaborator
#[derive(Clone)]
pub struct UsageTracker {
    store: Arc<dyn UsageStore>,
}

impl UsageTracker {
    /// Create a tracker over a usage store
    pub fn new(store: Arc<dyn UsageStore>) -> Self {
        Self { store }
    }

    /// Append one record. Never raises.
    pub async fn track(&self, record: UsageRecord) {
        if let Err(err) = self.store.append(record).await {
            warn!(error = %err, "failed to persist usage record");
        }
    }
}
