//! Content-addressed response cache
//!
//! Responses are keyed by a SHA-256 hash over a canonical serialization of
//! `(operation, messages)`, so semantically identical requests collide
//! regardless of which feature issued them. TTLs are table-driven by
//! operation type. Expired entries become unreadable but are not eagerly
//! deleted; replacement happens on the next store for the same key.

pub mod hit_rate;

pub use hit_rate::HitRateTracker;

use crate::config::TtlTable;
use crate::error::StewardResult;
use crate::storage::CacheStore;
use crate::types::{AiResponse, ChatMessage, OperationType, ProviderId};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

/// Persisted cache entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Content-addressed key (primary key)
    pub cache_key: String,
    /// Operation the response was produced for
    pub operation: OperationType,
    /// The stored response
    pub response: AiResponse,
    /// Provider that produced the response
    pub provider: ProviderId,
    /// Model that produced the response
    pub model: String,
    /// Entries are never served past this instant
    pub expires_at: DateTime<Utc>,
    /// Number of times the entry was served
    pub hit_count: u64,
    /// When the entry was stored
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Whether the entry may no longer be served
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

#[derive(Serialize)]
struct KeyMaterial<'a> {
    operation: &'a str,
    messages: &'a [ChatMessage],
}

/// Stable content hash for a request. Serde serializes struct fields in
/// declaration order, so the serialization is deterministic.
pub fn cache_key(messages: &[ChatMessage], operation: OperationType) -> StewardResult<String> {
    let material = KeyMaterial {
        operation: operation.as_str(),
        messages,
    };
    let bytes = serde_json::to_vec(&material)?;
    let digest = Sha256::digest(&bytes);
    Ok(format!("{digest:x}"))
}

/// Response cache over the persistence collaborator.
///
/// Reads and writes are best-effort: store failures are logged and the
/// request proceeds as a miss, since caching is a cost optimization, not a
/// correctness requirement.
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    ttls: TtlTable,
    hit_rates: HitRateTracker,
}

impl ResponseCache {
    /// Create a cache over a store with a TTL table
    pub fn new(store: Arc<dyn CacheStore>, ttls: TtlTable) -> Self {
        Self {
            store,
            ttls,
            hit_rates: HitRateTracker::new(),
        }
    }

    /// Look up a live entry. A hit bumps the stored hit counter and returns
    /// the response re-stamped as cached (`cost = 0`, `response_time_ms = 0`).
    pub async fn lookup(&self, key: &str, operation: OperationType) -> Option<AiResponse> {
        let entry = match self.store.get(key).await {
            Ok(Some(entry)) if !entry.is_expired() => entry,
            Ok(_) => {
                self.hit_rates.record_miss(operation);
                return None;
            }
            Err(err) => {
                warn!(error = %err, "cache read failed, treating as miss");
                self.hit_rates.record_miss(operation);
                return None;
            }
        };

        if let Err(err) = self.store.increment_hits(key).await {
            warn!(error = %err, "failed to bump cache hit count");
        }
        self.hit_rates.record_hit(operation);
        debug!(operation = %operation, hits = entry.hit_count + 1, "cache hit");
        Some(entry.response.into_cached())
    }

    /// Store a response under its content key, replacing any previous entry
    pub async fn store(&self, key: &str, operation: OperationType, response: &AiResponse) {
        let ttl = self.ttls.ttl_for(operation);
        let ttl = match ChronoDuration::from_std(ttl) {
            Ok(ttl) => ttl,
            Err(_) => {
                warn!(operation = %operation, "cache TTL out of range, skipping store");
                return;
            }
        };
        let now = Utc::now();
        let entry = CacheEntry {
            cache_key: key.to_string(),
            operation,
            response: response.clone(),
            provider: response.provider.clone(),
            model: response.model.clone(),
            expires_at: now + ttl,
            hit_count: 0,
            created_at: now,
        };

        if let Err(err) = self.store.put(entry).await {
            warn!(error = %err, "cache write failed");
        }
    }

    /// Trailing-window hit rate for an operation
    pub fn hit_rate(&self, operation: OperationType) -> f64 {
        self.hit_rates.hit_rate(operation)
    }
}
