//! Persistence collaborator traits
//!
//! The engine depends on its relational/keyed store only through these
//! get/set/upsert-by-key primitives. Schema ownership lives with the host
//! application; the in-memory implementations here back tests and
//! single-process deployments.

use crate::cache::CacheEntry;
use crate::error::StewardResult;
use crate::health::ProviderHealth;
use crate::types::{AiResponse, ChatMessage, ProviderId};
use crate::usage::UsageRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Keyed store for durable provider health records
#[async_trait]
pub trait HealthStore: Send + Sync {
    /// Fetch the record for a provider
    async fn get(&self, provider: &ProviderId) -> StewardResult<Option<ProviderHealth>>;
    /// Insert or replace the record for a provider
    async fn upsert(&self, health: ProviderHealth) -> StewardResult<()>;
}

/// Keyed store for cached responses
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch an entry by cache key
    async fn get(&self, key: &str) -> StewardResult<Option<CacheEntry>>;
    /// Insert or replace an entry
    async fn put(&self, entry: CacheEntry) -> StewardResult<()>;
    /// Bump the hit counter for an entry
    async fn increment_hits(&self, key: &str) -> StewardResult<()>;
}

/// Append-only store for usage records
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Append one record; records are never mutated or deleted
    async fn append(&self, record: UsageRecord) -> StewardResult<()>;
    /// Records created within `[start, end)`, optionally for one user
    async fn in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        user_id: Option<&str>,
    ) -> StewardResult<Vec<UsageRecord>>;
}

/// Optional store for conversation history keyed by session
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append one request/response exchange to a session
    async fn append_exchange(
        &self,
        session_id: &str,
        messages: &[ChatMessage],
        response: &AiResponse,
    ) -> StewardResult<()>;
}

/// In-memory health store
#[derive(Debug, Default)]
pub struct MemoryHealthStore {
    records: RwLock<HashMap<ProviderId, ProviderHealth>>,
}

impl MemoryHealthStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HealthStore for MemoryHealthStore {
    async fn get(&self, provider: &ProviderId) -> StewardResult<Option<ProviderHealth>> {
        Ok(self.records.read().await.get(provider).cloned())
    }

    async fn upsert(&self, health: ProviderHealth) -> StewardResult<()> {
        self.records
            .write()
            .await
            .insert(health.provider.clone(), health);
        Ok(())
    }
}

/// In-memory cache store
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCacheStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired included
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> StewardResult<Option<CacheEntry>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, entry: CacheEntry) -> StewardResult<()> {
        self.entries
            .write()
            .await
            .insert(entry.cache_key.clone(), entry);
        Ok(())
    }

    async fn increment_hits(&self, key: &str) -> StewardResult<()> {
        if let Some(entry) = self.entries.write().await.get_mut(key) {
            entry.hit_count += 1;
        }
        Ok(())
    }
}

/// In-memory append-only usage store
#[derive(Debug, Default)]
pub struct MemoryUsageStore {
    records: RwLock<Vec<UsageRecord>>,
}

impl MemoryUsageStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// All records, in append order
    pub async fn all(&self) -> Vec<UsageRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    async fn append(&self, record: UsageRecord) -> StewardResult<()> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        user_id: Option<&str>,
    ) -> StewardResult<Vec<UsageRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.created_at >= start && r.created_at < end)
            .filter(|r| user_id.map_or(true, |u| r.user_id == u))
            .cloned()
            .collect())
    }
}

/// In-memory conversation store
#[derive(Debug, Default)]
pub struct MemoryConversationStore {
    sessions: RwLock<HashMap<String, Vec<(Vec<ChatMessage>, AiResponse)>>>,
}

impl MemoryConversationStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of exchanges recorded for a session
    pub async fn exchange_count(&self, session_id: &str) -> usize {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn append_exchange(
        &self,
        session_id: &str,
        messages: &[ChatMessage],
        response: &AiResponse,
    ) -> StewardResult<()> {
        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .push((messages.to_vec(), response.clone()));
        Ok(())
    }
}
