//! Durable provider health registry
//!
//! Cross-process mirror of the in-memory circuit breakers. Horizontally
//! scaled instances agree on provider health through this record while each
//! instance keeps its own breaker for local fast-fail. Both are updated on
//! every success/failure so they stay consistent.

use crate::error::StewardError;
use crate::storage::HealthStore;
use crate::types::ProviderId;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Consecutive failures before a provider is marked unhealthy
const UNHEALTHY_THRESHOLD: u32 = 3;
/// How long an unhealthy provider stays fenced off
const UNHEALTHY_COOLDOWN_SECS: i64 = 300;

/// Persisted health status of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Operating normally
    Healthy,
    /// Recent failures, still admitted
    Degraded,
    /// Fenced off until the cooldown passes
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Durable health record for one provider. Created lazily on first check,
/// mutated on every recorded outcome, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    /// Provider this record describes
    pub provider: ProviderId,
    /// Current status
    pub status: HealthStatus,
    /// Consecutive failures since the last success
    pub consecutive_failures: u32,
    /// Last successful call
    pub last_success_at: Option<DateTime<Utc>>,
    /// Last failed call
    pub last_failure_at: Option<DateTime<Utc>>,
    /// While set and in the future, the provider is fenced off fleet-wide
    pub circuit_open_until: Option<DateTime<Utc>>,
}

impl ProviderHealth {
    /// A fresh healthy record
    pub fn healthy(provider: ProviderId) -> Self {
        Self {
            provider,
            status: HealthStatus::Healthy,
            consecutive_failures: 0,
            last_success_at: None,
            last_failure_at: None,
            circuit_open_until: None,
        }
    }
}

/// Registry reading and writing [`ProviderHealth`] through the persistence
/// collaborator. Store failures are logged and swallowed; reads fail open so
/// an unavailable store never takes every provider out of rotation.
#[derive(Clone)]
pub struct HealthRegistry {
    store: Arc<dyn HealthStore>,
}

impl HealthRegistry {
    /// Create a registry over a health store
    pub fn new(store: Arc<dyn HealthStore>) -> Self {
        Self { store }
    }

    /// Whether a provider should be admitted to the hierarchy walk.
    ///
    /// Lazily creates a healthy record on first sight. Returns `false` while
    /// the fleet-wide circuit is open; once the cooldown elapses the provider
    /// is admitted again even while still marked unhealthy, so a successful
    /// call can reset the record. Degraded providers stay admitted so a
    /// single failure cannot fence a provider off with no path back to
    /// healthy.
    pub async fn check_health(&self, provider: &ProviderId) -> bool {
        let health = match self.store.get(provider).await {
            Ok(Some(health)) => health,
            Ok(None) => {
                let fresh = ProviderHealth::healthy(provider.clone());
                if let Err(err) = self.store.upsert(fresh).await {
                    warn!(provider = %provider, error = %err, "failed to seed health record");
                }
                return true;
            }
            Err(err) => {
                warn!(provider = %provider, error = %err, "health read failed, failing open");
                return true;
            }
        };

        if let Some(open_until) = health.circuit_open_until {
            if open_until > Utc::now() {
                return false;
            }
            // cooldown elapsed: the next call is the probe that can flip the
            // record back to healthy
            return true;
        }
        health.status != HealthStatus::Unhealthy
    }

    /// Record a successful call
    pub async fn record_success(&self, provider: &ProviderId) {
        let mut health = self
            .fetch_or_default(provider)
            .await
            .unwrap_or_else(|| ProviderHealth::healthy(provider.clone()));
        health.consecutive_failures = 0;
        health.status = HealthStatus::Healthy;
        health.circuit_open_until = None;
        health.last_success_at = Some(Utc::now());

        if let Err(err) = self.store.upsert(health).await {
            warn!(provider = %provider, error = %err, "failed to persist health success");
        }
    }

    /// Record a failed call
    pub async fn record_failure(&self, provider: &ProviderId, error: &StewardError) {
        let mut health = self
            .fetch_or_default(provider)
            .await
            .unwrap_or_else(|| ProviderHealth::healthy(provider.clone()));
        health.consecutive_failures += 1;
        health.last_failure_at = Some(Utc::now());

        if health.consecutive_failures >= UNHEALTHY_THRESHOLD {
            health.status = HealthStatus::Unhealthy;
            health.circuit_open_until =
                Some(Utc::now() + ChronoDuration::seconds(UNHEALTHY_COOLDOWN_SECS));
            warn!(
                provider = %provider,
                failures = health.consecutive_failures,
                error = %error,
                "provider marked unhealthy"
            );
        } else {
            health.status = HealthStatus::Degraded;
        }

        if let Err(err) = self.store.upsert(health).await {
            warn!(provider = %provider, error = %err, "failed to persist health failure");
        }
    }

    /// Current record for a provider, if any
    pub async fn health(&self, provider: &ProviderId) -> Option<ProviderHealth> {
        self.store.get(provider).await.ok().flatten()
    }

    async fn fetch_or_default(&self, provider: &ProviderId) -> Option<ProviderHealth> {
        match self.store.get(provider).await {
            Ok(found) => found,
            Err(err) => {
                warn!(provider = %provider, error = %err, "health read failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryHealthStore;

    fn registry() -> HealthRegistry {
        HealthRegistry::new(Arc::new(MemoryHealthStore::new()))
    }

    #[tokio::test]
    async fn first_check_seeds_healthy_record() {
        let registry = registry();
        assert!(registry.check_health(&ProviderId::OpenAi).await);

        let health = registry.health(&ProviderId::OpenAi).await.expect("seeded");
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn three_failures_fence_the_provider() {
        let registry = registry();
        let err = StewardError::provider_retryable(ProviderId::OpenAi, "503");

        registry.record_failure(&ProviderId::OpenAi, &err).await;
        registry.record_failure(&ProviderId::OpenAi, &err).await;
        assert!(registry.check_health(&ProviderId::OpenAi).await); // degraded, admitted

        registry.record_failure(&ProviderId::OpenAi, &err).await;
        assert!(!registry.check_health(&ProviderId::OpenAi).await);

        let health = registry.health(&ProviderId::OpenAi).await.expect("record");
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert!(health.circuit_open_until.is_some());
    }

    #[tokio::test]
    async fn expired_cooldown_admits_the_provider_again() {
        use crate::storage::HealthStore;

        let store = Arc::new(MemoryHealthStore::new());
        let registry = HealthRegistry::new(store.clone());

        // a provider fenced off ten minutes ago, cooldown long expired
        let mut health = ProviderHealth::healthy(ProviderId::OpenAi);
        health.status = HealthStatus::Unhealthy;
        health.consecutive_failures = 3;
        health.circuit_open_until = Some(Utc::now() - ChronoDuration::minutes(10));
        store.upsert(health).await.unwrap();

        assert!(registry.check_health(&ProviderId::OpenAi).await);

        // the probe succeeding resets the record for good
        registry.record_success(&ProviderId::OpenAi).await;
        let health = registry.health(&ProviderId::OpenAi).await.expect("record");
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.consecutive_failures, 0);
        assert!(health.circuit_open_until.is_none());
        assert!(registry.check_health(&ProviderId::OpenAi).await);
    }

    #[tokio::test]
    async fn success_clears_failures_and_cooldown() {
        let registry = registry();
        let err = StewardError::provider_retryable(ProviderId::Google, "timeout");
        for _ in 0..3 {
            registry.record_failure(&ProviderId::Google, &err).await;
        }
        assert!(!registry.check_health(&ProviderId::Google).await);

        registry.record_success(&ProviderId::Google).await;
        assert!(registry.check_health(&ProviderId::Google).await);

        let health = registry.health(&ProviderId::Google).await.expect("record");
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.consecutive_failures, 0);
        assert!(health.circuit_open_until.is_none());
        assert!(health.last_success_at.is_some());
    }
}
