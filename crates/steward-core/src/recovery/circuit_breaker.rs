//! Per-provider circuit breaker
//!
//! One breaker instance per provider, owned by the dispatcher; breakers
//! never share counters. State is per-process: across a fleet, agreement on
//! provider health comes from the durable health registry, the breaker only
//! provides local sub-millisecond fast-fail.

use crate::error::{StewardError, StewardResult};
use crate::types::ProviderId;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, calls pass through
    Closed,
    /// Calls are rejected without invoking the wrapped operation
    Open,
    /// A single probe call is allowed through
    HalfOpen,
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// How long the circuit stays open before allowing a probe
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Snapshot of breaker state for diagnostics
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures observed
    pub failure_count: u32,
    /// When the last failure happened
    pub last_failure: Option<Instant>,
    /// When an open circuit next allows a probe
    pub next_attempt: Option<Instant>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    next_attempt: Option<Instant>,
    /// A half-open circuit admits exactly one probe at a time
    probe_in_flight: bool,
}

/// Circuit breaker protecting one provider
#[derive(Debug)]
pub struct CircuitBreaker {
    provider: ProviderId,
    config: CircuitBreakerConfig,
    // check-then-update must be a single critical section so concurrent
    // bursts cannot under-count failures or double-admit probes
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker with the default config
    pub fn new(provider: ProviderId) -> Self {
        Self::with_config(provider, CircuitBreakerConfig::default())
    }

    /// Create a breaker with a custom config
    pub fn with_config(provider: ProviderId, config: CircuitBreakerConfig) -> Self {
        Self {
            provider,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                next_attempt: None,
                probe_in_flight: false,
            }),
        }
    }

    /// The provider this breaker guards
    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    /// Whether the circuit is currently rejecting calls
    pub async fn is_open(&self) -> bool {
        let inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Open => match inner.next_attempt {
                // past the recovery deadline the next call is a probe
                Some(at) => Instant::now() < at,
                None => true,
            },
            _ => false,
        }
    }

    /// Current consecutive failure count
    pub async fn failure_count(&self) -> u32 {
        self.inner.lock().await.failure_count
    }

    /// Snapshot for diagnostics
    pub async fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock().await;
        CircuitBreakerStats {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure: inner.last_failure,
            next_attempt: inner.next_attempt,
        }
    }

    /// Execute an operation under breaker protection.
    ///
    /// Rejects with [`StewardError::CircuitOpen`] while open. On operation
    /// failure the original error is returned unchanged so the caller can
    /// classify it as retryable or fatal.
    pub async fn call<T, F, Fut>(&self, operation: F) -> StewardResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StewardResult<T>>,
    {
        self.acquire().await?;

        match operation().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(err) => {
                self.record_failure().await;
                Err(err)
            }
        }
    }

    /// Admit a call or reject with a circuit-open error
    async fn acquire(&self) -> StewardResult<()> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let now = Instant::now();
                match inner.next_attempt {
                    Some(at) if now >= at => {
                        inner.state = CircuitState::HalfOpen;
                        inner.probe_in_flight = true;
                        info!(provider = %self.provider, "circuit half-open, admitting probe");
                        Ok(())
                    }
                    _ => Err(StewardError::CircuitOpen(self.provider.clone())),
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(StewardError::CircuitOpen(self.provider.clone()))
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Record a successful call
    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.next_attempt = None;
                inner.probe_in_flight = false;
                info!(provider = %self.provider, "circuit closed after successful probe");
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call
    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.next_attempt = Some(Instant::now() + self.config.recovery_timeout);
                    warn!(
                        provider = %self.provider,
                        failures = inner.failure_count,
                        "circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.next_attempt = Some(Instant::now() + self.config.recovery_timeout);
                inner.probe_in_flight = false;
                warn!(provider = %self.provider, "probe failed, circuit re-opened");
            }
            CircuitState::Open => {}
        }
    }
}
