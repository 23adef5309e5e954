//! Sliding-window rate limiter for provider calls
//!
//! Keyed by `(provider, user)`. Entries older than the window are pruned
//! lazily on each check; a periodic sweep (owned by the dispatcher
//! lifecycle) drops keys with empty windows so memory stays bounded.
//! Enforcement is per-process: under horizontal scaling each instance
//! limits independently.

use crate::types::ProviderId;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Default per-user limit for providers without an explicit entry
const DEFAULT_REQUESTS_PER_MINUTE: u32 = 50;

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Seconds until capacity frees, set when denied
    pub retry_after_secs: Option<u64>,
}

impl RateLimitDecision {
    fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after_secs: None,
        }
    }

    fn denied(retry_after_secs: u64) -> Self {
        Self {
            allowed: false,
            retry_after_secs: Some(retry_after_secs),
        }
    }
}

/// Sliding-window request throttle
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    window: Duration,
    limits: HashMap<ProviderId, u32>,
    // check-then-append is one critical section so concurrent bursts
    // cannot under-count the window
    windows: Mutex<HashMap<(ProviderId, String), VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    /// Create a limiter with per-provider request limits
    pub fn new(window: Duration, limits: HashMap<ProviderId, u32>) -> Self {
        Self {
            window,
            limits,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Limit for a provider
    pub fn limit_for(&self, provider: &ProviderId) -> u32 {
        self.limits
            .get(provider)
            .copied()
            .unwrap_or(DEFAULT_REQUESTS_PER_MINUTE)
    }

    /// Admission check for one request. Allowed requests are counted
    /// immediately; denied requests carry a retry-after hint.
    pub async fn check(&self, provider: &ProviderId, user_id: &str) -> RateLimitDecision {
        let limit = self.limit_for(provider) as usize;
        let now = Instant::now();

        let mut windows = self.windows.lock().await;
        let timestamps = windows
            .entry((provider.clone(), user_id.to_string()))
            .or_default();

        while let Some(oldest) = timestamps.front() {
            if now.duration_since(*oldest) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() >= limit {
            // capacity frees when the oldest timestamp leaves the window
            let retry_after = match timestamps.front() {
                Some(oldest) => {
                    let free_at = *oldest + self.window;
                    free_at.saturating_duration_since(now).as_secs_f64().ceil() as u64
                }
                None => 1,
            };
            debug!(
                provider = %provider,
                user = user_id,
                retry_after,
                "rate limit denied"
            );
            return RateLimitDecision::denied(retry_after.max(1));
        }

        timestamps.push_back(now);
        RateLimitDecision::allowed()
    }

    /// Drop keys whose windows emptied out. Called periodically by the
    /// dispatcher's sweep task.
    pub async fn sweep(&self) {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        windows.retain(|_, timestamps| {
            while let Some(oldest) = timestamps.front() {
                if now.duration_since(*oldest) >= self.window {
                    timestamps.pop_front();
                } else {
                    break;
                }
            }
            !timestamps.is_empty()
        });
    }

    /// Number of tracked `(provider, user)` keys
    pub async fn tracked_keys(&self) -> usize {
        self.windows.lock().await.len()
    }
}
