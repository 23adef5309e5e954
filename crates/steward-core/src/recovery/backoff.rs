//! Exponential backoff for per-provider retries

use std::time::Duration;

/// Configuration for backoff behavior
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Cap on the computed delay
    pub max_delay: Duration,
    /// Multiplier applied per attempt
    pub multiplier: f64,
    /// Add random jitter to prevent synchronized retries
    pub jitter: bool,
    /// Maximum jitter ratio (0.0 - 1.0)
    pub jitter_ratio: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
            jitter_ratio: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Create a config with a custom base delay
    pub fn with_base_delay(base_delay: Duration) -> Self {
        Self {
            base_delay,
            ..Default::default()
        }
    }

    /// Disable jitter (deterministic delays, mainly for tests)
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }
}

/// Exponential backoff: `delay = base * multiplier^attempt`, capped
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ExponentialBackoff {
    /// Create a backoff sequence with the default config
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    /// Create a backoff sequence with a custom config
    pub fn with_config(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay for a given attempt number (0-indexed), without advancing
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay.as_secs_f64() * self.config.multiplier.powi(attempt as i32);
        let capped = base.min(self.config.max_delay.as_secs_f64());
        self.add_jitter(Duration::from_secs_f64(capped))
    }

    /// Get the next delay and advance the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for_attempt(self.attempt);
        self.attempt += 1;
        delay
    }

    /// Reset the attempt counter
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    fn add_jitter(&self, delay: Duration) -> Duration {
        if !self.config.jitter {
            return delay;
        }
        let range = delay.as_secs_f64() * self.config.jitter_ratio;
        Duration::from_secs_f64((delay.as_secs_f64() + rand_jitter(range)).max(0.0))
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Pseudo-random jitter in `[-range/2, range/2]` derived from the monotonic
/// clock, avoiding a dependency on a full RNG crate.
fn rand_jitter(range: f64) -> f64 {
    use std::hash::{Hash, Hasher};

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::time::Instant::now().hash(&mut hasher);
    let unit = (hasher.finish() % 1_000) as f64 / 1_000.0;
    (unit - 0.5) * range
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_per_attempt() {
        let backoff = ExponentialBackoff::with_config(
            BackoffConfig::with_base_delay(Duration::from_millis(1000)).without_jitter(),
        );
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(4000));
    }

    #[test]
    fn delays_are_capped() {
        let config = BackoffConfig {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: false,
            jitter_ratio: 0.0,
        };
        let backoff = ExponentialBackoff::with_config(config);
        assert_eq!(backoff.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn next_delay_advances() {
        let mut backoff = ExponentialBackoff::with_config(
            BackoffConfig::with_base_delay(Duration::from_millis(100)).without_jitter(),
        );
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_in_range() {
        let backoff = ExponentialBackoff::with_config(BackoffConfig {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
            jitter_ratio: 0.2,
        });
        for attempt in 0..5 {
            let delay = backoff.delay_for_attempt(attempt).as_secs_f64();
            let nominal = (2.0f64).powi(attempt as i32);
            assert!(delay >= nominal * 0.9 && delay <= nominal * 1.1);
        }
    }
}
