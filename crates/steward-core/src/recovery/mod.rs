//! Failure-isolation and retry primitives

pub mod backoff;
pub mod circuit_breaker;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
