//! Resilience primitives guarding outbound provider calls: a per-provider
//! circuit breaker and an HTTP client with timeout, retry and backoff.

pub mod circuit_breaker;
pub mod http_client;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitSnapshot, CircuitState,
};
pub use http_client::{ClientError, HttpClientConfig, ResilientClient, RetryStrategy};
