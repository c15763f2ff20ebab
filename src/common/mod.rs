//! Shared resilience utilities
//!
//! - Circuit breaker for exchange requests
//! - Token bucket rate limiter
//! - Linear backoff schedules for reconnection and retry loops

pub mod backoff;
pub mod circuit_breaker;
pub mod rate_limiter;

pub use backoff::{LinearBackoff, ReconnectPolicy, ReconnectState};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use rate_limiter::RateLimiter;
