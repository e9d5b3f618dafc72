//! Resilience primitives: circuit breakers, retry/backoff, failure
//! boundaries and health checks.
//!
//! Everything here is pure coordination state; no I/O happens in this
//! module. The remote client and sync manager compose these around their
//! RPC and device calls.

pub mod boundary;
pub mod breaker;
pub mod health;
pub mod retry;

pub use boundary::{ErrorBoundary, FailurePolicy, TransactionBoundary, TransactionState};
pub use breaker::{breaker_registry, BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use health::{health_registry, HealthCheckRegistry, HealthReport, HealthStatus};
pub use retry::{retry, RetryPolicy, RetryStrategy};
