//! Circuit breaker gating for remote operations
//!
//! One breaker instance exists per logical operation name (for example
//! "media-control" or "snapshot"), shared process-wide through the
//! registry so unrelated call sites see the same gate.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::error::{Error, ResilienceError};

/// Breaker state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally; consecutive failures are counted
    Closed,
    /// Calls are rejected until the recovery timeout elapses
    Open,
    /// A limited number of trial calls are admitted
    HalfOpen,
}

/// Breaker tuning knobs
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting trial calls
    pub recovery_timeout: Duration,
    /// Maximum concurrent trial calls while half-open
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
        }
    }
}

struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
}

/// Circuit breaker for a single named operation
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                half_open_in_flight: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a call may proceed right now.
    ///
    /// Transitions OPEN -> HALF_OPEN when the recovery timeout has
    /// elapsed. In HALF_OPEN, admits up to `half_open_max_calls`
    /// concurrent trials; each admitted trial must be resolved with
    /// [`on_success`](Self::on_success) or [`on_failure`](Self::on_failure).
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.recovery_timeout {
                    tracing::info!(breaker = %self.name, "circuit half-open, admitting trial call");
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_in_flight = 1;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.config.half_open_max_calls {
                    inner.half_open_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call
    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                tracing::info!(breaker = %self.name, "trial call succeeded, circuit closed");
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.half_open_in_flight = 0;
                inner.opened_at = None;
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call
    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                tracing::warn!(breaker = %self.name, "trial call failed, circuit re-opened");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.half_open_in_flight = 0;
            }
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "failure threshold reached, circuit opened"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Run `f` under the breaker.
    ///
    /// Returns [`ResilienceError::CircuitOpen`] without invoking `f` when
    /// the gate is closed to new calls.
    pub fn call<T>(&self, f: impl FnOnce() -> Result<T, Error>) -> Result<T, Error> {
        if !self.allow_request() {
            return Err(ResilienceError::CircuitOpen(self.name.clone()).into());
        }
        match f() {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(err)
            }
        }
    }
}

/// Get-or-create registry of breakers keyed by operation name
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self {
            breakers: DashMap::new(),
        }
    }

    /// Fetch the breaker for `name`, creating it with `config` on first use.
    /// The config of an existing breaker is not altered.
    pub fn get_or_create(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config)))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| Arc::clone(b.value()))
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static REGISTRY: Lazy<BreakerRegistry> = Lazy::new(BreakerRegistry::new);

/// Process-wide breaker registry.
///
/// Breakers are shared across all callers of the same logical operation;
/// everything else in the engine is instance-owned.
pub fn breaker_registry() -> &'static BreakerRegistry {
    &REGISTRY
}
