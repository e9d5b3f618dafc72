//! Retry strategies with constant or exponential backoff
//!
//! Delays are computed from the 1-based attempt number; exponential
//! strategies optionally apply a uniform jitter in [0.8, 1.2] so that
//! many clients recovering at once do not retry in lockstep.

use std::time::Duration;

use rand::Rng;

use crate::error::{Error, ResilienceError};

/// Backoff curve for retried operations
#[derive(Debug, Clone)]
pub enum RetryStrategy {
    /// Fixed delay between attempts
    Constant { delay: Duration },
    /// `min(initial * factor^(attempt-1), max)`, optionally jittered
    Exponential {
        initial: Duration,
        factor: f64,
        max: Duration,
        jitter: bool,
    },
}

impl RetryStrategy {
    pub fn constant(delay: Duration) -> Self {
        Self::Constant { delay }
    }

    pub fn exponential(initial: Duration, factor: f64, max: Duration) -> Self {
        Self::Exponential {
            initial,
            factor,
            max,
            jitter: true,
        }
    }

    pub fn without_jitter(self) -> Self {
        match self {
            Self::Exponential {
                initial,
                factor,
                max,
                ..
            } => Self::Exponential {
                initial,
                factor,
                max,
                jitter: false,
            },
            other => other,
        }
    }

    /// Delay before the given attempt (1-based).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Constant { delay } => *delay,
            Self::Exponential {
                initial,
                factor,
                max,
                jitter,
            } => {
                let exponent = attempt.saturating_sub(1);
                let raw = initial.as_secs_f64() * factor.powi(exponent as i32);
                let capped = raw.min(max.as_secs_f64());
                let scaled = if *jitter {
                    capped * jitter_factor()
                } else {
                    capped
                };
                // Jitter may push the delay past the cap; the cap wins.
                Duration::from_secs_f64(scaled.min(max.as_secs_f64()))
            }
        }
    }
}

/// Uniform jitter multiplier in [0.8, 1.2]
pub(crate) fn jitter_factor() -> f64 {
    rand::thread_rng().gen_range(0.8..=1.2)
}

/// Policy for the [`retry`] wrapper
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub strategy: RetryStrategy,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, strategy: RetryStrategy) -> Self {
        Self {
            max_retries,
            strategy,
        }
    }
}

/// Re-invoke `f` until it succeeds, a non-retryable error occurs, or
/// `max_retries` additional attempts are exhausted.
///
/// Sleeps `strategy.next_delay(attempt)` between attempts. On exhaustion
/// the last underlying cause is carried inside
/// [`ResilienceError::RetriesExhausted`].
pub fn retry<T>(
    policy: &RetryPolicy,
    retryable: impl Fn(&Error) -> bool,
    mut f: impl FnMut() -> Result<T, Error>,
) -> Result<T, Error> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match f() {
            Ok(value) => return Ok(value),
            // Non-retryable errors always propagate as themselves, even
            // when they land on the final attempt
            Err(err) if !retryable(&err) => return Err(err),
            Err(err) if attempt > policy.max_retries => {
                return Err(ResilienceError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                }
                .into());
            }
            Err(err) => {
                let delay = policy.strategy.next_delay(attempt);
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after failure"
                );
                std::thread::sleep(delay);
            }
        }
    }
}
