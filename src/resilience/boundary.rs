//! Scoped failure capture
//!
//! `ErrorBoundary` wraps a fallible region and converts whatever escapes
//! it into a single typed failure tagged with the boundary name and the
//! elapsed time. `TransactionBoundary` additionally hands the closure a
//! mutable transaction state and invokes a rollback hook on failure.

use std::time::Instant;

use crate::error::Error;

/// What an [`ErrorBoundary`] does with a captured failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Re-raise the tagged error to the caller
    Propagate,
    /// Log and swallow; the caller sees `Ok(None)`
    BestEffort,
}

/// Named boundary around a fallible region
pub struct ErrorBoundary {
    name: String,
    policy: FailurePolicy,
}

impl ErrorBoundary {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: FailurePolicy::Propagate,
        }
    }

    pub fn on_error(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Execute `f` inside the boundary.
    ///
    /// A failure is tagged with the boundary name and elapsed time; the
    /// policy decides whether it propagates or is logged and swallowed.
    pub fn run<T>(&self, f: impl FnOnce() -> Result<T, Error>) -> Result<Option<T>, Error> {
        let started = Instant::now();
        match f() {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                let tagged = Error::Boundary {
                    name: self.name.clone(),
                    elapsed: started.elapsed(),
                    source: Box::new(err),
                };
                match self.policy {
                    FailurePolicy::Propagate => Err(tagged),
                    FailurePolicy::BestEffort => {
                        tracing::warn!(boundary = %self.name, error = %tagged, "boundary failure swallowed");
                        Ok(None)
                    }
                }
            }
        }
    }
}

/// Ordered record of steps completed inside a transaction boundary,
/// handed to the rollback hook so it knows what to undo.
#[derive(Debug, Default)]
pub struct TransactionState {
    completed: Vec<String>,
}

impl TransactionState {
    pub fn mark(&mut self, step: impl Into<String>) {
        self.completed.push(step.into());
    }

    /// Completed steps, newest last
    pub fn completed(&self) -> &[String] {
        &self.completed
    }
}

/// Boundary that invokes a rollback hook before re-raising a failure
pub struct TransactionBoundary {
    name: String,
}

impl TransactionBoundary {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Run `f` with a transaction-state handle. On failure, `on_error`
    /// receives the error together with the steps completed so far, and
    /// the tagged error then propagates.
    pub fn run<T>(
        &self,
        f: impl FnOnce(&mut TransactionState) -> Result<T, Error>,
        on_error: impl FnOnce(&Error, &TransactionState),
    ) -> Result<T, Error> {
        let started = Instant::now();
        let mut state = TransactionState::default();
        match f(&mut state) {
            Ok(value) => Ok(value),
            Err(err) => {
                tracing::warn!(
                    transaction = %self.name,
                    completed = state.completed.len(),
                    error = %err,
                    "transaction failed, rolling back"
                );
                on_error(&err, &state);
                Err(Error::Boundary {
                    name: self.name.clone(),
                    elapsed: started.elapsed(),
                    source: Box::new(err),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectionError;
    use std::cell::RefCell;

    #[test]
    fn propagating_boundary_tags_error() {
        let boundary = ErrorBoundary::new("source-refresh");
        let result: Result<Option<()>, Error> =
            boundary.run(|| Err(ConnectionError::Timeout.into()));

        match result {
            Err(Error::Boundary { name, source, .. }) => {
                assert_eq!(name, "source-refresh");
                assert!(matches!(*source, Error::Connection(ConnectionError::Timeout)));
            }
            other => panic!("expected tagged boundary error, got {other:?}"),
        }
    }

    #[test]
    fn best_effort_boundary_swallows() {
        let boundary = ErrorBoundary::new("event-pump").on_error(FailurePolicy::BestEffort);
        let result = boundary.run(|| Err::<(), _>(ConnectionError::Timeout.into()));
        assert!(matches!(result, Ok(None)));

        let ok = boundary.run(|| Ok(7));
        assert!(matches!(ok, Ok(Some(7))));
    }

    #[test]
    fn transaction_rolls_back_completed_steps() {
        let rolled_back: RefCell<Vec<String>> = RefCell::new(Vec::new());

        let boundary = TransactionBoundary::new("start-capture");
        let result: Result<(), Error> = boundary.run(
            |tx| {
                tx.mark("connect");
                tx.mark("audio-start");
                Err(ConnectionError::Closed.into())
            },
            |_err, state| {
                rolled_back
                    .borrow_mut()
                    .extend(state.completed().iter().cloned());
            },
        );

        assert!(result.is_err());
        assert_eq!(*rolled_back.borrow(), vec!["connect", "audio-start"]);
    }

    #[test]
    fn transaction_success_skips_rollback() {
        let boundary = TransactionBoundary::new("noop");
        let result = boundary.run(
            |tx| {
                tx.mark("only-step");
                Ok(5)
            },
            |_, _| panic!("rollback must not run on success"),
        );
        assert_eq!(result.unwrap(), 5);
    }
}
