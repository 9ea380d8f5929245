//! Failure classification for the circuit breaker
//!
//! A classifier decides whether a failed call counts against the circuit.
//! Calls it rejects are not recorded at all: they neither raise the error
//! rate nor count as successes.

use crate::errors::Error;
use std::time::Duration;

/// What a classifier gets to look at
#[derive(Debug)]
pub struct FailureContext<'a> {
    pub circuit_name: &'a str,
    /// Use [`Error::execution_source`] to downcast the unit's own error
    pub error: &'a Error,
    pub duration: Duration,
}

pub trait FailureClassifier: Send + Sync + std::fmt::Debug {
    /// `true` if this failure should count toward opening the circuit
    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool;
}

/// Counts every error, policy errors from inner runners included
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl FailureClassifier for DefaultClassifier {
    fn should_trip(&self, _ctx: &FailureContext<'_>) -> bool {
        true
    }
}

/// Classifier backed by a closure
pub struct PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    predicate: F,
}

impl<F> PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> FailureClassifier for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool {
        (self.predicate)(ctx)
    }
}

impl<F> std::fmt::Debug for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateClassifier")
            .field("predicate", &"<closure>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    enum HttpError {
        Status(u16),
    }

    impl std::fmt::Display for HttpError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                HttpError::Status(code) => write!(f, "status {code}"),
            }
        }
    }

    impl std::error::Error for HttpError {}

    fn server_errors_only() -> impl FailureClassifier {
        PredicateClassifier::new(|ctx| {
            ctx.error
                .execution_source()
                .and_then(|e| e.downcast_ref::<HttpError>())
                .map(|HttpError::Status(code)| *code >= 500)
                .unwrap_or(true)
        })
    }

    fn ctx(error: &Error) -> FailureContext<'_> {
        FailureContext {
            circuit_name: "api",
            error,
            duration: Duration::ZERO,
        }
    }

    #[test]
    fn test_default_classifier_trips_all() {
        let error = Error::Timeout;
        let ctx = FailureContext {
            circuit_name: "test",
            error: &error,
            duration: Duration::from_millis(100),
        };

        assert!(DefaultClassifier.should_trip(&ctx));
    }

    #[test]
    fn test_predicate_classifier_on_duration() {
        let classifier = PredicateClassifier::new(|ctx| ctx.duration > Duration::from_secs(1));
        let error = Error::execution("slow");

        let fast = FailureContext {
            circuit_name: "test",
            error: &error,
            duration: Duration::from_millis(500),
        };
        let slow = FailureContext {
            circuit_name: "test",
            error: &error,
            duration: Duration::from_secs(2),
        };

        assert!(!classifier.should_trip(&fast));
        assert!(classifier.should_trip(&slow));
    }

    #[test]
    fn test_predicate_classifier_downcasts_execution_error() {
        let classifier = server_errors_only();
        let client = Error::execution(HttpError::Status(404));
        let server = Error::execution(HttpError::Status(503));
        let policy = Error::Timeout;

        assert!(!classifier.should_trip(&ctx(&client)));
        assert!(classifier.should_trip(&ctx(&server)));
        assert!(classifier.should_trip(&ctx(&policy)));
    }
}
