//! Failure classification for retry decisions
//!
//! Every operation failure counts against the breaker. A classifier only
//! decides whether the retry executor may try again (transient) or must stop
//! at once (permanent).

use std::any::Any;
use std::time::Duration;

/// Context provided to failure classifiers for error evaluation
#[derive(Debug)]
pub struct FailureContext<'a> {
    /// Circuit name
    pub circuit_name: &'a str,
    /// The error that occurred (can be downcast to specific types)
    pub error: &'a dyn Any,
    /// Duration of the failed call
    pub duration: Duration,
    /// 1-based attempt that produced the error
    pub attempt: u32,
}

/// Trait for classifying failures - determines if an error may be retried
///
/// # Examples
///
/// ```rust
/// use resilience_machines::{FailureClassifier, FailureContext};
///
/// #[derive(Debug)]
/// struct ServerErrorClassifier;
///
/// impl FailureClassifier for ServerErrorClassifier {
///     fn is_retryable(&self, ctx: &FailureContext<'_>) -> bool {
///         // Retry server errors (5xx), give up on client errors (4xx)
///         ctx.error
///             .downcast_ref::<u16>()
///             .map(|status| *status >= 500)
///             .unwrap_or(true)
///     }
/// }
/// ```
pub trait FailureClassifier: Send + Sync + std::fmt::Debug {
    /// Returns `true` for transient failures, `false` for permanent ones
    fn is_retryable(&self, ctx: &FailureContext<'_>) -> bool;
}

/// Default classifier that treats every error as transient
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl FailureClassifier for DefaultClassifier {
    fn is_retryable(&self, _ctx: &FailureContext<'_>) -> bool {
        true
    }
}

/// Predicate-based classifier using a closure
///
/// Allows using simple closures for common filtering patterns.
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
    /// Create a new predicate-based classifier
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> FailureClassifier for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn is_retryable(&self, ctx: &FailureContext<'_>) -> bool {
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

    fn context<'a>(error: &'a dyn Any, duration_ms: u64) -> FailureContext<'a> {
        FailureContext {
            circuit_name: "test",
            error,
            duration: Duration::from_millis(duration_ms),
            attempt: 1,
        }
    }

    #[test]
    fn test_default_classifier_retries_all() {
        let classifier = DefaultClassifier;

        assert!(classifier.is_retryable(&context(&"any error", 100)));
    }

    #[test]
    fn test_predicate_classifier() {
        // Give up on calls that already took too long
        let classifier =
            PredicateClassifier::new(|ctx| ctx.duration < Duration::from_secs(1));

        assert!(classifier.is_retryable(&context(&"fast error", 500)));
        assert!(!classifier.is_retryable(&context(&"slow error", 2000)));
    }

    #[test]
    fn test_error_type_downcast() {
        #[derive(Debug)]
        struct MyError {
            is_server_error: bool,
        }

        let server_error = MyError {
            is_server_error: true,
        };
        let client_error = MyError {
            is_server_error: false,
        };

        let classifier = PredicateClassifier::new(|ctx| {
            ctx.error
                .downcast_ref::<MyError>()
                .map(|e| e.is_server_error)
                .unwrap_or(true) // Retry unknown errors
        });

        assert!(classifier.is_retryable(&context(&server_error, 10)));
        assert!(!classifier.is_retryable(&context(&client_error, 10)));
    }
}
