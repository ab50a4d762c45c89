//! Error types for guarded calls, retries and configuration

use crate::circuit::BreakerState;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Classification of a failure signal, used to route it to a fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Retryable operation failure; counted by the breaker
    Transient,
    /// Non-retryable operation failure; counted by the breaker
    Permanent,
    /// The breaker refused admission; never counted
    Rejected,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Transient => f.write_str("transient"),
            FailureKind::Permanent => f.write_str("permanent"),
            FailureKind::Rejected => f.write_str("rejected"),
        }
    }
}

/// The breaker refused to admit a call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit '{circuit}' is {state}, call not permitted ({elapsed:?} in state)")]
pub struct CallRejected {
    pub circuit: String,
    pub state: BreakerState,
    /// Time spent in `state` when the call was refused
    pub elapsed: Duration,
}

/// Errors from a single breaker-guarded call
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// Circuit refused the call and no fallback accepted the rejection
    #[error(transparent)]
    Rejected(#[from] CallRejected),
    /// The wrapped operation failed and no fallback accepted the failure
    #[error("circuit execution failed: {0}")]
    Execution(E),
    /// The breaker fallback itself failed
    #[error("breaker fallback failed: {0}")]
    Fallback(E),
}

/// Which fallback layer produced a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackLayer {
    Breaker,
    Retry,
}

impl fmt::Display for FallbackLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackLayer::Breaker => f.write_str("breaker"),
            FallbackLayer::Retry => f.write_str("retry"),
        }
    }
}

/// Terminal errors of a retried, breaker-guarded execution
#[derive(Debug, Error)]
pub enum ResilienceError<E> {
    /// Circuit refused admission and no fallback accepted the rejection
    #[error(transparent)]
    Rejected(#[from] CallRejected),
    /// Non-retryable failure, propagated on the attempt it happened
    #[error("permanent failure: {0}")]
    Permanent(E),
    /// Every attempt failed and no retry fallback accepted the last failure
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
    /// A fallback handler itself failed; never retried or handled further
    #[error("{layer} fallback failed: {error}")]
    Fallback { layer: FallbackLayer, error: E },
    /// The resource's configuration could not be resolved
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl<E> ResilienceError<E> {
    /// The operation or fallback error, if this variant carries one
    pub fn into_inner(self) -> Option<E> {
        match self {
            ResilienceError::Permanent(e)
            | ResilienceError::Exhausted { last: e, .. }
            | ResilienceError::Fallback { error: e, .. } => Some(e),
            ResilienceError::Rejected(_) | ResilienceError::Config(_) => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, ResilienceError::Rejected(_))
    }
}

/// Invalid or unreadable resilience configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("no configuration for resource '{0}'")]
    UnknownResource(String),
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_rejected_display() {
        let rejected = CallRejected {
            circuit: "payments".to_string(),
            state: BreakerState::Open,
            elapsed: Duration::from_millis(1500),
        };

        let message = rejected.to_string();
        assert!(message.contains("payments"));
        assert!(message.contains("OPEN"));
    }

    #[test]
    fn test_resilience_error_into_inner() {
        let exhausted: ResilienceError<&str> = ResilienceError::Exhausted {
            attempts: 3,
            last: "timeout",
        };
        assert_eq!(exhausted.into_inner(), Some("timeout"));

        let rejected: ResilienceError<&str> = CallRejected {
            circuit: "payments".to_string(),
            state: BreakerState::HalfOpen,
            elapsed: Duration::ZERO,
        }
        .into();
        assert!(rejected.is_rejected());
        assert_eq!(rejected.into_inner(), None);
    }

    #[test]
    fn test_fallback_error_names_layer() {
        let error: ResilienceError<String> = ResilienceError::Fallback {
            layer: FallbackLayer::Retry,
            error: "cache miss".to_string(),
        };
        assert_eq!(error.to_string(), "retry fallback failed: cache miss");
    }
}
