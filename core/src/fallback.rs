//! Fallback handlers and per-call options
//!
//! A call carries up to two fallbacks: one for the breaker layer and one for
//! the retry layer. Each declares which [`FailureKind`]s it accepts; a failure
//! it does not accept passes through untouched, and the handler stays
//! available for a later failure of the same call.

use crate::circuit::BreakerState;
use crate::errors::{CallRejected, FailureKind};

/// Context provided to fallback closures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackContext {
    /// Circuit name
    pub circuit_name: String,
    /// Circuit state when the fallback was chosen
    pub state: BreakerState,
    /// Operation invocations made so far by this call
    pub attempts: u32,
}

/// The failure signal handed to a fallback
#[derive(Debug)]
pub enum Failure<E> {
    /// Retryable operation error
    Transient(E),
    /// Non-retryable operation error
    Permanent(E),
    /// Breaker refused admission
    Rejected(CallRejected),
}

impl<E> Failure<E> {
    pub fn kind(&self) -> FailureKind {
        match self {
            Failure::Transient(_) => FailureKind::Transient,
            Failure::Permanent(_) => FailureKind::Permanent,
            Failure::Rejected(_) => FailureKind::Rejected,
        }
    }

    /// The operation error, unless the call was rejected
    pub fn error(&self) -> Option<&E> {
        match self {
            Failure::Transient(e) | Failure::Permanent(e) => Some(e),
            Failure::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<&CallRejected> {
        match self {
            Failure::Rejected(rejected) => Some(rejected),
            _ => None,
        }
    }
}

/// Type alias for fallback function
pub type FallbackFn<T, E> = Box<dyn FnOnce(&FallbackContext, Failure<E>) -> Result<T, E> + Send>;

/// A fallback handler together with the failure kinds it accepts
pub struct Fallback<T, E> {
    accepts: Vec<FailureKind>,
    handler: FallbackFn<T, E>,
}

impl<T, E> Fallback<T, E> {
    pub fn new<F>(accepts: &[FailureKind], f: F) -> Self
    where
        F: FnOnce(&FallbackContext, Failure<E>) -> Result<T, E> + Send + 'static,
    {
        Self {
            accepts: accepts.to_vec(),
            handler: Box::new(f),
        }
    }

    pub fn accepts(&self, kind: FailureKind) -> bool {
        self.accepts.contains(&kind)
    }
}

impl<T, E> std::fmt::Debug for Fallback<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fallback")
            .field("accepts", &self.accepts)
            .field("handler", &"<closure>")
            .finish()
    }
}

/// Offer `failure` to the fallback in `slot`
///
/// Consumes the fallback and returns its result when it accepts the failure's
/// kind. Otherwise the fallback is left in place and the failure handed back.
pub(crate) fn dispatch<T, E>(
    slot: &mut Option<Fallback<T, E>>,
    ctx: &FallbackContext,
    failure: Failure<E>,
) -> Result<Result<T, E>, Failure<E>> {
    match slot.take() {
        Some(fallback) if fallback.accepts(failure.kind()) => {
            tracing::warn!(
                circuit = %ctx.circuit_name,
                kind = %failure.kind(),
                attempts = ctx.attempts,
                "invoking fallback"
            );
            Ok((fallback.handler)(ctx, failure))
        }
        other => {
            *slot = other;
            Err(failure)
        }
    }
}

/// Options for guarded calls
pub struct CallOptions<T, E> {
    /// Handles failures at the breaker layer; accepts rejections by default
    pub breaker_fallback: Option<Fallback<T, E>>,
    /// Handles failures the retry layer gives up on; accepts exhausted
    /// transient failures by default
    pub retry_fallback: Option<Fallback<T, E>>,
}

impl<T, E> Default for CallOptions<T, E> {
    fn default() -> Self {
        Self {
            breaker_fallback: None,
            retry_fallback: None,
        }
    }
}

impl<T, E> CallOptions<T, E> {
    /// Create new call options with no fallback
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a breaker fallback that handles rejected calls
    pub fn with_breaker_fallback<F>(self, f: F) -> Self
    where
        F: FnOnce(&FallbackContext, Failure<E>) -> Result<T, E> + Send + 'static,
    {
        self.with_breaker_fallback_for(&[FailureKind::Rejected], f)
    }

    /// Set a breaker fallback for the given failure kinds
    ///
    /// Accepting `Transient` or `Permanent` here means operation failures are
    /// handled on the attempt they happen, before any retry.
    pub fn with_breaker_fallback_for<F>(mut self, accepts: &[FailureKind], f: F) -> Self
    where
        F: FnOnce(&FallbackContext, Failure<E>) -> Result<T, E> + Send + 'static,
    {
        self.breaker_fallback = Some(Fallback::new(accepts, f));
        self
    }

    /// Set a retry fallback that handles exhausted retries
    pub fn with_retry_fallback<F>(self, f: F) -> Self
    where
        F: FnOnce(&FallbackContext, Failure<E>) -> Result<T, E> + Send + 'static,
    {
        self.with_retry_fallback_for(&[FailureKind::Transient], f)
    }

    /// Set a retry fallback for the given failure kinds
    pub fn with_retry_fallback_for<F>(mut self, accepts: &[FailureKind], f: F) -> Self
    where
        F: FnOnce(&FallbackContext, Failure<E>) -> Result<T, E> + Send + 'static,
    {
        self.retry_fallback = Some(Fallback::new(accepts, f));
        self
    }
}

/// Trait for converting into CallOptions - allows flexible call() API
pub trait IntoCallOptions<T, E> {
    type Op: FnMut() -> Result<T, E>;

    fn into_call_options(self) -> (Self::Op, CallOptions<T, E>);
}

/// Implement for plain closures
impl<T, E, F> IntoCallOptions<T, E> for F
where
    F: FnMut() -> Result<T, E>,
{
    type Op = F;

    fn into_call_options(self) -> (F, CallOptions<T, E>) {
        (self, CallOptions::default())
    }
}

/// Implement for (closure, CallOptions) tuple
impl<T, E, F> IntoCallOptions<T, E> for (F, CallOptions<T, E>)
where
    F: FnMut() -> Result<T, E>,
{
    type Op = F;

    fn into_call_options(self) -> (F, CallOptions<T, E>) {
        self
    }
}
