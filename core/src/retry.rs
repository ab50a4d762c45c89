//! Retry executor wrapped around a circuit breaker
//!
//! The retry loop is the outer layer: every attempt asks the breaker for
//! admission, and a rejection ends the loop immediately without consuming an
//! attempt. Operation failures are recorded by the breaker first, then offered
//! to the breaker fallback, and only then classified for retry.

use crate::{
    circuit::CircuitBreaker,
    classifier::{FailureClassifier, FailureContext},
    errors::{ConfigError, FallbackLayer, ResilienceError},
    fallback::{CallOptions, Failure, Fallback, FallbackContext, IntoCallOptions, dispatch},
    window::OutcomeKind,
};
use serde::Deserialize;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// Delay schedule between attempts
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every retry
    Fixed {
        #[serde(rename = "delay_ms", deserialize_with = "crate::config::duration_ms")]
        delay: Duration,
    },
    /// `base_delay * multiplier^n`, capped at `max_delay`
    Exponential {
        #[serde(rename = "base_delay_ms", deserialize_with = "crate::config::duration_ms")]
        base_delay: Duration,
        #[serde(default = "default_multiplier")]
        multiplier: f64,
        #[serde(rename = "max_delay_ms", deserialize_with = "crate::config::duration_ms")]
        max_delay: Duration,
    },
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed {
            delay: Duration::from_millis(500),
        }
    }
}

impl Backoff {
    /// Delay to wait after the given 1-based failed attempt
    ///
    /// `jitter_factor` follows chrono-machines:
    /// `delay * (1 - jitter + rand * jitter)`.
    pub fn delay_for(&self, attempt: u32, jitter_factor: f64) -> Duration {
        let (base_delay_ms, multiplier, max_delay_ms) = match *self {
            Backoff::Fixed { delay } => {
                let ms = delay.as_millis() as u64;
                (ms, 1.0, ms)
            }
            Backoff::Exponential {
                base_delay,
                multiplier,
                max_delay,
            } => (
                base_delay.as_millis() as u64,
                multiplier,
                max_delay.as_millis() as u64,
            ),
        };
        if max_delay_ms == 0 {
            return Duration::ZERO;
        }

        // Policy counts attempts in a u8; later attempts reuse the last exponent
        let attempt = attempt.clamp(1, u8::MAX as u32) as u8;
        let policy = chrono_machines::Policy {
            max_attempts: attempt,
            base_delay_ms,
            multiplier,
            max_delay_ms,
        };
        let delay_ms = policy.calculate_delay(attempt, jitter_factor);
        Duration::from_millis(delay_ms as u64)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Backoff::Exponential {
            base_delay,
            multiplier,
            max_delay,
        } = *self
        {
            if !(multiplier >= 1.0) {
                return Err(ConfigError::invalid(
                    "backoff.multiplier",
                    "must be at least 1.0",
                ));
            }
            if max_delay < base_delay {
                return Err(ConfigError::invalid(
                    "backoff.max_delay_ms",
                    "must not be below base_delay_ms",
                ));
            }
        }
        Ok(())
    }
}

/// Retry configuration for one resource
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// 0.0 = no jitter, 1.0 = full jitter
    pub jitter_factor: f64,
    /// Decides which failures are transient; every failure is when unset
    #[serde(skip)]
    pub classifier: Option<Arc<dyn FailureClassifier>>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
            jitter_factor: 0.0,
            classifier: None,
        }
    }
}

impl RetryConfig {
    pub fn with_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::invalid(
                "jitter_factor",
                "must be between 0.0 and 1.0",
            ));
        }
        self.backoff.validate()
    }

    /// Delay to wait after the given 1-based failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.delay_for(attempt, self.jitter_factor)
    }

    pub fn is_retryable(&self, ctx: &FailureContext<'_>) -> bool {
        self.classifier
            .as_ref()
            .is_none_or(|classifier| classifier.is_retryable(ctx))
    }
}

/// Per-execution attempt bookkeeping
///
/// `attempt` counts consecutive failed invocations of the current execution
/// and goes back to 0 on success or when the retry fallback takes over.
/// `invocations` counts every time the operation actually ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptContext {
    attempt: u32,
    invocations: u32,
}

impl AttemptContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn invocations(&self) -> u32 {
        self.invocations
    }
}

/// Runs one operation through a breaker with retries and fallbacks
#[derive(Debug, Clone, Copy)]
pub struct RetryExecutor<'a> {
    breaker: &'a CircuitBreaker,
    config: &'a RetryConfig,
}

impl<'a> RetryExecutor<'a> {
    pub fn new(breaker: &'a CircuitBreaker, config: &'a RetryConfig) -> Self {
        Self { breaker, config }
    }

    /// Execute with a fresh attempt context
    pub fn execute<I, T, E>(&self, input: I) -> Result<T, ResilienceError<E>>
    where
        I: IntoCallOptions<T, E>,
        E: 'static,
    {
        self.execute_in(&mut AttemptContext::new(), input)
    }

    /// Execute, tracking attempts in `attempts`
    ///
    /// Accepts either:
    /// - A plain closure: `executor.execute_in(&mut ctx, || api_request())`
    /// - A closure with options: `executor.execute_in(&mut ctx, (|| api_request(), CallOptions::new().with_retry_fallback(...)))`
    pub fn execute_in<I, T, E>(
        &self,
        attempts: &mut AttemptContext,
        input: I,
    ) -> Result<T, ResilienceError<E>>
    where
        I: IntoCallOptions<T, E>,
        E: 'static,
    {
        let (mut operation, options) = input.into_call_options();
        let CallOptions {
            mut breaker_fallback,
            mut retry_fallback,
        } = options;
        let max_attempts = self.config.max_attempts.max(1);
        *attempts = AttemptContext::new();

        loop {
            let permit = match self.breaker.try_acquire_permission() {
                Ok(permit) => permit,
                Err(rejected) => {
                    tracing::warn!(
                        circuit = self.breaker.name(),
                        attempt = attempts.attempt,
                        state = %rejected.state,
                        "call not permitted, retry loop stopped"
                    );
                    let ctx = self.fallback_context(attempts);
                    return match dispatch(&mut breaker_fallback, &ctx, Failure::Rejected(rejected)) {
                        Ok(result) => Self::finish(FallbackLayer::Breaker, result),
                        Err(failure) => self.resolve(attempts, failure, &mut retry_fallback),
                    };
                }
            };

            attempts.attempt += 1;
            attempts.invocations += 1;
            let attempt = attempts.attempt;

            let error = match operation() {
                Ok(value) => {
                    permit.record_success();
                    if attempt > 1 {
                        tracing::debug!(circuit = self.breaker.name(), attempt, "succeeded after retry");
                    }
                    attempts.attempt = 0;
                    return Ok(value);
                }
                Err(error) => error,
            };

            let duration = permit.elapsed();
            permit.record(OutcomeKind::Failure, duration);

            let retryable = self.config.is_retryable(&FailureContext {
                circuit_name: self.breaker.name(),
                error: &error as &dyn Any,
                duration,
                attempt,
            });
            let failure = if retryable {
                Failure::Transient(error)
            } else {
                Failure::Permanent(error)
            };

            let ctx = self.fallback_context(attempts);
            let failure = match dispatch(&mut breaker_fallback, &ctx, failure) {
                Ok(result) => return Self::finish(FallbackLayer::Breaker, result),
                Err(failure) => failure,
            };

            match failure {
                Failure::Transient(_) if attempt < max_attempts => {
                    let delay = self.config.delay_for(attempt);
                    tracing::debug!(
                        circuit = self.breaker.name(),
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "transient failure, retrying"
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
                failure => return self.resolve(attempts, failure, &mut retry_fallback),
            }
        }
    }

    /// Offer a terminal failure to the retry fallback
    fn resolve<T, E>(
        &self,
        attempts: &mut AttemptContext,
        failure: Failure<E>,
        retry_fallback: &mut Option<Fallback<T, E>>,
    ) -> Result<T, ResilienceError<E>> {
        let ctx = self.fallback_context(attempts);
        match dispatch(retry_fallback, &ctx, failure) {
            Ok(result) => {
                attempts.attempt = 0;
                Self::finish(FallbackLayer::Retry, result)
            }
            Err(Failure::Transient(last)) => {
                tracing::warn!(
                    circuit = self.breaker.name(),
                    attempts = attempts.attempt,
                    "retries exhausted"
                );
                Err(ResilienceError::Exhausted {
                    attempts: attempts.attempt,
                    last,
                })
            }
            Err(Failure::Permanent(error)) => Err(ResilienceError::Permanent(error)),
            Err(Failure::Rejected(rejected)) => Err(ResilienceError::Rejected(rejected)),
        }
    }

    fn finish<T, E>(layer: FallbackLayer, result: Result<T, E>) -> Result<T, ResilienceError<E>> {
        result.map_err(|error| ResilienceError::Fallback { layer, error })
    }

    fn fallback_context(&self, attempts: &AttemptContext) -> FallbackContext {
        FallbackContext {
            circuit_name: self.breaker.name().to_string(),
            state: self.breaker.state(),
            attempts: attempts.invocations,
        }
    }
}
