//! ResilienceMachines - Retry and circuit breaker composition
//!
//! This crate provides a resilience engine built from:
//! - A sliding window of call outcomes with failure and slow-call rates
//! - State machine for circuit breaker lifecycle (Closed → Open → HalfOpen)
//! - A retry executor that consults the breaker before every attempt
//! - Layered fallbacks for rejected calls and exhausted retries
//! - Synchronous event publishing to subscribers
//!
//! # Example
//!
//! ```rust
//! use resilience_machines::{CallOptions, CircuitBreaker};
//! use std::time::Duration;
//!
//! let circuit = CircuitBreaker::builder("my_service")
//!     .failure_rate_threshold(50.0)
//!     .window_size(20)
//!     .minimum_calls(10)
//!     .wait_duration_in_open_state(Duration::from_secs(30))
//!     .on_open(|name| println!("Circuit {} opened!", name))
//!     .build()
//!     .expect("valid configuration");
//!
//! // Execute with circuit protection
//! let result = circuit.call(|| {
//!     // Your service call here
//!     Ok::<_, String>("success")
//! });
//! assert_eq!(result.unwrap(), "success");
//!
//! // Serve a degraded response while the circuit is open
//! let result = circuit.call((
//!     || Ok::<_, String>("live"),
//!     CallOptions::new().with_breaker_fallback(|_ctx, _failure| Ok("cached")),
//! ));
//! assert!(result.is_ok());
//! ```
//!
//! Retries and per-resource configuration live in [`Resilience`]:
//!
//! ```rust
//! use resilience_machines::{Resilience, StaticConfig};
//!
//! let config = StaticConfig::from_toml_str(r#"
//!     [defaults.retry]
//!     max_attempts = 2
//!     backoff = { kind = "fixed", delay_ms = 10 }
//! "#).unwrap();
//! let resilience = Resilience::new(config);
//!
//! let mut calls = 0;
//! let result = resilience.execute("inventory", || {
//!     calls += 1;
//!     if calls == 1 { Err("timeout") } else { Ok(calls) }
//! });
//! assert_eq!(result.unwrap(), 2);
//! ```

pub mod builder;
pub mod circuit;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod errors;
pub mod events;
pub mod fallback;
pub mod resilience;
pub mod retry;
pub mod window;

pub use builder::CircuitBuilder;
pub use circuit::{
    BreakerConfig, BreakerReport, BreakerState, CircuitBreaker, MAX_PROBE_BUDGET, Permit,
    StateSnapshot,
};
pub use classifier::{DefaultClassifier, FailureClassifier, FailureContext, PredicateClassifier};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{ConfigSource, ResourceConfig, StaticConfig};
pub use errors::{
    CallRejected, CircuitError, ConfigError, FailureKind, FallbackLayer, ResilienceError,
};
pub use events::{BreakerEvent, EventKind, EventPublisher, Subscriber};
pub use fallback::{CallOptions, Failure, Fallback, FallbackContext, IntoCallOptions};
pub use resilience::{Resilience, ResilienceBuilder};
pub use retry::{AttemptContext, Backoff, RetryConfig, RetryExecutor};
pub use window::{CallOutcome, MAX_WINDOW_SIZE, MetricsSnapshot, OutcomeKind, OutcomeRecorder};
