//! Builder API for ergonomic circuit breaker configuration

use crate::{
    circuit::{BreakerConfig, BreakerState, CircuitBreaker, CircuitContext},
    clock::{Clock, MonotonicClock},
    errors::ConfigError,
    events::{self, BreakerEvent, EventPublisher, Subscriber},
};
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating circuit breakers with fluent API
pub struct CircuitBuilder {
    name: String,
    config: BreakerConfig,
    clock: Option<Arc<dyn Clock>>,
    subscribers: Vec<Subscriber>,
}

impl CircuitBuilder {
    /// Create a new builder for a circuit with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: BreakerConfig::default(),
            clock: None,
            subscribers: Vec::new(),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: BreakerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the failure rate threshold in percent (0-100]
    /// Circuit opens when (failures / buffered calls) * 100 >= this value
    pub fn failure_rate_threshold(mut self, percent: f32) -> Self {
        self.config.failure_rate_threshold = percent;
        self
    }

    /// Calls taking at least `threshold` count as slow
    pub fn slow_call_duration_threshold(mut self, threshold: Duration) -> Self {
        self.config.slow_call_duration_threshold = threshold;
        self
    }

    /// Set the slow call rate threshold in percent (0-100]
    pub fn slow_call_rate_threshold(mut self, percent: f32) -> Self {
        self.config.slow_call_rate_threshold = percent;
        self
    }

    /// Number of most recent outcomes considered
    pub fn window_size(mut self, size: usize) -> Self {
        self.config.window_size = size;
        self
    }

    /// Set minimum number of calls before rates are evaluated
    pub fn minimum_calls(mut self, calls: usize) -> Self {
        self.config.minimum_number_of_calls = calls;
        self
    }

    /// Set how long the circuit stays open before probing
    pub fn wait_duration_in_open_state(mut self, wait: Duration) -> Self {
        self.config.wait_duration_in_open_state = wait;
        self
    }

    /// Set the number of probe calls admitted while half-open
    pub fn permitted_calls_in_half_open_state(mut self, calls: usize) -> Self {
        self.config.permitted_calls_in_half_open_state = calls;
        self
    }

    /// Use a custom time source (tests use [`ManualClock`](crate::ManualClock))
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Register an event subscriber
    ///
    /// Subscribers run synchronously, in registration order, on the thread
    /// that caused the event.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use resilience_machines::{CircuitBreaker, EventKind};
    ///
    /// let circuit = CircuitBreaker::builder("api")
    ///     .subscribe(|event| {
    ///         if let EventKind::StateTransition { from, to } = event.kind {
    ///             println!("{}: {from} -> {to}", event.circuit);
    ///         }
    ///     })
    ///     .build()
    ///     .unwrap();
    /// assert!(circuit.is_closed());
    /// ```
    pub fn subscribe<F>(mut self, f: F) -> Self
    where
        F: Fn(&BreakerEvent) + Send + Sync + 'static,
    {
        self.subscribers.push(Arc::new(f));
        self
    }

    /// Register already shared subscribers
    pub fn subscribers(mut self, subscribers: impl IntoIterator<Item = Subscriber>) -> Self {
        self.subscribers.extend(subscribers);
        self
    }

    /// Log every event through `tracing`
    pub fn log_events(mut self) -> Self {
        self.subscribers.push(events::log_events());
        self
    }

    /// Set callback for when circuit opens
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.subscribers
            .push(events::on_transition_to(BreakerState::Open, f));
        self
    }

    /// Set callback for when circuit closes
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.subscribers
            .push(events::on_transition_to(BreakerState::Closed, f));
        self
    }

    /// Set callback for when circuit enters half-open
    pub fn on_half_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.subscribers
            .push(events::on_transition_to(BreakerState::HalfOpen, f));
        self
    }

    /// Build the circuit breaker
    pub fn build(self) -> Result<CircuitBreaker, ConfigError> {
        self.config.validate()?;

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let context = CircuitContext::new(Arc::from(self.name), self.config, clock);

        Ok(CircuitBreaker::with_context_and_publisher(
            context,
            EventPublisher::new(self.subscribers),
        ))
    }
}
