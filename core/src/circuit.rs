//! Circuit breaker implementation using state machines
//!
//! The transition table is a `state-machines` dynamic machine whose guards read
//! the outcome window. Callers never touch that machine on the hot path: the
//! current phase (state, probe budget, window epoch, entered-at) is mirrored
//! into one packed `AtomicU64`, so admission is a load plus, while half-open, a
//! compare-and-swap. The machine sits behind a mutex that is only taken to move
//! between states, and its guards re-check the window under that mutex so two
//! callers can never both trip the circuit.

use crate::{
    builder::CircuitBuilder,
    clock::{Clock, MonotonicClock},
    errors::{CallRejected, CircuitError, ConfigError, FailureKind},
    events::{BreakerEvent, EventKind, EventPublisher},
    fallback::{Failure, FallbackContext, IntoCallOptions, dispatch},
    window::{
        CallOutcome, EPOCH_BITS, EPOCH_MASK, MAX_WINDOW_SIZE, MetricsSnapshot, OutcomeKind,
        OutcomeRecorder,
    },
};
use serde::Deserialize;
use state_machines::state_machine;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

const STATE_MASK: u64 = 0b11;
const BUDGET_BITS: u32 = 12;
const BUDGET_SHIFT: u32 = 2;
const BUDGET_MASK: u64 = (1 << BUDGET_BITS) - 1;
const EPOCH_SHIFT: u32 = BUDGET_SHIFT + BUDGET_BITS;
const ENTERED_SHIFT: u32 = EPOCH_SHIFT + EPOCH_BITS;

/// Largest `permitted_calls_in_half_open_state` the phase word can carry
pub const MAX_PROBE_BUDGET: usize = BUDGET_MASK as usize;

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failure rate in percent at or above which the circuit opens
    pub failure_rate_threshold: f32,

    /// Calls taking at least this long are counted as slow
    #[serde(
        rename = "slow_call_duration_threshold_ms",
        deserialize_with = "crate::config::duration_ms"
    )]
    pub slow_call_duration_threshold: Duration,

    /// Slow call rate in percent at or above which the circuit opens
    pub slow_call_rate_threshold: f32,

    /// Number of most recent outcomes kept in the window
    pub window_size: usize,

    /// Outcomes required before rates are evaluated
    pub minimum_number_of_calls: usize,

    /// How long the circuit stays open before letting probes through
    #[serde(
        rename = "wait_duration_in_open_state_ms",
        deserialize_with = "crate::config::duration_ms"
    )]
    pub wait_duration_in_open_state: Duration,

    /// Probe calls admitted while half-open
    pub permitted_calls_in_half_open_state: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            slow_call_duration_threshold: Duration::from_secs(60),
            slow_call_rate_threshold: 100.0,
            window_size: 100,
            minimum_number_of_calls: 100,
            wait_duration_in_open_state: Duration::from_secs(60),
            permitted_calls_in_half_open_state: 10,
        }
    }
}

impl BreakerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_percentage("failure_rate_threshold", self.failure_rate_threshold)?;
        validate_percentage("slow_call_rate_threshold", self.slow_call_rate_threshold)?;

        if self.window_size == 0 || self.window_size > MAX_WINDOW_SIZE {
            return Err(ConfigError::invalid(
                "window_size",
                format!("must be between 1 and {MAX_WINDOW_SIZE}"),
            ));
        }
        if self.minimum_number_of_calls == 0 {
            return Err(ConfigError::invalid(
                "minimum_number_of_calls",
                "must be at least 1",
            ));
        }
        if self.permitted_calls_in_half_open_state == 0
            || self.permitted_calls_in_half_open_state > MAX_PROBE_BUDGET
        {
            return Err(ConfigError::invalid(
                "permitted_calls_in_half_open_state",
                format!("must be between 1 and {MAX_PROBE_BUDGET}"),
            ));
        }

        Ok(())
    }

    /// Outcomes needed before a half-open phase is judged
    ///
    /// Capped by the probe budget so the phase can always resolve.
    pub fn half_open_evaluation_floor(&self) -> usize {
        self.minimum_number_of_calls
            .min(self.permitted_calls_in_half_open_state)
            .min(self.window_size)
            .max(1)
    }

    fn wait_ms(&self) -> u64 {
        self.wait_duration_in_open_state.as_millis() as u64
    }

    fn slow_threshold_ms(&self) -> u64 {
        self.slow_call_duration_threshold.as_millis() as u64
    }
}

fn validate_percentage(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value > 0.0 && value <= 100.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, "must be in (0, 100]"))
    }
}

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    fn bits(self) -> u64 {
        match self {
            BreakerState::Closed => 0,
            BreakerState::Open => 1,
            BreakerState::HalfOpen => 2,
        }
    }

    fn from_bits(bits: u64) -> Self {
        match bits & STATE_MASK {
            1 => BreakerState::Open,
            2 => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }

    fn from_machine(name: &str) -> Self {
        match name {
            "Open" => BreakerState::Open,
            "HalfOpen" => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerState::Closed => f.write_str("CLOSED"),
            BreakerState::Open => f.write_str("OPEN"),
            BreakerState::HalfOpen => f.write_str("HALF_OPEN"),
        }
    }
}

/// Public view of the current phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSnapshot {
    pub state: BreakerState,
    /// Clock time the state was entered, in milliseconds
    pub entered_at_ms: u64,
    /// Remaining probe admissions; only present while half-open
    pub probe_budget_remaining: Option<usize>,
}

/// Packed phase word: state | probe budget | window epoch | entered-at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Phase {
    state: BreakerState,
    probe_budget: u16,
    epoch: u16,
    entered_at_ms: u64,
}

impl Phase {
    fn pack(self) -> u64 {
        self.state.bits()
            | (self.probe_budget as u64 & BUDGET_MASK) << BUDGET_SHIFT
            | ((self.epoch & EPOCH_MASK) as u64) << EPOCH_SHIFT
            | self.entered_at_ms << ENTERED_SHIFT
    }

    fn unpack(word: u64) -> Self {
        Self {
            state: BreakerState::from_bits(word),
            probe_budget: ((word >> BUDGET_SHIFT) & BUDGET_MASK) as u16,
            epoch: (word >> EPOCH_SHIFT) as u16 & EPOCH_MASK,
            entered_at_ms: word >> ENTERED_SHIFT,
        }
    }

    fn elapsed(&self, now_ms: u64) -> Duration {
        let entered_at_ms = self.entered_at_ms & (u64::MAX >> ENTERED_SHIFT);
        let now_ms = now_ms & (u64::MAX >> ENTERED_SHIFT);
        Duration::from_millis(now_ms.saturating_sub(entered_at_ms))
    }
}

/// Circuit breaker context - shared data across all states
#[derive(Debug, Clone)]
pub struct CircuitContext {
    pub name: Arc<str>,
    pub config: BreakerConfig,
    pub recorder: Arc<OutcomeRecorder>,
    pub clock: Arc<dyn Clock>,
}

impl Default for CircuitContext {
    fn default() -> Self {
        Self::new(Arc::from(""), BreakerConfig::default(), Arc::new(MonotonicClock::new()))
    }
}

impl CircuitContext {
    pub(crate) fn new(name: Arc<str>, config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let recorder = Arc::new(OutcomeRecorder::new(
            config.window_size,
            config.minimum_number_of_calls,
        ));
        Self {
            name,
            config,
            recorder,
            clock,
        }
    }

    fn half_open_snapshot(&self) -> MetricsSnapshot {
        self.recorder
            .snapshot_with_minimum(self.config.half_open_evaluation_floor())
    }

    fn thresholds_exceeded(&self, metrics: &MetricsSnapshot) -> bool {
        metrics.failure_rate_exceeded(self.config.failure_rate_threshold)
            || metrics.slow_call_rate_exceeded(self.config.slow_call_rate_threshold)
    }
}

/// Data specific to the Open state
#[derive(Debug, Clone, Default)]
pub struct OpenData {
    pub opened_at_ms: u64,
}

state_machine! {
    name: Circuit,
    context: CircuitContext,
    dynamic: true,

    initial: Closed,
    states: [
        Closed,
        Open(OpenData),
        HalfOpen,
    ],
    events {
        trip {
            guards: [should_open],
            transition: { from: [Closed, HalfOpen], to: Open }
        }
        attempt_reset {
            guards: [timeout_elapsed],
            transition: { from: Open, to: HalfOpen }
        }
        close {
            guards: [should_close],
            transition: { from: HalfOpen, to: Closed }
        }
    }
}

impl Circuit<Closed> {
    /// Window is full enough and a rate is at or above its threshold
    fn should_open(&self, ctx: &CircuitContext) -> bool {
        ctx.thresholds_exceeded(&ctx.recorder.snapshot())
    }
}

impl Circuit<HalfOpen> {
    fn should_open(&self, ctx: &CircuitContext) -> bool {
        ctx.thresholds_exceeded(&ctx.half_open_snapshot())
    }

    /// Enough probes finished and every rate stayed below its threshold
    fn should_close(&self, ctx: &CircuitContext) -> bool {
        let metrics = ctx.half_open_snapshot();
        metrics.is_evaluable() && !ctx.thresholds_exceeded(&metrics)
    }
}

impl Circuit<Open> {
    fn timeout_elapsed(&self, ctx: &CircuitContext) -> bool {
        let now = ctx.clock.now_ms();
        self.state_data_open()
            .map(|data| now.saturating_sub(data.opened_at_ms) >= ctx.config.wait_ms())
            .unwrap_or(false)
    }
}

/// Human-readable breaker status
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerReport {
    pub circuit: String,
    pub state: BreakerState,
    pub metrics: MetricsSnapshot,
    pub not_permitted_calls: u64,
}

impl fmt::Display for BreakerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "circuit '{}':", self.circuit)?;
        writeln!(f, "- state: {}", self.state)?;
        writeln!(f, "- successful calls: {}", self.metrics.successful_calls)?;
        writeln!(f, "- failed calls: {}", self.metrics.failed_calls)?;
        writeln!(f, "- buffered calls: {}", self.metrics.buffered_calls)?;
        writeln!(f, "- slow calls: {}", self.metrics.slow_calls)?;
        writeln!(f, "- not permitted calls: {}", self.not_permitted_calls)?;
        writeln!(f, "- failure rate: {:.2}%", self.metrics.failure_rate)?;
        write!(f, "- slow call rate: {:.2}%", self.metrics.slow_call_rate)
    }
}

/// Circuit breaker public API
///
/// Shared by reference (usually behind an `Arc`) between every caller of one
/// resource.
pub struct CircuitBreaker {
    context: CircuitContext,
    machine: Mutex<DynamicCircuit>,
    phase: AtomicU64,
    not_permitted: AtomicU64,
    publisher: EventPublisher,
}

impl CircuitBreaker {
    /// Create a circuit breaker (use builder() for clocks and subscribers)
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Result<Self, ConfigError> {
        CircuitBuilder::new(name).config(config).build()
    }

    /// Create a new circuit breaker builder
    pub fn builder(name: impl Into<String>) -> CircuitBuilder {
        CircuitBuilder::new(name)
    }

    pub(crate) fn with_context_and_publisher(
        context: CircuitContext,
        publisher: EventPublisher,
    ) -> Self {
        let machine = DynamicCircuit::new(context.clone());
        let phase = Phase {
            state: BreakerState::Closed,
            probe_budget: 0,
            epoch: context.recorder.epoch(),
            entered_at_ms: context.clock.now_ms(),
        };

        Self {
            context,
            machine: Mutex::new(machine),
            phase: AtomicU64::new(phase.pack()),
            not_permitted: AtomicU64::new(0),
            publisher,
        }
    }

    pub fn name(&self) -> &str {
        &self.context.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.context.config
    }

    pub fn state(&self) -> BreakerState {
        self.current_phase().state
    }

    pub fn state_snapshot(&self) -> StateSnapshot {
        let phase = self.current_phase();
        StateSnapshot {
            state: phase.state,
            entered_at_ms: phase.entered_at_ms,
            probe_budget_remaining: (phase.state == BreakerState::HalfOpen)
                .then_some(phase.probe_budget as usize),
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == BreakerState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state() == BreakerState::Closed
    }

    pub fn is_half_open(&self) -> bool {
        self.state() == BreakerState::HalfOpen
    }

    /// Window metrics, judged against the floor of the current state
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics_for(self.state())
    }

    /// Calls refused since the breaker was created or last reset
    pub fn not_permitted_calls(&self) -> u64 {
        self.not_permitted.load(Ordering::Relaxed)
    }

    pub fn report(&self) -> BreakerReport {
        BreakerReport {
            circuit: self.context.name.to_string(),
            state: self.state(),
            metrics: self.metrics(),
            not_permitted_calls: self.not_permitted_calls(),
        }
    }

    /// Ask for admission
    ///
    /// An open circuit whose wait has elapsed moves to half-open right here and
    /// the call is judged under half-open rules. The returned permit must be
    /// settled with the call's outcome; dropping it unsettled returns a probe
    /// slot instead of recording anything.
    pub fn try_acquire_permission(&self) -> Result<Permit<'_>, CallRejected> {
        loop {
            let word = self.phase.load(Ordering::Acquire);
            let phase = Phase::unpack(word);

            match phase.state {
                BreakerState::Closed => return Ok(self.permit(phase, false)),
                BreakerState::Open => {
                    if phase.elapsed(self.context.clock.now_ms())
                        < self.context.config.wait_duration_in_open_state
                    {
                        return Err(self.reject(phase));
                    }
                    if !self.fire(CircuitEvent::AttemptReset)
                        && self.phase.load(Ordering::Acquire) == word
                    {
                        return Err(self.reject(phase));
                    }
                }
                BreakerState::HalfOpen => {
                    if phase.probe_budget == 0 {
                        return Err(self.reject(phase));
                    }
                    let next = Phase {
                        probe_budget: phase.probe_budget - 1,
                        ..phase
                    };
                    if self
                        .phase
                        .compare_exchange_weak(word, next.pack(), Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return Ok(self.permit(phase, true));
                    }
                }
            }
        }
    }

    /// Run `f` once under circuit protection
    ///
    /// Accepts either:
    /// - A plain closure: `circuit.call(|| api_request())`
    /// - A closure with options: `circuit.call((|| api_request(), CallOptions::new().with_breaker_fallback(...)))`
    ///
    /// Only the breaker fallback is consulted; failures are offered to it as
    /// [`FailureKind::Transient`].
    pub fn call<I, T, E>(&self, input: I) -> Result<T, CircuitError<E>>
    where
        I: IntoCallOptions<T, E>,
    {
        let (mut f, options) = input.into_call_options();
        let mut fallback = options.breaker_fallback;

        let failure = match self.try_acquire_permission() {
            Ok(permit) => match f() {
                Ok(value) => {
                    permit.record_success();
                    return Ok(value);
                }
                Err(error) => {
                    permit.record_failure();
                    Failure::Transient(error)
                }
            },
            Err(rejected) => Failure::Rejected(rejected),
        };

        let ctx = FallbackContext {
            circuit_name: self.context.name.to_string(),
            state: self.state(),
            attempts: u32::from(failure.kind() != FailureKind::Rejected),
        };
        match dispatch(&mut fallback, &ctx, failure) {
            Ok(result) => result.map_err(CircuitError::Fallback),
            Err(Failure::Rejected(rejected)) => Err(CircuitError::Rejected(rejected)),
            Err(Failure::Transient(error)) | Err(Failure::Permanent(error)) => {
                Err(CircuitError::Execution(error))
            }
        }
    }

    /// Force the circuit closed, clearing the window and counters
    pub fn reset(&self) {
        let mut machine = self.machine.lock().unwrap_or_else(PoisonError::into_inner);
        let from = BreakerState::from_machine(machine.current_state());

        *machine = DynamicCircuit::new(self.context.clone());
        let epoch = self.context.recorder.reset();
        self.phase.store(
            Phase {
                state: BreakerState::Closed,
                probe_budget: 0,
                epoch,
                entered_at_ms: self.context.clock.now_ms(),
            }
            .pack(),
            Ordering::Release,
        );
        self.not_permitted.store(0, Ordering::Relaxed);
        drop(machine);

        tracing::info!(circuit = %self.context.name, %from, "circuit reset");
        if from != BreakerState::Closed {
            self.publish(EventKind::StateTransition {
                from,
                to: BreakerState::Closed,
            });
        }
    }

    fn current_phase(&self) -> Phase {
        Phase::unpack(self.phase.load(Ordering::Acquire))
    }

    fn metrics_for(&self, state: BreakerState) -> MetricsSnapshot {
        match state {
            BreakerState::HalfOpen => self.context.half_open_snapshot(),
            _ => self.context.recorder.snapshot(),
        }
    }

    fn permit(&self, phase: Phase, probe: bool) -> Permit<'_> {
        Permit {
            breaker: self,
            epoch: phase.epoch,
            probe,
            started_at_ms: self.context.clock.now_ms(),
            settled: false,
        }
    }

    fn reject(&self, phase: Phase) -> CallRejected {
        self.not_permitted.fetch_add(1, Ordering::Relaxed);
        let elapsed = phase.elapsed(self.context.clock.now_ms());

        tracing::debug!(
            circuit = %self.context.name,
            state = %phase.state,
            elapsed_ms = elapsed.as_millis() as u64,
            "call not permitted"
        );
        self.publish(EventKind::CallNotPermitted { state: phase.state });

        CallRejected {
            circuit: self.context.name.to_string(),
            state: phase.state,
            elapsed,
        }
    }

    /// Record a settled permit and drive any transition it causes
    fn on_outcome(&self, epoch: u16, outcome: CallOutcome) {
        if !self.context.recorder.record_in(epoch, outcome) {
            tracing::debug!(
                circuit = %self.context.name,
                "outcome from an earlier circuit phase discarded"
            );
            return;
        }

        self.publish(match outcome.kind {
            OutcomeKind::Success => EventKind::Success {
                duration_ms: outcome.duration_ms,
                slow: outcome.slow,
            },
            OutcomeKind::Failure => EventKind::Error {
                duration_ms: outcome.duration_ms,
                slow: outcome.slow,
            },
        });

        match self.state() {
            BreakerState::Closed => {
                if self.context.thresholds_exceeded(&self.context.recorder.snapshot()) {
                    self.fire(CircuitEvent::Trip);
                }
            }
            BreakerState::HalfOpen => {
                let metrics = self.context.half_open_snapshot();
                if metrics.is_evaluable() {
                    if self.context.thresholds_exceeded(&metrics) {
                        self.fire(CircuitEvent::Trip);
                    } else {
                        self.fire(CircuitEvent::Close);
                    }
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Hand a probe slot back when its permit was dropped unsettled
    fn release_probe(&self, epoch: u16) {
        let limit = self.context.config.permitted_calls_in_half_open_state as u16;
        let _ = self
            .phase
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                let phase = Phase::unpack(word);
                (phase.state == BreakerState::HalfOpen
                    && phase.epoch == epoch
                    && phase.probe_budget < limit)
                    .then(|| {
                        Phase {
                            probe_budget: phase.probe_budget + 1,
                            ..phase
                        }
                        .pack()
                    })
            });
    }

    /// Run `event` through the machine and publish the new phase
    ///
    /// Returns `false` when the machine's guard refused (including when
    /// another caller already made the transition).
    fn fire(&self, event: CircuitEvent) -> bool {
        let mut machine = self.machine.lock().unwrap_or_else(PoisonError::into_inner);
        let from = BreakerState::from_machine(machine.current_state());
        let before = self.metrics_for(from);

        if machine.handle(event).is_err() {
            return false;
        }

        let to = BreakerState::from_machine(machine.current_state());
        let now = self.context.clock.now_ms();
        if let Some(data) = machine.open_data_mut() {
            data.opened_at_ms = now;
        }

        let epoch = self.context.recorder.reset();
        let probe_budget = match to {
            BreakerState::HalfOpen => self.context.config.permitted_calls_in_half_open_state as u16,
            _ => 0,
        };
        self.phase.store(
            Phase {
                state: to,
                probe_budget,
                epoch,
                entered_at_ms: now,
            }
            .pack(),
            Ordering::Release,
        );
        drop(machine);

        match to {
            BreakerState::Open => tracing::warn!(
                circuit = %self.context.name,
                %from,
                failure_rate = before.failure_rate,
                slow_call_rate = before.slow_call_rate,
                "circuit opened"
            ),
            _ => tracing::info!(circuit = %self.context.name, %from, %to, "circuit transitioned"),
        }

        if to == BreakerState::Open {
            let config = &self.context.config;
            if before.failure_rate_exceeded(config.failure_rate_threshold) {
                self.publish_with(
                    EventKind::FailureRateExceeded {
                        rate: before.failure_rate,
                    },
                    before,
                );
            }
            if before.slow_call_rate_exceeded(config.slow_call_rate_threshold) {
                self.publish_with(
                    EventKind::SlowCallRateExceeded {
                        rate: before.slow_call_rate,
                    },
                    before,
                );
            }
        }
        self.publish(EventKind::StateTransition { from, to });

        true
    }

    fn publish(&self, kind: EventKind) {
        if !self.publisher.is_empty() {
            self.publish_with(kind, self.metrics());
        }
    }

    fn publish_with(&self, kind: EventKind, metrics: MetricsSnapshot) {
        if self.publisher.is_empty() {
            return;
        }
        self.publisher.publish(&BreakerEvent {
            circuit: self.context.name.clone(),
            timestamp_ms: self.context.clock.now_ms(),
            kind,
            metrics,
        });
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.context.name)
            .field("config", &self.context.config)
            .field("phase", &self.current_phase())
            .field("not_permitted", &self.not_permitted_calls())
            .field("publisher", &self.publisher)
            .finish()
    }
}

/// Admission granted by [`CircuitBreaker::try_acquire_permission`]
///
/// Settle it with [`record_success`](Permit::record_success) or
/// [`record_failure`](Permit::record_failure). A permit dropped unsettled (the
/// caller gave up, or the operation panicked) records nothing.
#[must_use = "settle the permit with the call's outcome"]
#[derive(Debug)]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    epoch: u16,
    probe: bool,
    started_at_ms: u64,
    settled: bool,
}

impl Permit<'_> {
    /// Time since admission, measured on the breaker's clock
    pub fn elapsed(&self) -> Duration {
        let now = self.breaker.context.clock.now_ms();
        Duration::from_millis(now.saturating_sub(self.started_at_ms))
    }

    pub fn record_success(self) {
        let duration = self.elapsed();
        self.record(OutcomeKind::Success, duration);
    }

    pub fn record_failure(self) {
        let duration = self.elapsed();
        self.record(OutcomeKind::Failure, duration);
    }

    /// Settle with an explicitly measured duration
    pub fn record(mut self, kind: OutcomeKind, duration: Duration) {
        self.settled = true;
        let context = &self.breaker.context;
        let outcome = CallOutcome::new(
            kind,
            context.clock.now_ms(),
            duration.as_millis() as u64,
            context.config.slow_threshold_ms(),
        );
        self.breaker.on_outcome(self.epoch, outcome);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.release_probe(self.epoch);
        }
    }
}
