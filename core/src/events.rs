//! Synchronous event fan-out for circuit breaker activity
//!
//! Subscribers are fixed when the breaker is built and run in registration
//! order on the calling thread, right after the state change they describe.
//! A panicking subscriber is logged and skipped; it never changes the outcome
//! of the call that triggered it.

use crate::circuit::BreakerState;
use crate::window::MetricsSnapshot;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// What happened
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventKind {
    Success { duration_ms: u64, slow: bool },
    Error { duration_ms: u64, slow: bool },
    StateTransition { from: BreakerState, to: BreakerState },
    SlowCallRateExceeded { rate: f32 },
    FailureRateExceeded { rate: f32 },
    CallNotPermitted { state: BreakerState },
}

/// An event together with the window metrics at publication time
#[derive(Debug, Clone)]
pub struct BreakerEvent {
    pub circuit: Arc<str>,
    pub timestamp_ms: u64,
    pub kind: EventKind,
    pub metrics: MetricsSnapshot,
}

/// Observer callable
pub type Subscriber = Arc<dyn Fn(&BreakerEvent) + Send + Sync>;

/// Ordered list of subscribers
#[derive(Clone, Default)]
pub struct EventPublisher {
    subscribers: Vec<Subscriber>,
}

impl EventPublisher {
    pub fn new(subscribers: Vec<Subscriber>) -> Self {
        Self { subscribers }
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Deliver `event` to every subscriber, swallowing their panics
    pub fn publish(&self, event: &BreakerEvent) {
        for (index, subscriber) in self.subscribers.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| subscriber(event))).is_err() {
                tracing::warn!(
                    circuit = %event.circuit,
                    subscriber = index,
                    "event subscriber panicked, ignoring"
                );
            }
        }
    }
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

/// Subscriber that calls `f(circuit)` whenever the circuit enters `state`
pub fn on_transition_to<F>(state: BreakerState, f: F) -> Subscriber
where
    F: Fn(&str) + Send + Sync + 'static,
{
    Arc::new(move |event: &BreakerEvent| {
        if let EventKind::StateTransition { to, .. } = event.kind
            && to == state
        {
            f(&event.circuit);
        }
    })
}

/// Subscriber that writes every event to `tracing`
pub fn log_events() -> Subscriber {
    Arc::new(|event: &BreakerEvent| {
        let circuit = &*event.circuit;
        let metrics = &event.metrics;
        match event.kind {
            EventKind::Success { duration_ms, slow } => {
                tracing::info!(circuit, duration_ms, slow, %metrics, "call succeeded");
            }
            EventKind::Error { duration_ms, slow } => {
                tracing::warn!(circuit, duration_ms, slow, %metrics, "call failed");
            }
            EventKind::StateTransition { from, to } => {
                tracing::warn!(circuit, %from, %to, %metrics, "circuit state transition");
            }
            EventKind::SlowCallRateExceeded { rate } => {
                tracing::warn!(circuit, rate, slow_calls = metrics.slow_calls, "slow call rate exceeded");
            }
            EventKind::FailureRateExceeded { rate } => {
                tracing::warn!(circuit, rate, failed_calls = metrics.failed_calls, "failure rate exceeded");
            }
            EventKind::CallNotPermitted { state } => {
                tracing::warn!(circuit, %state, %metrics, "call not permitted");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::OutcomeRecorder;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(kind: EventKind) -> BreakerEvent {
        BreakerEvent {
            circuit: Arc::from("test"),
            timestamp_ms: 0,
            kind,
            metrics: OutcomeRecorder::new(10, 1).snapshot(),
        }
    }

    #[test]
    fn test_subscribers_run_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = seen.clone();
        let second = seen.clone();

        let first: Subscriber = Arc::new(move |_: &BreakerEvent| first.lock().unwrap().push(1));
        let second: Subscriber = Arc::new(move |_: &BreakerEvent| second.lock().unwrap().push(2));
        let publisher = EventPublisher::new(vec![first, second]);

        publisher.publish(&event(EventKind::Success {
            duration_ms: 1,
            slow: false,
        }));

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let delivered = Arc::new(AtomicUsize::new(0));
        let delivered_clone = delivered.clone();

        let panicking: Subscriber = Arc::new(|event: &BreakerEvent| {
            assert!(event.circuit.is_empty(), "subscriber blew up");
        });
        let counting: Subscriber = Arc::new(move |_: &BreakerEvent| {
            delivered_clone.fetch_add(1, Ordering::SeqCst);
        });
        let publisher = EventPublisher::new(vec![panicking, counting]);

        publisher.publish(&event(EventKind::CallNotPermitted {
            state: BreakerState::Open,
        }));

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_on_transition_to_filters() {
        let opened = Arc::new(AtomicUsize::new(0));
        let opened_clone = opened.clone();
        let subscriber = on_transition_to(BreakerState::Open, move |name| {
            assert_eq!(name, "test");
            opened_clone.fetch_add(1, Ordering::SeqCst);
        });

        subscriber(&event(EventKind::StateTransition {
            from: BreakerState::Closed,
            to: BreakerState::Open,
        }));
        subscriber(&event(EventKind::StateTransition {
            from: BreakerState::Open,
            to: BreakerState::HalfOpen,
        }));

        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_log_events_handles_every_kind() {
        let subscriber = log_events();
        for kind in [
            EventKind::Success { duration_ms: 1, slow: false },
            EventKind::Error { duration_ms: 1, slow: true },
            EventKind::StateTransition {
                from: BreakerState::Closed,
                to: BreakerState::Open,
            },
            EventKind::SlowCallRateExceeded { rate: 100.0 },
            EventKind::FailureRateExceeded { rate: 60.0 },
            EventKind::CallNotPermitted {
                state: BreakerState::HalfOpen,
            },
        ] {
            subscriber(&event(kind));
        }
    }
}
