//! Count-based sliding window of call outcomes
//!
//! The window is a ring of slots behind a short mutex plus one packed counter
//! word. Writers evict, insert and publish the new counters while holding the
//! ring lock, so the counters always describe exactly the slots in the ring.
//! Readers only load the counter word and never lock.
//!
//! Every reset bumps the window *epoch*. Outcomes are recorded against the epoch
//! their call was admitted in, and anything from an older epoch is dropped.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Largest supported window (counters are 16 bits wide)
pub const MAX_WINDOW_SIZE: usize = u16::MAX as usize;

pub(crate) const EPOCH_BITS: u32 = 10;
pub(crate) const EPOCH_MASK: u16 = (1 << EPOCH_BITS) - 1;

/// Whether a call succeeded or failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Success,
    Failure,
}

/// A single finished call as seen by the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOutcome {
    /// Clock time at which the call finished, in milliseconds
    pub timestamp_ms: u64,
    pub kind: OutcomeKind,
    /// Slow calls are tracked independently of success or failure
    pub slow: bool,
    pub duration_ms: u64,
}

impl CallOutcome {
    /// Build an outcome, marking it slow when `duration_ms` reaches the threshold
    pub fn new(kind: OutcomeKind, timestamp_ms: u64, duration_ms: u64, slow_threshold_ms: u64) -> Self {
        Self {
            timestamp_ms,
            kind,
            slow: duration_ms >= slow_threshold_ms,
            duration_ms,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.kind == OutcomeKind::Failure
    }
}

/// Point-in-time view of the window
///
/// Rates are percentages in `0.0..=100.0`, or [`MetricsSnapshot::NOT_EVALUATED`]
/// while fewer than the minimum number of calls are buffered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub successful_calls: usize,
    pub failed_calls: usize,
    pub slow_calls: usize,
    pub buffered_calls: usize,
    pub failure_rate: f32,
    pub slow_call_rate: f32,
}

impl MetricsSnapshot {
    /// Rate reported while the window holds too few calls to judge
    pub const NOT_EVALUATED: f32 = -1.0;

    fn from_counters(counters: Counters, minimum_calls: usize) -> Self {
        let buffered = counters.buffered();
        let (failure_rate, slow_call_rate) = if buffered == 0 || buffered < minimum_calls {
            (Self::NOT_EVALUATED, Self::NOT_EVALUATED)
        } else {
            (
                percentage(counters.failure as usize, buffered),
                percentage(counters.slow as usize, buffered),
            )
        };

        Self {
            successful_calls: counters.success as usize,
            failed_calls: counters.failure as usize,
            slow_calls: counters.slow as usize,
            buffered_calls: buffered,
            failure_rate,
            slow_call_rate,
        }
    }

    /// True once enough calls are buffered for the rates to mean something
    pub fn is_evaluable(&self) -> bool {
        self.failure_rate >= 0.0
    }

    pub fn failure_rate_exceeded(&self, threshold: f32) -> bool {
        self.is_evaluable() && self.failure_rate >= threshold
    }

    pub fn slow_call_rate_exceeded(&self, threshold: f32) -> bool {
        self.is_evaluable() && self.slow_call_rate >= threshold
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "successful={} failed={} slow={} buffered={} failure_rate={:.2}% slow_call_rate={:.2}%",
            self.successful_calls,
            self.failed_calls,
            self.slow_calls,
            self.buffered_calls,
            self.failure_rate,
            self.slow_call_rate
        )
    }
}

fn percentage(part: usize, total: usize) -> f32 {
    part as f32 * 100.0 / total as f32
}

/// Running totals packed into one `u64`: success | failure | slow | epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Counters {
    success: u16,
    failure: u16,
    slow: u16,
    epoch: u16,
}

impl Counters {
    fn pack(self) -> u64 {
        self.success as u64
            | (self.failure as u64) << 16
            | (self.slow as u64) << 32
            | (self.epoch as u64) << 48
    }

    fn unpack(word: u64) -> Self {
        Self {
            success: word as u16,
            failure: (word >> 16) as u16,
            slow: (word >> 32) as u16,
            epoch: (word >> 48) as u16,
        }
    }

    fn buffered(&self) -> usize {
        self.success as usize + self.failure as usize
    }

    fn add(&mut self, slot: Slot) {
        if slot.failure {
            self.failure = self.failure.wrapping_add(1);
        } else {
            self.success = self.success.wrapping_add(1);
        }
        if slot.slow {
            self.slow = self.slow.wrapping_add(1);
        }
    }

    fn remove(&mut self, slot: Slot) {
        if slot.failure {
            self.failure = self.failure.saturating_sub(1);
        } else {
            self.success = self.success.saturating_sub(1);
        }
        if slot.slow {
            self.slow = self.slow.saturating_sub(1);
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    failure: bool,
    slow: bool,
}

impl From<&CallOutcome> for Slot {
    fn from(outcome: &CallOutcome) -> Self {
        Self {
            failure: outcome.is_failure(),
            slow: outcome.slow,
        }
    }
}

/// Ring of the most recent outcomes
#[derive(Debug)]
struct Ring {
    slots: Box<[Option<Slot>]>,
    next: usize,
}

/// Fixed-capacity outcome recorder
#[derive(Debug)]
pub struct OutcomeRecorder {
    ring: Mutex<Ring>,
    counters: AtomicU64,
    window_size: usize,
    minimum_calls: usize,
}

impl OutcomeRecorder {
    /// Create a window holding the last `window_size` outcomes
    ///
    /// `window_size` is clamped to `1..=MAX_WINDOW_SIZE` and `minimum_calls`
    /// to `1..=window_size`.
    pub fn new(window_size: usize, minimum_calls: usize) -> Self {
        let window_size = window_size.clamp(1, MAX_WINDOW_SIZE);

        Self {
            ring: Mutex::new(Ring {
                slots: vec![None; window_size].into_boxed_slice(),
                next: 0,
            }),
            counters: AtomicU64::new(0),
            window_size,
            minimum_calls: minimum_calls.clamp(1, window_size),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn minimum_calls(&self) -> usize {
        self.minimum_calls
    }

    /// Current epoch; bumped by every [`reset`](Self::reset)
    pub fn epoch(&self) -> u16 {
        Counters::unpack(self.counters.load(Ordering::Acquire)).epoch
    }

    /// Record into the current epoch
    pub fn record(&self, outcome: CallOutcome) {
        let mut ring = self.lock_ring();
        let epoch = Counters::unpack(self.counters.load(Ordering::Acquire)).epoch;
        self.insert(&mut ring, epoch, Slot::from(&outcome));
    }

    /// Record an outcome admitted during `epoch`
    ///
    /// Returns `false` when the window has been reset since, in which case the
    /// outcome is dropped.
    pub fn record_in(&self, epoch: u16, outcome: CallOutcome) -> bool {
        let mut ring = self.lock_ring();
        self.insert(&mut ring, epoch, Slot::from(&outcome))
    }

    /// Evict the oldest slot, store `slot` and publish the new counters
    ///
    /// Must be called with the ring lock held.
    fn insert(&self, ring: &mut Ring, epoch: u16, slot: Slot) -> bool {
        let mut counters = Counters::unpack(self.counters.load(Ordering::Acquire));
        if counters.epoch != epoch {
            return false;
        }

        let index = ring.next;
        ring.next = (index + 1) % ring.slots.len();
        if let Some(evicted) = ring.slots[index].replace(slot) {
            counters.remove(evicted);
        }
        counters.add(slot);
        self.counters.store(counters.pack(), Ordering::Release);
        true
    }

    fn lock_ring(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot using the configured minimum number of calls
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.snapshot_with_minimum(self.minimum_calls)
    }

    /// Snapshot with a different evaluation floor (used while half-open)
    pub fn snapshot_with_minimum(&self, minimum_calls: usize) -> MetricsSnapshot {
        let counters = Counters::unpack(self.counters.load(Ordering::Acquire));
        MetricsSnapshot::from_counters(counters, minimum_calls.max(1))
    }

    /// Empty the window and start a new epoch, returning it
    pub fn reset(&self) -> u16 {
        let mut ring = self.lock_ring();
        ring.slots.iter_mut().for_each(|slot| *slot = None);
        ring.next = 0;

        let epoch = self.epoch().wrapping_add(1) & EPOCH_MASK;
        self.counters.store(
            Counters {
                epoch,
                ..Counters::default()
            }
            .pack(),
            Ordering::Release,
        );
        epoch
    }
}
