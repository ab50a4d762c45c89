//! Per-resource breakers and the execution entry point

use crate::{
    circuit::{BreakerReport, CircuitBreaker},
    clock::{Clock, MonotonicClock},
    config::{ConfigSource, StaticConfig},
    errors::{ConfigError, ResilienceError},
    events::{self, BreakerEvent, Subscriber},
    fallback::IntoCallOptions,
    retry::{AttemptContext, RetryConfig, RetryExecutor},
};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug)]
struct Resource {
    breaker: Arc<CircuitBreaker>,
    retry: RetryConfig,
}

/// Named resources, each guarded by its own breaker and retry policy
///
/// Breakers are created on first use from the [`ConfigSource`] and live as
/// long as the `Resilience` value. Every caller of the same name shares one
/// breaker.
///
/// # Examples
///
/// ```rust
/// use resilience_machines::{CallOptions, Resilience};
///
/// let resilience = Resilience::builder().build();
///
/// let value = resilience.execute("inventory", (
///     || Err::<u32, _>("connection refused"),
///     CallOptions::new().with_retry_fallback(|_ctx, _failure| Ok(0)),
/// ));
/// assert_eq!(value.unwrap(), 0);
/// ```
pub struct Resilience {
    source: Box<dyn ConfigSource>,
    clock: Arc<dyn Clock>,
    subscribers: Vec<Subscriber>,
    resources: RwLock<HashMap<String, Arc<Resource>>>,
}

impl Resilience {
    pub fn new(source: impl ConfigSource + 'static) -> Self {
        Self::builder().config_source(source).build()
    }

    pub fn builder() -> ResilienceBuilder {
        ResilienceBuilder::default()
    }

    /// Run `input` for `resource` with a fresh attempt context
    pub fn execute<I, T, E>(&self, resource: &str, input: I) -> Result<T, ResilienceError<E>>
    where
        I: IntoCallOptions<T, E>,
        E: 'static,
    {
        self.execute_in(resource, &mut AttemptContext::new(), input)
    }

    /// Run `input` for `resource`, tracking attempts in `attempts`
    pub fn execute_in<I, T, E>(
        &self,
        resource: &str,
        attempts: &mut AttemptContext,
        input: I,
    ) -> Result<T, ResilienceError<E>>
    where
        I: IntoCallOptions<T, E>,
        E: 'static,
    {
        let resource = self.resource(resource)?;
        RetryExecutor::new(&resource.breaker, &resource.retry).execute_in(attempts, input)
    }

    /// The breaker guarding `resource`, created on first use
    pub fn breaker(&self, resource: &str) -> Result<Arc<CircuitBreaker>, ConfigError> {
        Ok(self.resource(resource)?.breaker.clone())
    }

    /// Status of `resource`
    pub fn status(&self, resource: &str) -> Result<BreakerReport, ConfigError> {
        Ok(self.resource(resource)?.breaker.report())
    }

    /// Status of every resource used so far, sorted by name
    pub fn statuses(&self) -> Vec<BreakerReport> {
        let resources = self.resources.read().unwrap_or_else(PoisonError::into_inner);
        let mut reports: Vec<_> = resources.values().map(|r| r.breaker.report()).collect();
        reports.sort_by(|a, b| a.circuit.cmp(&b.circuit));
        reports
    }

    /// Force `resource` closed; returns `false` if it was never used
    pub fn reset(&self, resource: &str) -> bool {
        let resources = self.resources.read().unwrap_or_else(PoisonError::into_inner);
        match resources.get(resource) {
            Some(entry) => {
                entry.breaker.reset();
                true
            }
            None => false,
        }
    }

    fn resource(&self, name: &str) -> Result<Arc<Resource>, ConfigError> {
        {
            let resources = self.resources.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(resource) = resources.get(name) {
                return Ok(resource.clone());
            }
        }

        let mut resources = self.resources.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(resource) = resources.get(name) {
            return Ok(resource.clone());
        }

        let (breaker_config, retry) = self.source.resolve_config(name)?;
        retry.validate()?;
        let breaker = CircuitBreaker::builder(name)
            .config(breaker_config)
            .clock(self.clock.clone())
            .subscribers(self.subscribers.iter().cloned())
            .build()?;

        tracing::debug!(resource = name, "created circuit breaker");
        let resource = Arc::new(Resource {
            breaker: Arc::new(breaker),
            retry,
        });
        resources.insert(name.to_string(), resource.clone());
        Ok(resource)
    }
}

impl fmt::Debug for Resilience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resources = self.resources.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Resilience")
            .field("resources", &resources.keys().collect::<Vec<_>>())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

/// Builder for [`Resilience`]
#[derive(Default)]
pub struct ResilienceBuilder {
    source: Option<Box<dyn ConfigSource>>,
    clock: Option<Arc<dyn Clock>>,
    subscribers: Vec<Subscriber>,
}

impl ResilienceBuilder {
    /// Where per-resource settings come from; defaults apply when unset
    pub fn config_source(mut self, source: impl ConfigSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Time source shared by every breaker
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Register an event subscriber on every breaker
    pub fn subscribe<F>(mut self, f: F) -> Self
    where
        F: Fn(&BreakerEvent) + Send + Sync + 'static,
    {
        self.subscribers.push(Arc::new(f));
        self
    }

    /// Log every breaker event through `tracing`
    pub fn log_events(mut self) -> Self {
        self.subscribers.push(events::log_events());
        self
    }

    pub fn build(self) -> Resilience {
        Resilience {
            source: self
                .source
                .unwrap_or_else(|| Box::new(StaticConfig::default())),
            clock: self
                .clock
                .unwrap_or_else(|| Arc::new(MonotonicClock::new())),
            subscribers: self.subscribers,
            resources: RwLock::new(HashMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{BreakerConfig, BreakerState};
    use crate::clock::ManualClock;
    use crate::config::ResourceConfig;
    use crate::events::EventKind;
    use crate::fallback::CallOptions;
    use crate::retry::Backoff;
    use std::sync::Mutex;
    use std::time::Duration;

    fn fragile() -> ResourceConfig {
        ResourceConfig {
            breaker: BreakerConfig {
                window_size: 2,
                minimum_number_of_calls: 2,
                wait_duration_in_open_state: Duration::from_secs(5),
                permitted_calls_in_half_open_state: 1,
                ..Default::default()
            },
            retry: RetryConfig {
                max_attempts: 1,
                backoff: Backoff::Fixed {
                    delay: Duration::ZERO,
                },
                ..Default::default()
            },
        }
    }

    fn resilience(clock: &Arc<ManualClock>) -> Resilience {
        Resilience::builder()
            .config_source(StaticConfig::default().with_resource("payments", fragile()))
            .clock(clock.clone())
            .build()
    }

    #[test]
    fn test_breakers_are_shared_per_resource() {
        let resilience = Resilience::builder().build();

        let first = resilience.breaker("payments").unwrap();
        let second = resilience.breaker("payments").unwrap();
        let other = resilience.breaker("inventory").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[test]
    fn test_execute_opens_resource_circuit() {
        let clock = Arc::new(ManualClock::new());
        let resilience = resilience(&clock);

        for _ in 0..2 {
            let result = resilience.execute("payments", || Err::<(), _>("declined"));
            assert!(matches!(
                result,
                Err(ResilienceError::Exhausted { attempts: 1, .. })
            ));
        }

        let result = resilience.execute("payments", || Ok::<_, &str>("charged"));
        assert!(result.unwrap_err().is_rejected());

        let status = resilience.status("payments").unwrap();
        assert_eq!(status.state, BreakerState::Open);
        assert_eq!(status.not_permitted_calls, 1);
        assert!(status.to_string().contains("state: OPEN"));

        // Other resources are unaffected
        assert_eq!(resilience.execute("inventory", || Ok::<_, &str>(7)).unwrap(), 7);
    }

    #[test]
    fn test_recovery_after_wait() {
        let clock = Arc::new(ManualClock::new());
        let resilience = resilience(&clock);
        for _ in 0..2 {
            let _ = resilience.execute("payments", || Err::<(), _>("declined"));
        }

        clock.advance(Duration::from_secs(5));
        let result = resilience.execute("payments", || Ok::<_, &str>("charged"));

        assert_eq!(result.unwrap(), "charged");
        assert_eq!(resilience.status("payments").unwrap().state, BreakerState::Closed);
    }

    #[test]
    fn test_reset_closes_resource() {
        let clock = Arc::new(ManualClock::new());
        let resilience = resilience(&clock);
        for _ in 0..2 {
            let _ = resilience.execute("payments", || Err::<(), _>("declined"));
        }

        assert!(resilience.reset("payments"));
        assert!(!resilience.reset("never-used"));
        assert_eq!(resilience.status("payments").unwrap().state, BreakerState::Closed);
    }

    #[test]
    fn test_invalid_resource_config_surfaces() {
        let broken = ResourceConfig {
            breaker: BreakerConfig {
                window_size: 0,
                ..Default::default()
            },
            retry: RetryConfig::default(),
        };
        let resilience = Resilience::new(StaticConfig::default().with_resource("broken", broken));

        let result = resilience.execute("broken", || Ok::<_, String>(()));
        assert!(matches!(result, Err(ResilienceError::Config(_))));
    }

    #[test]
    fn test_subscribers_see_resource_events() {
        let clock = Arc::new(ManualClock::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let resilience = Resilience::builder()
            .config_source(StaticConfig::default().with_resource("payments", fragile()))
            .clock(clock.clone())
            .subscribe(move |event| {
                seen_clone
                    .lock()
                    .unwrap()
                    .push((event.circuit.to_string(), event.kind));
            })
            .build();

        let _ = resilience.execute("payments", || Ok::<_, &str>(()));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "payments");
        assert!(matches!(seen[0].1, EventKind::Success { .. }));
    }

    #[test]
    fn test_attempt_context_reports_invocations() {
        let clock = Arc::new(ManualClock::new());
        let resilience = Resilience::builder()
            .config_source(StaticConfig::new(ResourceConfig {
                retry: RetryConfig {
                    max_attempts: 3,
                    backoff: Backoff::Fixed {
                        delay: Duration::ZERO,
                    },
                    ..Default::default()
                },
                ..Default::default()
            }))
            .clock(clock.clone())
            .build();
        let mut attempts = AttemptContext::new();

        let result = resilience.execute_in(
            "search",
            &mut attempts,
            (
                || Err::<Vec<u32>, _>("timeout"),
                CallOptions::new().with_retry_fallback(|_ctx, _failure| Ok(Vec::new())),
            ),
        );

        assert_eq!(result.unwrap(), Vec::<u32>::new());
        assert_eq!(attempts.invocations(), 3);
        assert_eq!(attempts.attempt(), 0);
    }

    #[test]
    fn test_concurrent_first_use_creates_one_breaker() {
        let resilience = Resilience::builder().build();
        let breakers = Mutex::new(Vec::new());

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let breaker = resilience.breaker("shared").unwrap();
                    breakers.lock().unwrap().push(breaker);
                });
            }
        });

        let breakers = breakers.into_inner().unwrap();
        assert!(breakers.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
        assert_eq!(resilience.statuses().len(), 1);
    }
}
