use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::metrics::{MetricsRecorder, NoopMetrics};

/// Runtime circuit state for upstream feed calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Percentage of failed calls in the window above which the circuit opens.
    pub failure_rate_threshold: f64,
    /// Number of most recent calls the failure rate is computed over.
    pub sliding_window_size: usize,
    /// Calls required in the window before the failure rate is evaluated.
    pub minimum_calls: usize,
    #[serde(with = "crate::config::duration_ms")]
    pub open_wait: Duration,
    pub half_open_permitted_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            sliding_window_size: 10,
            minimum_calls: 5,
            open_wait: Duration::from_secs(30),
            half_open_permitted_calls: 3,
        }
    }
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    /// `true` marks a failed call.
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    trial_permits_issued: u32,
    trial_successes: u32,
}

impl Default for CircuitInner {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            window: VecDeque::new(),
            opened_at: None,
            trial_permits_issued: 0,
            trial_successes: 0,
        }
    }
}

impl CircuitInner {
    fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failures = self.window.iter().filter(|failed| **failed).count();
        failures as f64 * 100.0 / self.window.len() as f64
    }
}

/// Thread-safe count-based circuit breaker.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
    recorder: Arc<dyn MetricsRecorder>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("inner", &*self.inner.lock())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        recorder: Arc<dyn MetricsRecorder>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(CircuitInner::default()),
            recorder,
        }
    }

    pub fn standalone(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::new(name, config, Arc::new(NoopMetrics))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Asks for permission to make one call.
    ///
    /// An open circuit turns half-open once `open_wait` has elapsed. A
    /// half-open circuit grants at most `half_open_permitted_calls` trials.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let can_probe = inner
                    .opened_at
                    .map(|opened_at| opened_at.elapsed() >= self.config.open_wait)
                    .unwrap_or(false);
                if !can_probe {
                    return false;
                }
                self.transition(&mut inner, CircuitState::HalfOpen);
                inner.trial_permits_issued = 1;
                true
            }
            CircuitState::HalfOpen => {
                if inner.trial_permits_issued < self.config.half_open_permitted_calls {
                    inner.trial_permits_issued += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Like [`Self::allow_request`], but ties the outcome to the returned
    /// permit. A permit dropped before [`CallPermit::success`] or
    /// [`CallPermit::failure`] counts as a failure, so a cancelled half-open
    /// trial reopens the circuit instead of holding its slot forever.
    pub fn try_acquire(&self) -> Option<CallPermit<'_>> {
        self.allow_request().then(|| CallPermit {
            breaker: self,
            settled: false,
        })
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => self.record_outcome(&mut inner, false),
            CircuitState::HalfOpen => {
                inner.trial_successes += 1;
                if inner.trial_successes >= self.config.half_open_permitted_calls {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => self.record_outcome(&mut inner, true),
            CircuitState::HalfOpen => self.transition(&mut inner, CircuitState::Open),
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Failure percentage over the calls currently in the window.
    pub fn failure_rate(&self) -> f64 {
        self.inner.lock().failure_rate()
    }

    pub fn buffered_calls(&self) -> usize {
        self.inner.lock().window.len()
    }

    fn record_outcome(&self, inner: &mut CircuitInner, failed: bool) {
        inner.window.push_back(failed);
        while inner.window.len() > self.config.sliding_window_size {
            inner.window.pop_front();
        }

        if inner.window.len() >= self.config.minimum_calls
            && inner.failure_rate() > self.config.failure_rate_threshold
        {
            self.transition(inner, CircuitState::Open);
        }
    }

    fn transition(&self, inner: &mut CircuitInner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }

        let failure_rate = inner.failure_rate();
        inner.state = to;
        inner.trial_permits_issued = 0;
        inner.trial_successes = 0;
        match to {
            CircuitState::Open => inner.opened_at = Some(Instant::now()),
            CircuitState::Closed => {
                inner.opened_at = None;
                inner.window.clear();
            }
            CircuitState::HalfOpen => inner.opened_at = None,
        }

        if to == CircuitState::Open {
            warn!(
                resource = %self.name,
                ?from,
                failure_rate,
                wait_ms = self.config.open_wait.as_millis() as u64,
                "circuit breaker opened"
            );
        } else {
            info!(resource = %self.name, ?from, ?to, "circuit breaker state changed");
        }
        self.recorder.record_circuit_transition(&self.name, from, to);
    }
}

/// Outstanding permission for one call through a [`CircuitBreaker`].
#[must_use = "dropping the permit records a failure"]
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl CallPermit<'_> {
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!(resource = %self.breaker.name, "call abandoned before completion");
            self.breaker.record_failure();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(open_wait: Duration) -> CircuitBreaker {
        CircuitBreaker::standalone(
            "feed",
            CircuitBreakerConfig {
                open_wait,
                ..CircuitBreakerConfig::default()
            },
        )
    }

    #[test]
    fn stays_closed_at_exactly_half_failures() {
        let breaker = breaker(Duration::from_secs(30));

        for call in 0..10 {
            if call % 2 == 0 {
                breaker.record_success();
            } else {
                breaker.record_failure();
            }
        }

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_rate(), 50.0);
        assert!(breaker.allow_request());
    }

    #[test]
    fn opens_once_failure_rate_exceeds_threshold() {
        let breaker = breaker(Duration::from_secs(30));

        for _ in 0..4 {
            breaker.record_success();
        }
        for _ in 0..4 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn waits_for_minimum_calls_before_evaluating() {
        let breaker = breaker(Duration::from_secs(30));

        for _ in 0..4 {
            breaker.record_failure();
        }

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.buffered_calls(), 4);
    }

    #[test]
    fn half_open_closes_after_permitted_trial_successes() {
        let breaker = breaker(Duration::from_millis(1));
        for _ in 0..5 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(5));
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.allow_request());
        assert!(breaker.allow_request());
        assert!(!breaker.allow_request());

        breaker.record_success();
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.buffered_calls(), 0);
    }

    #[test]
    fn trial_failure_reopens() {
        let breaker = breaker(Duration::from_millis(1));
        for _ in 0..5 {
            breaker.record_failure();
        }

        std::thread::sleep(Duration::from_millis(5));
        assert!(breaker.allow_request());
        breaker.record_failure();

        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn abandoned_trial_permit_reopens_instead_of_leaking() {
        let breaker = breaker(Duration::from_millis(1));
        for _ in 0..5 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(5));

        let permit = breaker.try_acquire().expect("trial permit");
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        drop(permit);
        assert_eq!(breaker.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(5));
        for _ in 0..3 {
            breaker.try_acquire().expect("trial permit").success();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
