// ============================================================================
// Circuit Breaker
// ============================================================================
//
// Per-target circuit breaker with a count-based rolling window.
//
// States:
// - Closed: calls pass through, outcomes are recorded in the window. Once the
//   window holds at least `minimum_calls` outcomes and the failure rate is at
//   or above the threshold, the circuit opens.
// - Open: calls are rejected without touching the network until
//   `open_duration` has elapsed since the transition.
// - Half-Open: exactly one trial call is admitted. Success closes the circuit
//   with an empty window, failure reopens it and restarts the cool-down.
//
// All state for one target sits behind one mutex. The lock is never held
// across an await, which is what lets `CallPermit` settle itself in `Drop`.
//
// ============================================================================

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::config::CircuitBreakerConfig;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Closed: Normal operation
    Closed,
    /// Open: Service is failing, reject requests
    Open,
    /// Half-Open: One trial call in flight
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(s)
    }
}

/// Outcome of one call, as seen by the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
}

/// Circuit breaker error
#[derive(Debug, Clone, thiserror::Error)]
pub enum CircuitBreakerError {
    #[error("Circuit breaker is open - retry in {retry_in:?}")]
    CircuitOpen { retry_in: Duration },
    #[error("Circuit breaker is half-open and its trial call is still in flight")]
    ProbeInFlight,
}

/// Point-in-time view of a breaker, for monitoring
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub service: String,
    pub state: CircuitState,
    pub failure_rate: f64,
    pub calls_in_window: usize,
    pub failures_in_window: usize,
    pub since_transition_ms: u128,
}

struct BreakerInner {
    state: CircuitState,
    window: VecDeque<CallOutcome>,
    failures: usize,
    transitioned_at: Instant,
    probe_in_flight: bool,
}

impl BreakerInner {
    fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            0.0
        } else {
            self.failures as f64 * 100.0 / self.window.len() as f64
        }
    }

    fn reset_window(&mut self) {
        self.window.clear();
        self.failures = 0;
    }

    fn transition(&mut self, to: CircuitState) {
        self.state = to;
        self.transitioned_at = Instant::now();
    }
}

/// Circuit breaker for one backend target
pub struct CircuitBreaker {
    name: String,
    config: Arc<CircuitBreakerConfig>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new, closed circuit breaker
    pub fn new(name: impl Into<String>, config: Arc<CircuitBreakerConfig>) -> Self {
        let capacity = config.window_size;
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                window: VecDeque::with_capacity(capacity),
                failures: 0,
                transitioned_at: Instant::now(),
                probe_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // Every mutation is a plain field store; a poisoned lock still holds
        // consistent state.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ask to make a call
    ///
    /// Returns a permit that must be settled with `CallPermit::record`.
    /// A permit dropped unsettled counts as a failure.
    pub fn try_acquire(self: &Arc<Self>) -> Result<CallPermit, CircuitBreakerError> {
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => Ok(CallPermit::new(self.clone(), false)),
            CircuitState::Open => {
                let elapsed = inner.transitioned_at.elapsed();
                if elapsed >= self.config.open_duration {
                    inner.transition(CircuitState::HalfOpen);
                    inner.probe_in_flight = true;
                    tracing::info!(
                        service = %self.name,
                        open_for_ms = elapsed.as_millis(),
                        "Circuit breaker half-open, admitting trial call"
                    );
                    Ok(CallPermit::new(self.clone(), true))
                } else {
                    Err(CircuitBreakerError::CircuitOpen {
                        retry_in: self.config.open_duration - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(CircuitBreakerError::ProbeInFlight)
                } else {
                    inner.probe_in_flight = true;
                    Ok(CallPermit::new(self.clone(), true))
                }
            }
        }
    }

    fn on_outcome(&self, probe: bool, outcome: CallOutcome) {
        let mut inner = self.lock();

        if probe {
            inner.probe_in_flight = false;
            match outcome {
                CallOutcome::Success => {
                    inner.reset_window();
                    inner.transition(CircuitState::Closed);
                    tracing::info!(
                        service = %self.name,
                        "Circuit breaker closed after successful trial call"
                    );
                }
                CallOutcome::Failure => {
                    inner.transition(CircuitState::Open);
                    tracing::warn!(
                        service = %self.name,
                        open_secs = self.config.open_duration.as_secs_f64(),
                        "Circuit breaker reopened after failed trial call"
                    );
                }
            }
            return;
        }

        // Admitted while closed but finished after a transition: the window
        // it belonged to is gone.
        if inner.state != CircuitState::Closed {
            return;
        }

        inner.window.push_back(outcome);
        if outcome == CallOutcome::Failure {
            inner.failures += 1;
        }
        if inner.window.len() > self.config.window_size {
            if let Some(CallOutcome::Failure) = inner.window.pop_front() {
                inner.failures -= 1;
            }
        }

        if inner.window.len() >= self.config.minimum_calls {
            let rate = inner.failure_rate();
            if rate >= self.config.failure_rate_threshold {
                let calls = inner.window.len();
                inner.reset_window();
                inner.transition(CircuitState::Open);
                tracing::warn!(
                    service = %self.name,
                    failure_rate = rate,
                    threshold = self.config.failure_rate_threshold,
                    calls = calls,
                    "Circuit breaker opened due to failures"
                );
            }
        }
    }

    /// Get current state
    ///
    /// An open circuit whose cool-down has elapsed still reports `Open`; it
    /// becomes half-open when the next call arrives.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            service: self.name.clone(),
            state: inner.state,
            failure_rate: inner.failure_rate(),
            calls_in_window: inner.window.len(),
            failures_in_window: inner.failures,
            since_transition_ms: inner.transitioned_at.elapsed().as_millis(),
        }
    }
}

/// Admission to make one call through a breaker
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    probe: bool,
    settled: bool,
}

impl CallPermit {
    fn new(breaker: Arc<CircuitBreaker>, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    /// Whether this is the single half-open trial call
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn record(mut self, outcome: CallOutcome) {
        self.settled = true;
        self.breaker.on_outcome(self.probe, outcome);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!(
                service = %self.breaker.name,
                probe = self.probe,
                "Call abandoned before completion, counting as failure"
            );
            self.breaker.on_outcome(self.probe, CallOutcome::Failure);
        }
    }
}
