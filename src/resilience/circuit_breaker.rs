//! Circuit breaker for downstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: downstream assumed down, requests fail fast
//! - Half-Open: testing if downstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold
//! Open → Half-Open: after the break duration
//! Half-Open → Closed: probe request succeeds
//! Half-Open → Open: probe request fails
//! ```
//!
//! # Design Decisions
//! - One breaker per route key (not global)
//! - Fail fast in Open state (no waiting for timeout)
//! - Single probe in Half-Open (prevents hammering a recovering downstream)
//! - An [`Attempt`] dropped without an outcome counts as a failure, so a
//!   cancelled probe cannot wedge the breaker in Half-Open

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
enum State {
    Closed { failures: u32 },
    Open { until: Instant },
    HalfOpen { probing: bool },
}

/// Consecutive-failure circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    break_duration: Duration,
    state: Mutex<State>,
}

/// Returned when the circuit rejects a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitOpen;

impl CircuitBreaker {
    pub fn new(threshold: u32, break_duration: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            break_duration,
            state: Mutex::new(State::Closed { failures: 0 }),
        }
    }

    pub fn state(&self) -> CircuitState {
        match *self.state.lock().unwrap_or_else(PoisonError::into_inner) {
            State::Closed { .. } => CircuitState::Closed,
            State::Open { until } if Instant::now() >= until => CircuitState::HalfOpen,
            State::Open { .. } => CircuitState::Open,
            State::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Ask to make a call.
    pub fn try_acquire(&self) -> Result<Attempt<'_>, CircuitOpen> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            State::Closed { .. } => {}
            State::Open { until } if Instant::now() >= until => {
                *state = State::HalfOpen { probing: true };
                tracing::info!("Circuit half-open, sending probe");
            }
            State::Open { .. } => return Err(CircuitOpen),
            State::HalfOpen { probing: true } => return Err(CircuitOpen),
            State::HalfOpen { probing: false } => *state = State::HalfOpen { probing: true },
        }
        Ok(Attempt {
            breaker: self,
            settled: false,
        })
    }

    fn on_success(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*state, State::HalfOpen { .. }) {
            tracing::info!("Circuit closed");
        }
        *state = State::Closed { failures: 0 };
    }

    fn on_failure(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let open = State::Open {
            until: Instant::now() + self.break_duration,
        };
        match *state {
            State::Closed { failures } if failures + 1 >= self.threshold => {
                tracing::warn!(failures = failures + 1, "Circuit opened");
                *state = open;
            }
            State::Closed { failures } => *state = State::Closed { failures: failures + 1 },
            State::HalfOpen { .. } => {
                tracing::warn!("Probe failed, circuit re-opened");
                *state = open;
            }
            State::Open { .. } => {}
        }
    }
}

/// One admitted call. Report its outcome with [`Attempt::success`] or [`Attempt::failure`].
#[derive(Debug)]
pub struct Attempt<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl Attempt<'_> {
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success();
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure();
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_failure();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_recovers() {
        let breaker = CircuitBreaker::new(2, Duration::from_millis(100));

        breaker.try_acquire().unwrap().failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.try_acquire().unwrap().failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.try_acquire().unwrap_err(), CircuitOpen);

        tokio::time::advance(Duration::from_millis(100)).await;
        let probe = breaker.try_acquire().unwrap();
        // only one probe at a time
        assert!(breaker.try_acquire().is_err());
        probe.success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(100));
        breaker.try_acquire().unwrap().failure();
        tokio::time::advance(Duration::from_millis(150)).await;

        breaker.try_acquire().unwrap().failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_success_resets_failures() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(1));
        breaker.try_acquire().unwrap().failure();
        breaker.try_acquire().unwrap().success();
        breaker.try_acquire().unwrap().failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_attempt_counts_as_failure() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(100));
        drop(breaker.try_acquire().unwrap());
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
