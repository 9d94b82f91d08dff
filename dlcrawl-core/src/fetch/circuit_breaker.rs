//! Circuit breakers for the remote API, one per endpoint.
//!
//! A 403 trips an endpoint's breaker immediately; repeated transient failures
//! trip it after `failure_threshold` in a row. While open, calls to that
//! endpoint fail fast until the cooldown expires. Other endpoints are unaffected.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed { consecutive_failures: u32 },
    Open { tripped_at: Instant },
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<State>,
    cooldown: Duration,
    failure_threshold: u32,
}

impl CircuitBreaker {
    pub fn new(cooldown: Duration, failure_threshold: u32) -> Self {
        Self {
            state: Mutex::new(State::Closed {
                consecutive_failures: 0,
            }),
            cooldown,
            failure_threshold: failure_threshold.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_allowed(&self) -> bool {
        let mut state = self.lock();
        match *state {
            State::Closed { .. } => true,
            State::Open { tripped_at } if tripped_at.elapsed() >= self.cooldown => {
                *state = State::Closed {
                    consecutive_failures: 0,
                };
                true
            }
            State::Open { .. } => false,
        }
    }

    pub fn record_success(&self) {
        *self.lock() = State::Closed {
            consecutive_failures: 0,
        };
    }

    pub fn record_failure(&self) {
        let mut state = self.lock();
        if let State::Closed {
            consecutive_failures,
        } = *state
        {
            let failures = consecutive_failures + 1;
            *state = if failures >= self.failure_threshold {
                tracing::warn!(failures, "circuit breaker tripped");
                State::Open {
                    tripped_at: Instant::now(),
                }
            } else {
                State::Closed {
                    consecutive_failures: failures,
                }
            };
        }
    }

    pub fn trip(&self) {
        tracing::warn!(cooldown_secs = self.cooldown.as_secs(), "circuit breaker tripped");
        *self.lock() = State::Open {
            tripped_at: Instant::now(),
        };
    }

    /// Remaining cooldown (zero when closed).
    pub fn remaining_cooldown(&self) -> Duration {
        match *self.lock() {
            State::Closed { .. } => Duration::ZERO,
            State::Open { tripped_at } => self.cooldown.saturating_sub(tripped_at.elapsed()),
        }
    }
}

/// Breakers keyed by endpoint path, created closed on first use.
#[derive(Debug)]
pub struct EndpointBreakers {
    cooldown: Duration,
    failure_threshold: u32,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl EndpointBreakers {
    pub fn new(cooldown: Duration, failure_threshold: u32) -> Self {
        Self {
            cooldown,
            failure_threshold,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// 10-minute cooldown, trips after 5 consecutive transient failures.
    pub fn default_remote() -> Self {
        Self::new(Duration::from_secs(10 * 60), 5)
    }

    pub fn for_path(&self, path: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self
            .breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(breakers.entry(path.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(self.cooldown, self.failure_threshold))
        }))
    }

    /// Paths whose breaker is currently open, sorted.
    pub fn open_paths(&self) -> Vec<String> {
        let breakers = self
            .breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut open: Vec<String> = breakers
            .iter()
            .filter(|(_, breaker)| breaker.remaining_cooldown() > Duration::ZERO)
            .map(|(path, _)| path.clone())
            .collect();
        open.sort();
        open
    }
}

impl Default for EndpointBreakers {
    fn default() -> Self {
        Self::default_remote()
    }
}
