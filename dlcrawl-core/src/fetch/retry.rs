//! Bounded retry around a fetch client.
//!
//! Transient failures are retried up to `max_attempts` total attempts with
//! fixed or exponential backoff and optional jitter. Permanent failures are
//! returned on the first attempt.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{FetchClient, FetchError, FetchErrorKind, Fetched};
use crate::domain::FetchUnit;
use crate::error::UnitError;

/// Upper bound on a single backoff sleep.
const MAX_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff: Backoff,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            backoff: Backoff::Exponential,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            backoff: Backoff::Fixed,
            jitter: false,
        }
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based),
    /// without jitter.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.base_delay_ms);
        let delay = match self.backoff {
            Backoff::Fixed => base,
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                base.saturating_mul(factor)
            }
        };
        delay.min(MAX_DELAY)
    }

    /// Delay including up to 50% random jitter when enabled.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_for(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let extra_ms = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 2);
        delay + Duration::from_millis(extra_ms)
    }
}

/// Tagged result of a fetch under the retry policy.
#[derive(Debug)]
pub enum FetchOutcome {
    Fetched { fetched: Fetched, attempts: u32 },
    Failed { error: FetchError, attempts: u32 },
}

impl FetchOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            FetchOutcome::Fetched { attempts, .. } | FetchOutcome::Failed { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn into_result(self) -> Result<Fetched, UnitError> {
        match self {
            FetchOutcome::Fetched { fetched, .. } => Ok(fetched),
            FetchOutcome::Failed { error, attempts } => Err(match error.kind() {
                FetchErrorKind::Transient => UnitError::TransientFetch {
                    attempts,
                    message: error.message().to_string(),
                },
                FetchErrorKind::Permanent => UnitError::PermanentFetch {
                    message: error.message().to_string(),
                },
            }),
        }
    }
}

/// Fetch `unit`, retrying transient failures per `policy`.
pub fn fetch_with_retry(
    client: &dyn FetchClient,
    unit: &FetchUnit,
    policy: &RetryPolicy,
) -> FetchOutcome {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match client.fetch(unit) {
            Ok(fetched) => {
                return FetchOutcome::Fetched {
                    fetched,
                    attempts: attempt,
                }
            }
            Err(error) if error.kind() == FetchErrorKind::Permanent => {
                return FetchOutcome::Failed {
                    error,
                    attempts: attempt,
                }
            }
            Err(error) if attempt >= max_attempts => {
                return FetchOutcome::Failed {
                    error,
                    attempts: attempt,
                }
            }
            Err(error) => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    unit = %unit,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient fetch failure, retrying"
                );
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
            }
        }
    }
}
