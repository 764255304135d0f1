//! Circuit breaker for exchange endpoints.
//!
//! After `failure_threshold` consecutive failures, or an explicit trip on an
//! HTTP 403/418 ban response, every call is refused until the cooldown has
//! elapsed.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Whether calls are currently allowed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open { tripped_at: Instant },
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
}

/// Shared failure counter guarding one endpoint.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    cooldown: Duration,
    failure_threshold: u32,
}

impl CircuitBreaker {
    /// Open after `failure_threshold` consecutive failures, for `cooldown`.
    pub fn new(cooldown: Duration, failure_threshold: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
            }),
            cooldown,
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// Five-minute cooldown after three consecutive failures.
    pub fn default_exchange() -> Self {
        Self::new(Duration::from_secs(5 * 60), 3)
    }

    /// `Ok(())` if a call may proceed, otherwise the remaining cooldown.
    pub fn check(&self) -> Result<(), Duration> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open { tripped_at } => {
                let elapsed = tripped_at.elapsed();
                if elapsed >= self.cooldown {
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    Ok(())
                } else {
                    Err(self.cooldown - elapsed)
                }
            }
        }
    }

    /// Reset the consecutive failure count.
    pub fn record_success(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .consecutive_failures = 0;
    }

    /// Count a failure, opening the breaker at the threshold.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= self.failure_threshold {
            inner.state = BreakerState::Open {
                tripped_at: Instant::now(),
            };
        }
    }

    /// Open immediately, regardless of the failure count.
    pub fn trip(&self) {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).state = BreakerState::Open {
            tripped_at: Instant::now(),
        };
    }

    /// Current state as last recorded.
    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).state
    }
}
