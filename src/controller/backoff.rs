//! # Backoff
//!
//! Two backoff schedules:
//!
//! - [`ConflictBackoff`] drives the short local retry loop around a single
//!   mutator when the API server answers 409 Conflict
//!   (10ms, 50ms, 250ms for the default four attempts).
//! - [`FibonacciBackoff`] spaces out requeues of a Config whose reconcile
//!   keeps failing (5s, 5s, 10s, 15s, 25s, ... capped).
//!
//! ```rust
//! use image_registry_operator::controller::backoff::FibonacciBackoff;
//!
//! let mut backoff = FibonacciBackoff::new(5, 300);
//! assert_eq!(backoff.next_backoff_seconds(), 5);
//! assert_eq!(backoff.next_backoff_seconds(), 5);
//! assert_eq!(backoff.next_backoff_seconds(), 10);
//! ```

use crate::config::ControllerConfig;
use crate::error::Result;
use crate::observability::metrics;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Exponential schedule for optimistic-concurrency retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictBackoff {
    /// Total attempts, including the first one
    pub steps: u32,
    pub initial: Duration,
    pub factor: u32,
}

impl Default for ConflictBackoff {
    fn default() -> Self {
        Self {
            steps: 4,
            initial: Duration::from_millis(10),
            factor: 5,
        }
    }
}

impl ConflictBackoff {
    #[must_use]
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            steps: config.conflict_retry_steps.max(1),
            initial: Duration::from_millis(config.conflict_retry_base_ms),
            factor: config.conflict_retry_factor.max(1),
        }
    }

    /// Delay before attempt `attempt + 1`, counting from zero
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.initial
            .saturating_mul(self.factor.saturating_pow(attempt))
    }
}

/// Run `op` until it succeeds, fails with something other than a conflict,
/// or the attempts are exhausted. The last conflict is returned when the
/// budget runs out.
pub async fn retry_on_conflict<T, F, Fut>(
    backoff: &ConflictBackoff,
    kind: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(err) if err.is_conflict() && attempt + 1 < backoff.steps => {
                let delay = backoff.delay(attempt);
                debug!(
                    kind,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "conflict while applying object, retrying"
                );
                metrics::increment_conflict_retries(kind);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Fibonacci backoff calculator
///
/// Each backoff is the sum of the previous two, starting from `min_seconds`
/// twice and capped at `max_seconds`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_seconds: u64,
    prev_seconds: u64,
    current_seconds: u64,
    max_seconds: u64,
}

impl FibonacciBackoff {
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            min_seconds,
            prev_seconds: 0,
            current_seconds: min_seconds,
            max_seconds,
        }
    }

    /// Get the next backoff in seconds and advance the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result = self.current_seconds;
        let next = self.prev_seconds + self.current_seconds;
        self.prev_seconds = self.current_seconds;
        self.current_seconds = next.min(self.max_seconds);
        result
    }

    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.prev_seconds = 0;
        self.current_seconds = self.min_seconds;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{api_error, Error};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_fibonacci_sequence() {
        let mut backoff = FibonacciBackoff::new(5, 60);
        let seq: Vec<u64> = (0..8).map(|_| backoff.next_backoff_seconds()).collect();
        assert_eq!(seq, vec![5, 5, 10, 15, 25, 40, 60, 60]);
    }

    #[test]
    fn test_fibonacci_reset() {
        let mut backoff = FibonacciBackoff::new(5, 60);
        backoff.next_backoff_seconds();
        backoff.next_backoff_seconds();
        backoff.next_backoff_seconds();
        backoff.reset();
        assert_eq!(backoff.next_backoff(), Duration::from_secs(5));
    }

    #[test]
    fn test_conflict_delays() {
        let backoff = ConflictBackoff::default();
        assert_eq!(backoff.delay(0), Duration::from_millis(10));
        assert_eq!(backoff.delay(1), Duration::from_millis(50));
        assert_eq!(backoff.delay(2), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_steps() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let backoff = ConflictBackoff {
            steps: 3,
            initial: Duration::from_millis(1),
            factor: 1,
        };
        let result: Result<()> = retry_on_conflict(&backoff, "Test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Kube(api_error(409, "Conflict", "modified")))
        })
        .await;
        assert!(result.is_err_and(|e| e.is_conflict()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_does_not_retry_other_errors() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> =
            retry_on_conflict(&ConflictBackoff::default(), "Test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Kube(api_error(500, "InternalError", "etcd unavailable")))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
