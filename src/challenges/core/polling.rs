//! Bounded polling.
//!
//! Every suspension point in the acquisition flow (cookie clearance, oracle
//! polling, selector waits, mirror countdowns) goes through [`poll_until`], so
//! the timeout policy lives in one place and can be tested without a browser.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep, timeout};

/// Interval/deadline pair driving [`poll_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Policy that allows roughly `attempts` checks spaced by `interval`.
    pub fn from_attempts(interval: Duration, attempts: u32) -> Self {
        let attempts = attempts.max(1);
        Self {
            interval,
            timeout: interval.saturating_mul(attempts - 1),
        }
    }
}

/// Raised when the check never produced a value before the deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("condition not met after {attempts} attempt(s) in {elapsed:?}")]
pub struct PollTimeout {
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Repeatedly run `check` until it yields `Some`, sleeping `policy.interval`
/// between attempts.
///
/// The check always runs at least once. A check that itself hangs is cut off
/// at the deadline, so the whole call never outlives `policy.timeout` by more
/// than one interval.
pub async fn poll_until<T, F, Fut>(policy: PollPolicy, mut check: F) -> Result<T, PollTimeout>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let budget = deadline
            .saturating_duration_since(Instant::now())
            .max(policy.interval);

        if let Ok(Some(value)) = timeout(budget, check()).await {
            return Ok(value);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(PollTimeout {
                attempts,
                elapsed: now - started,
            });
        }

        sleep(policy.interval.min(deadline - now)).await;
    }
}
