//! Jittered exponential backoff for store retries.
//!
//! Delays are drawn uniformly from `[0, min(max, base * 2^(attempt - 1))]`
//! ("full jitter"), so writers that lost the same race do not retry in
//! lockstep.

use rand::{rng, Rng};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    /// Between attempts after a lost compare-and-swap.
    pub(crate) const CONTENTION: Backoff =
        Backoff { base: Duration::from_millis(1), max: Duration::from_millis(20) };

    /// Between attempts to return a concurrency slot.
    pub(crate) const RELEASE: Backoff = Backoff { base: Duration::from_millis(10), max: Duration::from_secs(1) };

    /// Upper bound of the delay before `attempt` (1-based).
    pub(crate) fn ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << exponent).min(self.max)
    }

    /// Randomized delay before `attempt`.
    pub(crate) fn delay(&self, attempt: u32) -> Duration {
        let micros = u64::try_from(self.ceiling(attempt).as_micros()).unwrap_or(u64::MAX);
        if micros == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(rng().random_range(0..=micros))
    }
}
