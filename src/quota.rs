//! Quota evaluators.
//!
//! Each evaluator is a pure function over a [`QuotaRecord`]:
//! - [`window`]: fixed windows, used for both the burst guard and the primary window.
//! - [`daily`]: the calendar-day quota.
//! - [`concurrency`]: in-flight accounting.
//! - [`escalation`]: violation counting and progressive blocks.
//! - [`endpoint`]: per-endpoint tallies.
//!
//! [`evaluate`] composes them into one mutation so that a whole admission
//! decision is applied to the store in a single atomic step.
//!
//! # Order
//!
//! block → burst → window → daily → concurrency. A blocked identity is
//! rejected before any counter is looked at. A denied request consumes no
//! quota anywhere: counters only advance when every check passes, and only the
//! violation is recorded otherwise. Expired windows are still rolled over.

pub mod concurrency;
pub mod daily;
pub mod endpoint;
pub mod escalation;
pub mod window;

use crate::decision::DenyReason;
use crate::record::{millis, BlockState, QuotaRecord};
use crate::tier::TierLimits;
use escalation::EscalationPolicy;
use window::FixedWindow;

/// Everything a single evaluation needs besides the record.
#[derive(Debug, Clone, Copy)]
pub struct Evaluation<'a> {
    /// Limits for the caller's tier.
    pub limits: TierLimits,
    /// Primary window length in milliseconds.
    pub window_ms: u64,
    /// Burst window length in milliseconds.
    pub burst_window_ms: u64,
    /// Escalation ladder.
    pub escalation: &'a EscalationPolicy,
    /// Endpoint being requested.
    pub endpoint: &'a str,
}

/// Result of evaluating one request against a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// All checks passed; counters advanced and a concurrency slot was taken.
    Admitted {
        /// Primary window cap.
        limit: u64,
        /// Primary window requests left.
        remaining: u64,
        /// Milliseconds until the primary window resets.
        reset_after_ms: u64,
        /// In-flight requests including this one.
        active: u32,
    },
    /// A quota check refused the request; a violation was recorded.
    Denied {
        /// Which check refused.
        reason: DenyReason,
        /// Cap of that check.
        limit: u64,
        /// Milliseconds until that check's window resets.
        reset_after_ms: u64,
        /// Suggested wait, extended to the end of any block this denial started.
        retry_after_ms: u64,
        /// Violation count after this denial.
        violations: u32,
        /// Block end if the identity is now blocked.
        blocked_until: Option<u64>,
    },
    /// The identity is serving a block; the record was not touched.
    Blocked {
        /// Block end.
        until: u64,
        /// Primary window cap.
        limit: u64,
        /// Violation count.
        violations: u32,
    },
}

impl Verdict {
    /// Whether the record must be written back.
    pub fn mutates_record(&self) -> bool {
        !matches!(self, Verdict::Blocked { .. })
    }
}

/// Evaluate one request at `now`, mutating `record` in place.
pub fn evaluate(record: &mut QuotaRecord, eval: &Evaluation<'_>, now: u64) -> Verdict {
    let limits = eval.limits;

    if let BlockState::Blocked { until } = record.block_state(now) {
        return Verdict::Blocked { until, limit: limits.window_max, violations: record.violations };
    }

    record.last_request_at = now;

    let burst = FixedWindow::new(limits.burst_max, eval.burst_window_ms);
    let primary = FixedWindow::new(limits.window_max, eval.window_ms);
    burst.roll(&mut record.burst_requests, &mut record.burst_window_start, now);
    primary.roll(&mut record.window_requests, &mut record.window_start, now);
    daily::roll(record, now);

    let denial = if !burst.has_headroom(record.burst_requests) {
        Some((
            DenyReason::BurstLimitExceeded,
            burst.max,
            burst.reset_after(record.burst_window_start, now),
        ))
    } else if !primary.has_headroom(record.window_requests) {
        Some((
            DenyReason::WindowLimitExceeded,
            primary.max,
            primary.reset_after(record.window_start, now),
        ))
    } else if !daily::has_headroom(record, limits.daily_max) {
        Some((
            DenyReason::DailyLimitExceeded,
            limits.daily_max,
            record.daily_reset_at.saturating_sub(now),
        ))
    } else if !concurrency::has_slot(record, limits.max_concurrent) {
        Some((
            DenyReason::ConcurrencyLimitExceeded,
            u64::from(limits.max_concurrent),
            millis(concurrency::CONCURRENCY_RETRY_AFTER),
        ))
    } else {
        None
    };

    if let Some((reason, limit, reset_after_ms)) = denial {
        let blocked_until = escalation::record_violation(record, eval.escalation, now);
        let retry_after_ms =
            blocked_until.map_or(reset_after_ms, |until| until.saturating_sub(now).max(reset_after_ms));
        return Verdict::Denied {
            reason,
            limit,
            reset_after_ms,
            retry_after_ms,
            violations: record.violations,
            blocked_until,
        };
    }

    record.burst_requests += 1;
    record.window_requests += 1;
    record.daily_requests += 1;
    concurrency::try_acquire(record, limits.max_concurrent);
    endpoint::record(record, eval.endpoint);

    Verdict::Admitted {
        limit: primary.max,
        remaining: primary.remaining(record.window_requests),
        reset_after_ms: primary.reset_after(record.window_start, now),
        active: record.active_requests,
    }
}
