//! Admission decisions and the HTTP metadata derived from them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Why a request was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenyReason {
    /// The short burst window is full.
    BurstLimitExceeded,
    /// The primary window is full.
    WindowLimitExceeded,
    /// The calendar-day quota is exhausted.
    DailyLimitExceeded,
    /// Too many requests in flight for this identity.
    ConcurrencyLimitExceeded,
    /// The identity is serving an escalated block.
    Blocked,
    /// The quota store failed and the engine is configured to fail closed.
    StoreUnavailable,
    /// Concurrent requests for the same identity kept winning the store
    /// update; retry shortly.
    StoreContention,
}

impl DenyReason {
    /// Stable machine-readable code.
    pub fn code(self) -> &'static str {
        match self {
            DenyReason::BurstLimitExceeded => "BURST_LIMIT_EXCEEDED",
            DenyReason::WindowLimitExceeded => "WINDOW_LIMIT_EXCEEDED",
            DenyReason::DailyLimitExceeded => "DAILY_LIMIT_EXCEEDED",
            DenyReason::ConcurrencyLimitExceeded => "CONCURRENCY_LIMIT_EXCEEDED",
            DenyReason::Blocked => "BLOCKED",
            DenyReason::StoreUnavailable => "STORE_UNAVAILABLE",
            DenyReason::StoreContention => "STORE_CONTENTION",
        }
    }

    /// HTTP status a server should answer with.
    pub fn http_status(self) -> u16 {
        match self {
            DenyReason::StoreUnavailable => 503,
            _ => 429,
        }
    }

    /// Whether the denial counts against the identity's violation record.
    pub fn is_quota_violation(self) -> bool {
        !matches!(self, DenyReason::Blocked | DenyReason::StoreUnavailable | DenyReason::StoreContention)
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// The decision returned by the quota engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed.
    Allowed {
        /// Primary window cap for the identity's tier.
        limit: u64,
        /// Requests left in the primary window after this one.
        remaining: u64,
        /// Time until the primary window resets.
        reset_after: Duration,
        /// The store failed and the engine failed open: no concurrency slot was
        /// taken, so there is nothing to release.
        degraded: bool,
    },
    /// The request is denied.
    Denied {
        /// Which check refused the request.
        reason: DenyReason,
        /// How long the caller should wait before retrying.
        retry_after: Duration,
        /// Cap of the check that refused the request.
        limit: u64,
        /// Time until that check's window resets.
        reset_after: Duration,
    },
}

impl Decision {
    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// Denial reason, if denied.
    pub fn reason(&self) -> Option<DenyReason> {
        match self {
            Decision::Denied { reason, .. } => Some(*reason),
            Decision::Allowed { .. } => None,
        }
    }

    /// Reason code, or `"ALLOWED"`.
    pub fn reason_code(&self) -> &'static str {
        self.reason().map_or("ALLOWED", DenyReason::code)
    }

    /// Retry delay for denied requests.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Decision::Denied { retry_after, .. } => Some(*retry_after),
            Decision::Allowed { .. } => None,
        }
    }

    /// HTTP status for the response: 200 when allowed.
    pub fn http_status(&self) -> u16 {
        self.reason().map_or(200, DenyReason::http_status)
    }

    /// Recommended response headers.
    pub fn headers(&self) -> RateLimitHeaders {
        match self {
            Decision::Allowed { limit, remaining, reset_after, .. } => RateLimitHeaders {
                limit: *limit,
                remaining: *remaining,
                reset_secs: ceil_secs(*reset_after),
                retry_after_secs: None,
            },
            Decision::Denied { limit, reset_after, retry_after, .. } => RateLimitHeaders {
                limit: *limit,
                remaining: 0,
                reset_secs: ceil_secs(*reset_after),
                retry_after_secs: Some(ceil_secs(*retry_after).max(1)),
            },
        }
    }
}

/// Values for `X-RateLimit-*` and `Retry-After` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitHeaders {
    /// `X-RateLimit-Limit`.
    pub limit: u64,
    /// `X-RateLimit-Remaining`.
    pub remaining: u64,
    /// `X-RateLimit-Reset`, seconds until the window resets.
    pub reset_secs: u64,
    /// `Retry-After`, seconds; only present on denials.
    pub retry_after_secs: Option<u64>,
}

impl RateLimitHeaders {
    /// Header name/value pairs, ready to copy into any HTTP response type.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset_secs.to_string()),
        ];
        if let Some(secs) = self.retry_after_secs {
            pairs.push(("Retry-After", secs.to_string()));
        }
        pairs
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}
