//! The per-identity quota record.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::quota::daily;
use crate::tier::Tier;

/// All counters tracked for one rate-limited identity.
///
/// Timestamps are milliseconds since the Unix epoch, read from the store clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRecord {
    /// Identity (wallet address, IP, or a composite).
    pub key: String,
    /// Plan the identity was on at its latest request.
    pub tier: Tier,
    /// Requests admitted in the current primary window.
    pub window_requests: u64,
    /// Start of the current primary window.
    pub window_start: u64,
    /// Requests admitted in the current burst window.
    pub burst_requests: u64,
    /// Start of the current burst window.
    pub burst_window_start: u64,
    /// Requests admitted since the last daily reset.
    pub daily_requests: u64,
    /// Next UTC midnight at which `daily_requests` resets.
    pub daily_reset_at: u64,
    /// Admitted requests that have not been released yet.
    pub active_requests: u32,
    /// Admitted requests per endpoint.
    #[serde(default)]
    pub endpoint_counts: BTreeMap<String, u64>,
    /// Denials recorded over the record's lifetime.
    pub violations: u32,
    /// When the latest denial happened.
    pub last_violation_at: Option<u64>,
    /// While in the future, every request is denied.
    pub blocked_until: Option<u64>,
    /// Latest request seen, admitted or not.
    pub last_request_at: u64,
}

/// Escalation state derived from a record at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Requests go through the quota checks.
    Active,
    /// Requests are denied until `until`.
    Blocked {
        /// End of the block, epoch millis.
        until: u64,
    },
}

impl BlockState {
    /// Check if this state denies requests.
    pub fn is_blocked(&self) -> bool {
        matches!(self, BlockState::Blocked { .. })
    }
}

impl QuotaRecord {
    /// A fresh record for the first request observed at `now`.
    pub fn new(key: impl Into<String>, tier: Tier, now: u64) -> Self {
        Self {
            key: key.into(),
            tier,
            window_requests: 0,
            window_start: now,
            burst_requests: 0,
            burst_window_start: now,
            daily_requests: 0,
            daily_reset_at: daily::next_utc_midnight(now),
            active_requests: 0,
            endpoint_counts: BTreeMap::new(),
            violations: 0,
            last_violation_at: None,
            blocked_until: None,
            last_request_at: now,
        }
    }

    /// Active or blocked at `now`. A block ends exactly at `blocked_until`.
    pub fn block_state(&self, now: u64) -> BlockState {
        match self.blocked_until {
            Some(until) if now < until => BlockState::Blocked { until },
            _ => BlockState::Active,
        }
    }

    /// True once the record has seen no request for `retention` and is not blocked.
    pub fn is_expired(&self, now: u64, retention: Duration) -> bool {
        let idle = now.saturating_sub(self.last_request_at);
        idle >= millis(retention) && !self.block_state(now).is_blocked()
    }

    /// Sync the tier label; returns true if it changed.
    pub fn refresh_tier(&mut self, tier: Tier) -> bool {
        if self.tier == tier {
            return false;
        }
        tracing::debug!(key = %self.key, from = %self.tier, to = %tier, "tier changed");
        self.tier = tier;
        true
    }
}

pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// A record together with the store version it was read at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned {
    /// Monotonic per-key version; 0 means "absent".
    pub version: u64,
    /// The record itself.
    pub record: QuotaRecord,
}
