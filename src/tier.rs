//! Subscription tiers and the quota values attached to each of them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// A subscription plan. Ordered from least to most privileged.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Anonymous or unpaid callers.
    #[default]
    Free,
    /// Entry-level paid plan.
    Basic,
    /// Higher-volume paid plan.
    Premium,
    /// Contracted customers.
    Enterprise,
    /// Operators and internal tooling.
    Admin,
}

impl Tier {
    /// All tiers, least privileged first.
    pub const ALL: [Tier; 5] = [Tier::Free, Tier::Basic, Tier::Premium, Tier::Enterprise, Tier::Admin];

    /// Parse a tier label, falling back to [`Tier::Free`] for unknown or missing labels.
    ///
    /// Tier labels come from the subscription lookup; an unrecognised label must
    /// never grant more than the lowest-privilege quota.
    pub fn parse_or_default(label: &str) -> Tier {
        label.parse().unwrap_or_else(|_| {
            if !label.trim().is_empty() {
                tracing::debug!(label, "unknown tier label, using free tier");
            }
            Tier::Free
        })
    }

    /// Lowercase label, as used in serialized records and config files.
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Basic => "basic",
            Tier::Premium => "premium",
            Tier::Enterprise => "enterprise",
            Tier::Admin => "admin",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned by `Tier::from_str` for labels that name no tier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown tier '{0}'")]
pub struct UnknownTier(pub String);

impl FromStr for Tier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "basic" => Ok(Tier::Basic),
            "premium" => Ok(Tier::Premium),
            "enterprise" => Ok(Tier::Enterprise),
            "admin" => Ok(Tier::Admin),
            other => Err(UnknownTier(other.to_string())),
        }
    }
}

/// Quota values for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    /// Requests allowed per primary window.
    pub window_max: u64,
    /// Requests allowed per burst window.
    pub burst_max: u64,
    /// Requests allowed per UTC day.
    pub daily_max: u64,
    /// Requests allowed in flight at once.
    pub max_concurrent: u32,
}

impl TierLimits {
    /// Build limits, rejecting zero values.
    pub fn new(
        window_max: u64,
        burst_max: u64,
        daily_max: u64,
        max_concurrent: u32,
    ) -> Result<Self, ConfigError> {
        let limits = Self { window_max, burst_max, daily_max, max_concurrent };
        limits.validate()?;
        Ok(limits)
    }

    /// Check that every limit admits at least one request.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = if self.window_max == 0 {
            Some("window_max")
        } else if self.burst_max == 0 {
            Some("burst_max")
        } else if self.daily_max == 0 {
            Some("daily_max")
        } else if self.max_concurrent == 0 {
            Some("max_concurrent")
        } else {
            None
        };
        match zero {
            Some(field) => Err(ConfigError::ZeroLimit { field }),
            None => Ok(()),
        }
    }
}

/// Limits for every tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TierTable {
    limits: BTreeMap<Tier, TierLimits>,
}

impl TierTable {
    /// Limits for `tier`. Tiers missing from the table get the free-tier limits,
    /// and a table without a free entry falls back to the built-in free limits.
    pub fn limits(&self, tier: Tier) -> TierLimits {
        self.limits
            .get(&tier)
            .or_else(|| self.limits.get(&Tier::Free))
            .copied()
            .unwrap_or(FREE)
    }

    /// Replace the limits for one tier.
    pub fn with_limits(mut self, tier: Tier, limits: TierLimits) -> Result<Self, ConfigError> {
        limits.validate()?;
        self.insert(tier, limits);
        Ok(self)
    }

    pub(crate) fn insert(&mut self, tier: Tier, limits: TierLimits) {
        self.limits.insert(tier, limits);
    }

    /// Iterate over configured tiers.
    pub fn iter(&self) -> impl Iterator<Item = (Tier, TierLimits)> + '_ {
        self.limits.iter().map(|(t, l)| (*t, *l))
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        self.limits.values().try_for_each(TierLimits::validate)
    }
}

const FREE: TierLimits =
    TierLimits { window_max: 100, burst_max: 10, daily_max: 1_000, max_concurrent: 5 };

impl Default for TierTable {
    fn default() -> Self {
        let mut limits = BTreeMap::new();
        limits.insert(Tier::Free, FREE);
        limits.insert(
            Tier::Basic,
            TierLimits { window_max: 500, burst_max: 50, daily_max: 10_000, max_concurrent: 10 },
        );
        limits.insert(
            Tier::Premium,
            TierLimits { window_max: 2_000, burst_max: 200, daily_max: 100_000, max_concurrent: 25 },
        );
        limits.insert(
            Tier::Enterprise,
            TierLimits {
                window_max: 10_000,
                burst_max: 1_000,
                daily_max: 1_000_000,
                max_concurrent: 100,
            },
        );
        limits.insert(
            Tier::Admin,
            TierLimits {
                window_max: 100_000,
                burst_max: 10_000,
                daily_max: 10_000_000,
                max_concurrent: 1_000,
            },
        );
        Self { limits }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_labels_fall_back_to_free() {
        assert_eq!(Tier::parse_or_default("PREMIUM"), Tier::Premium);
        assert_eq!(Tier::parse_or_default(" enterprise "), Tier::Enterprise);
        assert_eq!(Tier::parse_or_default("platinum"), Tier::Free);
        assert_eq!(Tier::parse_or_default(""), Tier::Free);
    }

    #[test]
    fn tiers_are_ordered_by_privilege() {
        assert!(Tier::Free < Tier::Basic);
        assert!(Tier::Enterprise < Tier::Admin);
        assert_eq!(Tier::ALL.iter().max(), Some(&Tier::Admin));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let err = TierLimits::new(10, 0, 100, 1).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroLimit { field: "burst_max" }));
        assert!(TierLimits::new(1, 1, 1, 1).is_ok());
    }

    #[test]
    fn default_table_matches_free_plan() {
        let table = TierTable::default();
        let free = table.limits(Tier::Free);
        assert_eq!(free.window_max, 100);
        assert_eq!(free.burst_max, 10);
        assert!(table.limits(Tier::Admin).window_max > table.limits(Tier::Enterprise).window_max);
    }

    #[test]
    fn serde_uses_lowercase_labels() {
        let json = serde_json::to_string(&Tier::Enterprise).unwrap();
        assert_eq!(json, "\"enterprise\"");
        let back: Tier = serde_json::from_str("\"basic\"").unwrap();
        assert_eq!(back, Tier::Basic);
    }
}
