//! Progressive blocking for repeat offenders.
//!
//! Each denial bumps the record's violation count. Once the count reaches a
//! threshold the identity is blocked for that threshold's duration; the count
//! is never reset, so later denials escalate further.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;
use crate::record::{millis, QuotaRecord};

/// One rung of the escalation ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationStep {
    /// Violation count at which this step applies.
    pub min_violations: u32,
    /// Block length in milliseconds.
    pub block_ms: u64,
}

impl EscalationStep {
    /// Create a step.
    pub fn new(min_violations: u32, block_for: Duration) -> Self {
        Self { min_violations, block_ms: millis(block_for) }
    }

    /// Block length.
    pub fn block_for(&self) -> Duration {
        Duration::from_millis(self.block_ms)
    }
}

/// Violation thresholds and their block durations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<EscalationStep>", into = "Vec<EscalationStep>")]
pub struct EscalationPolicy {
    /// Sorted by `min_violations`, highest first.
    steps: Vec<EscalationStep>,
}

impl EscalationPolicy {
    /// Build a policy from steps in any order.
    ///
    /// # Errors
    /// Rejects zero thresholds, zero-length blocks and duplicate thresholds.
    pub fn new(mut steps: Vec<EscalationStep>) -> Result<Self, ConfigError> {
        if let Some(step) = steps.iter().find(|s| s.min_violations == 0) {
            return Err(ConfigError::Escalation(format!(
                "threshold must be > 0 (step blocking for {}ms)",
                step.block_ms
            )));
        }
        if let Some(step) = steps.iter().find(|s| s.block_ms == 0) {
            return Err(ConfigError::Escalation(format!(
                "block at {} violations must be non-zero",
                step.min_violations
            )));
        }
        steps.sort_by(|a, b| b.min_violations.cmp(&a.min_violations));
        if steps.windows(2).any(|w| w[0].min_violations == w[1].min_violations) {
            return Err(ConfigError::Escalation("duplicate violation threshold".into()));
        }
        Ok(Self { steps })
    }

    /// A policy that records violations but never blocks.
    pub fn never() -> Self {
        Self { steps: Vec::new() }
    }

    /// Block length for an identity with `violations` denials; first match from
    /// the highest threshold down wins.
    pub fn block_for(&self, violations: u32) -> Option<Duration> {
        self.steps
            .iter()
            .find(|s| violations >= s.min_violations)
            .map(EscalationStep::block_for)
    }

    /// Steps, highest threshold first.
    pub fn steps(&self) -> &[EscalationStep] {
        &self.steps
    }
}

impl Default for EscalationPolicy {
    /// 3 violations → 5 min, 5 → 15 min, 10 → 1 h.
    fn default() -> Self {
        Self {
            steps: vec![
                EscalationStep::new(10, Duration::from_secs(3_600)),
                EscalationStep::new(5, Duration::from_secs(900)),
                EscalationStep::new(3, Duration::from_secs(300)),
            ],
        }
    }
}

impl TryFrom<Vec<EscalationStep>> for EscalationPolicy {
    type Error = ConfigError;

    fn try_from(steps: Vec<EscalationStep>) -> Result<Self, Self::Error> {
        Self::new(steps)
    }
}

impl From<EscalationPolicy> for Vec<EscalationStep> {
    fn from(policy: EscalationPolicy) -> Self {
        policy.steps
    }
}

/// Record one denial at `now`. Returns the block end if this denial blocks.
///
/// `blocked_until` only moves forward: a shorter block never truncates a
/// longer one that is still running.
pub fn record_violation(record: &mut QuotaRecord, policy: &EscalationPolicy, now: u64) -> Option<u64> {
    record.violations = record.violations.saturating_add(1);
    record.last_violation_at = Some(now);

    let block = policy.block_for(record.violations)?;
    let until = now.saturating_add(millis(block));
    let until = record.blocked_until.map_or(until, |current| current.max(until));
    record.blocked_until = Some(until);
    Some(until)
}
