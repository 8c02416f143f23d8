//! Limiter configuration.
//!
//! Build it in code with [`LimiterConfig::builder`] or load it from JSON with
//! [`LimiterConfig::from_json`]. Durations in JSON are milliseconds; missing
//! fields take the defaults below.
//!
//! ```rust
//! use quotagate::{FailurePolicy, LimiterConfig};
//! use std::time::Duration;
//!
//! let config = LimiterConfig::builder()
//!     .window(Duration::from_secs(60))
//!     .burst_window(Duration::from_secs(10))
//!     .failure_policy(FailurePolicy::FailClosed)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.window(), Duration::from_secs(60));
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;
use crate::quota::escalation::EscalationPolicy;
use crate::tier::TierTable;

const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
const DEFAULT_BURST_WINDOW: Duration = Duration::from_secs(10);
const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(50);
const DEFAULT_RELEASE_TIMEOUT: Duration = Duration::from_secs(30);

/// What to do when the quota store cannot be used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Admit the request and log the fault.
    #[default]
    FailOpen,
    /// Deny the request with `STORE_UNAVAILABLE` (HTTP 503).
    FailClosed,
}

/// Validated limiter configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct LimiterConfig {
    window: Duration,
    burst_window: Duration,
    retention: Duration,
    reap_interval: Duration,
    store_timeout: Duration,
    release_timeout: Duration,
    failure_policy: FailurePolicy,
    escalation: EscalationPolicy,
    tiers: TierTable,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            burst_window: DEFAULT_BURST_WINDOW,
            retention: DEFAULT_RETENTION,
            reap_interval: DEFAULT_REAP_INTERVAL,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            release_timeout: DEFAULT_RELEASE_TIMEOUT,
            failure_policy: FailurePolicy::default(),
            escalation: EscalationPolicy::default(),
            tiers: TierTable::default(),
        }
    }
}

impl LimiterConfig {
    /// Start from the defaults.
    pub fn builder() -> LimiterConfigBuilder {
        LimiterConfigBuilder { config: Self::default() }
    }

    /// Parse and validate a JSON document.
    ///
    /// ```rust
    /// use quotagate::{FailurePolicy, LimiterConfig};
    ///
    /// let config = LimiterConfig::from_json(r#"{ "window_ms": 30000, "failure_policy": "fail_closed" }"#).unwrap();
    /// assert_eq!(config.failure_policy(), FailurePolicy::FailClosed);
    /// ```
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(json)?;
        file.into_config()
    }

    /// Primary window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Burst window length.
    pub fn burst_window(&self) -> Duration {
        self.burst_window
    }

    /// Idle time after which a record is deleted.
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// How often the background reaper sweeps.
    pub fn reap_interval(&self) -> Duration {
        self.reap_interval
    }

    /// Upper bound for one admission decision or operator call, including
    /// retries after lost compare-and-swap races.
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    /// How long a concurrency slot release keeps retrying before giving up.
    pub fn release_timeout(&self) -> Duration {
        self.release_timeout
    }

    /// Behaviour on store failure.
    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Escalation ladder.
    pub fn escalation(&self) -> &EscalationPolicy {
        &self.escalation
    }

    /// Initial tier limits. Live limits are held by the engine.
    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("window", self.window),
            ("burst_window", self.burst_window),
            ("retention", self.retention),
            ("reap_interval", self.reap_interval),
            ("store_timeout", self.store_timeout),
            ("release_timeout", self.release_timeout),
        ];
        if let Some((field, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::ZeroDuration { field: *field });
        }
        self.tiers.validate()
    }
}

/// Builder for [`LimiterConfig`].
#[derive(Debug, Clone)]
pub struct LimiterConfigBuilder {
    config: LimiterConfig,
}

impl LimiterConfigBuilder {
    /// Primary window length.
    pub fn window(mut self, window: Duration) -> Self {
        self.config.window = window;
        self
    }

    /// Burst window length.
    pub fn burst_window(mut self, window: Duration) -> Self {
        self.config.burst_window = window;
        self
    }

    /// Idle retention before a record is reaped.
    pub fn retention(mut self, retention: Duration) -> Self {
        self.config.retention = retention;
        self
    }

    /// Background sweep interval.
    pub fn reap_interval(mut self, interval: Duration) -> Self {
        self.config.reap_interval = interval;
        self
    }

    /// Bound on each store call.
    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.config.store_timeout = timeout;
        self
    }

    /// Retry budget for releasing a concurrency slot.
    pub fn release_timeout(mut self, timeout: Duration) -> Self {
        self.config.release_timeout = timeout;
        self
    }

    /// Fail-open or fail-closed.
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    /// Escalation ladder.
    pub fn escalation(mut self, policy: EscalationPolicy) -> Self {
        self.config.escalation = policy;
        self
    }

    /// Tier limits.
    pub fn tiers(mut self, tiers: TierTable) -> Self {
        self.config.tiers = tiers;
        self
    }

    /// Validate and finish.
    pub fn build(self) -> Result<LimiterConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// On-disk shape of the config.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    window_ms: Option<u64>,
    burst_window_ms: Option<u64>,
    retention_ms: Option<u64>,
    reap_interval_ms: Option<u64>,
    store_timeout_ms: Option<u64>,
    release_timeout_ms: Option<u64>,
    failure_policy: Option<FailurePolicy>,
    escalation: Option<EscalationPolicy>,
    tiers: Option<TierTable>,
}

impl ConfigFile {
    fn into_config(self) -> Result<LimiterConfig, ConfigError> {
        let mut b = LimiterConfig::builder();
        if let Some(ms) = self.window_ms {
            b = b.window(Duration::from_millis(ms));
        }
        if let Some(ms) = self.burst_window_ms {
            b = b.burst_window(Duration::from_millis(ms));
        }
        if let Some(ms) = self.retention_ms {
            b = b.retention(Duration::from_millis(ms));
        }
        if let Some(ms) = self.reap_interval_ms {
            b = b.reap_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = self.store_timeout_ms {
            b = b.store_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.release_timeout_ms {
            b = b.release_timeout(Duration::from_millis(ms));
        }
        if let Some(p) = self.failure_policy {
            b = b.failure_policy(p);
        }
        if let Some(e) = self.escalation {
            b = b.escalation(e);
        }
        if let Some(t) = self.tiers {
            b = b.tiers(t);
        }
        b.build()
    }
}
