//! Operator commands.
//!
//! A transport-agnostic admin surface: transports decode an [`AdminCommand`]
//! (the JSON shape is `{"cmd": "reset_key", "key": "..."}`) and hand it to an
//! [`AdminService`], which is an ordinary `tower::Service`. Every command is
//! logged before it runs.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::task::{Context, Poll};
use tower::Service;
use tracing::info;

use crate::engine::QuotaEngine;
use crate::error::{ConfigError, StoreError};
use crate::reaper::QuotaStats;
use crate::record::QuotaRecord;
use crate::store::QuotaStore;
use crate::telemetry::TelemetrySink;
use crate::tier::{Tier, TierLimits, TierTable};

/// Commands an operator can issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum AdminCommand {
    /// Forget all counters, violations and blocks for a key.
    ResetKey {
        /// Identity key.
        key: String,
    },
    /// Aggregate statistics.
    GetStats,
    /// Replace one tier's limits.
    AdjustTierLimits {
        /// Tier to change.
        tier: Tier,
        /// New limits.
        limits: TierLimits,
    },
    /// Dump the record for a key.
    InspectKey {
        /// Identity key.
        key: String,
    },
    /// Current limits for every tier.
    ListTiers,
    /// Run one reaper sweep now.
    Sweep,
}

impl AdminCommand {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            AdminCommand::ResetKey { .. } => "reset_key",
            AdminCommand::GetStats => "get_stats",
            AdminCommand::AdjustTierLimits { .. } => "adjust_tier_limits",
            AdminCommand::InspectKey { .. } => "inspect_key",
            AdminCommand::ListTiers => "list_tiers",
            AdminCommand::Sweep => "sweep",
        }
    }
}

/// Result of an admin command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AdminResponse {
    /// The key was reset.
    Reset {
        /// Identity key.
        key: String,
        /// Whether a record existed.
        existed: bool,
    },
    /// Aggregate statistics.
    Stats(QuotaStats),
    /// Limits were replaced.
    TierLimitsAdjusted {
        /// Tier changed.
        tier: Tier,
        /// Limits now in force.
        limits: TierLimits,
    },
    /// Stored record, if any.
    Record {
        /// The record.
        record: Option<QuotaRecord>,
    },
    /// Live tier limits.
    Tiers {
        /// Limits per tier.
        tiers: TierTable,
    },
    /// A sweep ran.
    Swept {
        /// Records removed.
        removed: usize,
    },
}

/// Errors returned by admin commands.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    /// The quota store failed.
    #[error("store: {0}")]
    Store(#[from] StoreError),
    /// The command carried invalid limits.
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    /// The command could not be decoded.
    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Executes [`AdminCommand`]s against an engine.
pub struct AdminService<S, T> {
    engine: QuotaEngine<S, T>,
}

impl<S, T> Clone for AdminService<S, T> {
    fn clone(&self) -> Self {
        Self { engine: self.engine.clone() }
    }
}

impl<S, T> AdminService<S, T>
where
    S: QuotaStore + 'static,
    T: TelemetrySink + Sync,
    T::Future: Send,
{
    /// Admin surface for `engine`.
    pub fn new(engine: QuotaEngine<S, T>) -> Self {
        Self { engine }
    }

    /// Run one command.
    pub async fn handle(&self, cmd: AdminCommand) -> Result<AdminResponse, AdminError> {
        info!(cmd = cmd.label(), "admin command");
        let engine = &self.engine;
        let response = match cmd {
            AdminCommand::ResetKey { key } => {
                let existed = engine.reset_key(&key).await?;
                AdminResponse::Reset { key, existed }
            }
            AdminCommand::GetStats => AdminResponse::Stats(engine.get_stats().await?),
            AdminCommand::AdjustTierLimits { tier, limits } => {
                engine.adjust_tier_limits(tier, limits).await?;
                AdminResponse::TierLimitsAdjusted { tier, limits: engine.tier_limits(tier) }
            }
            AdminCommand::InspectKey { key } => {
                AdminResponse::Record { record: engine.inspect(&key).await? }
            }
            AdminCommand::ListTiers => {
                AdminResponse::Tiers { tiers: engine.tier_table().as_ref().clone() }
            }
            AdminCommand::Sweep => AdminResponse::Swept { removed: engine.sweep().await? },
        };
        Ok(response)
    }

    /// Decode a JSON command, run it, and encode the response.
    pub async fn handle_json(&self, json: &str) -> Result<String, AdminError> {
        let cmd: AdminCommand = serde_json::from_str(json)?;
        let response = self.handle(cmd).await?;
        Ok(serde_json::to_string(&response)?)
    }
}

impl<S, T> Service<AdminCommand> for AdminService<S, T>
where
    S: QuotaStore + 'static,
    T: TelemetrySink + Sync,
    T::Future: Send,
{
    type Response = AdminResponse;
    type Error = AdminError;
    type Future = BoxFuture<'static, Result<AdminResponse, AdminError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, cmd: AdminCommand) -> Self::Future {
        let svc = self.clone();
        Box::pin(async move { svc.handle(cmd).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimiterConfig;
    use crate::store::InMemoryQuotaStore;
    use crate::telemetry::NullSink;
    use tower::ServiceExt;

    fn service() -> AdminService<InMemoryQuotaStore, NullSink> {
        AdminService::new(QuotaEngine::new(InMemoryQuotaStore::new(), LimiterConfig::default()))
    }

    #[test]
    fn commands_decode_from_tagged_json() {
        let cmd: AdminCommand = serde_json::from_str(
            r#"{"cmd":"adjust_tier_limits","tier":"basic","limits":{"window_max":1,"burst_max":1,"daily_max":1,"max_concurrent":1}}"#,
        )
        .unwrap();
        assert_eq!(cmd.label(), "adjust_tier_limits");
        let cmd: AdminCommand = serde_json::from_str(r#"{"cmd":"get_stats"}"#).unwrap();
        assert_eq!(cmd, AdminCommand::GetStats);
    }

    #[tokio::test]
    async fn service_resets_and_inspects() {
        let svc = service();
        svc.engine.find_or_create("wallet-A", Tier::Basic).await.unwrap();

        let out = svc.clone().oneshot(AdminCommand::InspectKey { key: "wallet-A".into() }).await.unwrap();
        assert!(matches!(out, AdminResponse::Record { record: Some(ref r) } if r.tier == Tier::Basic));

        let out = svc.clone().oneshot(AdminCommand::ResetKey { key: "wallet-A".into() }).await.unwrap();
        assert_eq!(out, AdminResponse::Reset { key: "wallet-A".into(), existed: true });

        let out = svc.oneshot(AdminCommand::InspectKey { key: "wallet-A".into() }).await.unwrap();
        assert_eq!(out, AdminResponse::Record { record: None });
    }

    #[tokio::test]
    async fn invalid_limits_are_refused() {
        let svc = service();
        let err = svc
            .handle_json(r#"{"cmd":"adjust_tier_limits","tier":"free","limits":{"window_max":0,"burst_max":1,"daily_max":1,"max_concurrent":1}}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Config(ConfigError::ZeroLimit { field: "window_max" })));
        assert!(matches!(svc.handle_json("{\"cmd\":\"nope\"}").await, Err(AdminError::Decode(_))));
    }

    #[tokio::test]
    async fn stats_encode_as_json() {
        let svc = service();
        svc.engine.evaluate("wallet-A", Tier::Free, "/a").await;
        let json = svc.handle_json(r#"{"cmd":"get_stats"}"#).await.unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["result"], "stats");
        assert_eq!(v["total_records"], 1);
        assert_eq!(v["by_tier"]["free"], 1);
    }
}
