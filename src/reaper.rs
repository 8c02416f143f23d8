//! Idle-record cleanup and aggregate statistics.
//!
//! Records idle for longer than the configured retention are deleted, unless
//! a block is still running. Deletion is version-checked so a request that
//! touches the record mid-sweep wins over the reaper.

use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::engine::QuotaEngine;
use crate::error::StoreError;
use crate::store::QuotaStore;
use crate::telemetry::{AdmissionEvent, TelemetrySink};
use crate::tier::Tier;

/// Aggregate view over every stored record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QuotaStats {
    /// Records held by the store.
    pub total_records: usize,
    /// Records serving a block right now.
    pub blocked_records: usize,
    /// Sum of in-flight requests.
    pub active_requests: u64,
    /// Record count per tier.
    pub by_tier: BTreeMap<Tier, usize>,
}

impl<S, T> QuotaEngine<S, T>
where
    S: QuotaStore + 'static,
    T: TelemetrySink + Sync,
    T::Future: Send,
{
    /// Delete every record idle past retention. Returns how many went.
    ///
    /// Each store call is bounded by the store timeout.
    pub async fn sweep(&self) -> Result<usize, StoreError> {
        let store = self.store();
        let retention = self.config().retention();
        let now = self.guarded(store.now_millis()).await?;

        let mut removed = 0;
        for entry in self.guarded(store.scan()).await? {
            if !entry.record.is_expired(now, retention) {
                continue;
            }
            if self.guarded(store.compare_and_delete(&entry.record.key, entry.version)).await? {
                tracing::trace!(key = %entry.record.key, "idle quota record reaped");
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::debug!(removed, "quota sweep finished");
            self.emit(AdmissionEvent::Reaped { removed }).await;
        }
        Ok(removed)
    }

    /// Totals over every stored record.
    pub async fn get_stats(&self) -> Result<QuotaStats, StoreError> {
        let store = self.store();
        let now = self.guarded(store.now_millis()).await?;
        let mut stats = QuotaStats::default();
        for entry in self.guarded(store.scan()).await? {
            let record = entry.record;
            stats.total_records += 1;
            if record.block_state(now).is_blocked() {
                stats.blocked_records += 1;
            }
            stats.active_requests += u64::from(record.active_requests);
            *stats.by_tier.entry(record.tier).or_default() += 1;
        }
        Ok(stats)
    }

    /// Sweep every `reap_interval` on a background task.
    ///
    /// The reaper stops when the handle is shut down or dropped.
    pub fn spawn_reaper(&self) -> ReaperHandle {
        let engine = self.clone();
        let period = self.config().reap_interval();
        let (shutdown, mut stop) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = ticker.tick() => {
                        if let Err(err) = engine.sweep().await {
                            tracing::warn!(error = %err, "quota sweep failed");
                        }
                    }
                }
            }
            tracing::debug!("quota reaper stopped");
        });

        ReaperHandle { shutdown: Some(shutdown), task }
    }
}

/// Handle to a running reaper task.
#[derive(Debug)]
pub struct ReaperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Stop the reaper and wait for an in-progress sweep to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(err) = (&mut self.task).await {
            tracing::warn!(error = %err, "quota reaper task ended abnormally");
        }
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::LimiterConfig;
    use crate::record::QuotaRecord;
    use crate::store::InMemoryQuotaStore;
    use std::time::Duration;

    const T0: u64 = 1_710_028_800_000;
    const HOUR: u64 = 3_600_000;

    fn engine(clock: &ManualClock) -> QuotaEngine<InMemoryQuotaStore> {
        let config = LimiterConfig::builder()
            .retention(Duration::from_millis(HOUR))
            .build()
            .unwrap();
        QuotaEngine::new(InMemoryQuotaStore::with_clock(clock.clone()), config)
    }

    #[tokio::test]
    async fn sweep_keeps_recent_and_blocked_records() {
        let clock = ManualClock::new(T0);
        let e = engine(&clock);
        e.find_or_create("idle", Tier::Free).await.unwrap();

        let mut blocked = QuotaRecord::new("blocked", Tier::Free, T0);
        blocked.blocked_until = Some(T0 + 2 * HOUR);
        e.store().force_insert(blocked);

        clock.advance(HOUR - 1);
        e.find_or_create("fresh", Tier::Basic).await.unwrap();
        assert_eq!(e.sweep().await.unwrap(), 0);

        clock.advance(1);
        assert_eq!(e.sweep().await.unwrap(), 1);
        assert!(e.inspect("idle").await.unwrap().is_none());
        assert!(e.inspect("blocked").await.unwrap().is_some());
        assert!(e.inspect("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stats_aggregate_records() {
        let clock = ManualClock::new(T0);
        let e = engine(&clock);
        assert!(e.evaluate("a", Tier::Free, "/x").await.is_allowed());
        assert!(e.evaluate("b", Tier::Premium, "/x").await.is_allowed());
        assert!(e.evaluate("b", Tier::Premium, "/y").await.is_allowed());
        let mut blocked = QuotaRecord::new("c", Tier::Free, T0);
        blocked.blocked_until = Some(T0 + 1);
        e.store().force_insert(blocked);

        let stats = e.get_stats().await.unwrap();
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.blocked_records, 1);
        assert_eq!(stats.active_requests, 3);
        assert_eq!(stats.by_tier.get(&Tier::Free), Some(&2));
        assert_eq!(stats.by_tier.get(&Tier::Premium), Some(&1));
    }

    /// Answers everything except `scan`, which hangs.
    #[derive(Debug, Default)]
    struct HangingScan(InMemoryQuotaStore);

    #[async_trait::async_trait]
    impl QuotaStore for HangingScan {
        async fn now_millis(&self) -> Result<u64, StoreError> {
            self.0.now_millis().await
        }
        async fn load(&self, key: &str) -> Result<Option<crate::record::Versioned>, StoreError> {
            self.0.load(key).await
        }
        async fn compare_and_swap(&self, key: &str, version: u64, record: &QuotaRecord) -> Result<bool, StoreError> {
            self.0.compare_and_swap(key, version, record).await
        }
        async fn compare_and_delete(&self, key: &str, version: u64) -> Result<bool, StoreError> {
            self.0.compare_and_delete(key, version).await
        }
        async fn remove(&self, key: &str) -> Result<bool, StoreError> {
            self.0.remove(key).await
        }
        async fn scan(&self) -> Result<Vec<crate::record::Versioned>, StoreError> {
            futures::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_and_stats_are_bounded_by_store_timeout() {
        let e = QuotaEngine::new(HangingScan::default(), LimiterConfig::default());
        assert!(e.sweep().await.unwrap_err().is_timeout());
        assert!(e.get_stats().await.unwrap_err().is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn background_reaper_sweeps_and_stops() {
        let clock = ManualClock::new(T0);
        let e = engine(&clock);
        e.find_or_create("idle", Tier::Free).await.unwrap();
        clock.advance(HOUR);

        let handle = e.spawn_reaper();
        tokio::time::sleep(e.config().reap_interval() + Duration::from_millis(1)).await;
        assert!(e.store().is_empty());

        handle.shutdown().await;
    }
}
