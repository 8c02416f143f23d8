//! The admission engine.
//!
//! One [`QuotaEngine`] is built per deployment and handed to the request
//! pipeline; clones share the same store handle, tier limits and telemetry
//! sink. Each decision is one atomic read-modify-write against the store.

use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::adaptive::DynamicConfig;
use crate::backoff::Backoff;
use crate::config::{FailurePolicy, LimiterConfig};
use crate::decision::{Decision, DenyReason};
use crate::error::{AdmissionError, ConfigError, StoreError};
use crate::quota::{self, concurrency, Evaluation, Verdict};
use crate::record::{millis, BlockState, QuotaRecord};
use crate::store::{atomic_apply, Apply, QuotaStore};
use crate::telemetry::{emit_best_effort, AdmissionEvent, NullSink, TelemetrySink};
use crate::tier::{Tier, TierLimits, TierTable};

/// Suggested wait when the engine fails closed.
const STORE_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Suggested wait after losing the update race for a busy identity.
const CONTENTION_RETRY_AFTER: Duration = Duration::from_millis(100);

/// Longest budget a single call may be given, whatever the config says.
const MAX_BUDGET: Duration = Duration::from_secs(24 * 60 * 60);

/// Who is asking for what. Supplied by the authentication and routing layers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subject {
    /// Identity key (wallet address, IP, or a composite).
    pub key: String,
    /// Current plan.
    pub tier: Tier,
    /// Endpoint identifier from the router.
    pub endpoint: String,
}

impl Subject {
    /// Create a subject.
    pub fn new(key: impl Into<String>, tier: Tier, endpoint: impl Into<String>) -> Self {
        Self { key: key.into(), tier, endpoint: endpoint.into() }
    }

    /// Create a subject from a raw tier label; unknown labels map to [`Tier::Free`].
    pub fn from_label(key: impl Into<String>, tier_label: &str, endpoint: impl Into<String>) -> Self {
        Self::new(key, Tier::parse_or_default(tier_label), endpoint)
    }
}

struct EngineInner<S, T> {
    store: S,
    config: LimiterConfig,
    tiers: DynamicConfig<TierTable>,
    sink: T,
}

/// Tiered admission-control engine.
pub struct QuotaEngine<S, T = NullSink> {
    inner: Arc<EngineInner<S, T>>,
}

impl<S, T> Clone for QuotaEngine<S, T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<S: fmt::Debug, T> fmt::Debug for QuotaEngine<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaEngine")
            .field("store", &self.inner.store)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl<S> QuotaEngine<S, NullSink>
where
    S: QuotaStore + 'static,
{
    /// Engine without telemetry.
    pub fn new(store: S, config: LimiterConfig) -> Self {
        Self::with_telemetry(store, config, NullSink)
    }
}

impl<S, T> QuotaEngine<S, T>
where
    S: QuotaStore + 'static,
    T: TelemetrySink + Sync,
    T::Future: Send,
{
    /// Engine that reports every decision to `sink`.
    pub fn with_telemetry(store: S, config: LimiterConfig, sink: T) -> Self {
        let tiers = DynamicConfig::new(config.tiers().clone());
        Self { inner: Arc::new(EngineInner { store, config, tiers, sink }) }
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Static configuration.
    pub fn config(&self) -> &LimiterConfig {
        &self.inner.config
    }

    /// Live limits for `tier`.
    pub fn tier_limits(&self, tier: Tier) -> TierLimits {
        self.inner.tiers.get().limits(tier)
    }

    /// Snapshot of all live tier limits.
    pub fn tier_table(&self) -> Arc<TierTable> {
        self.inner.tiers.get()
    }

    /// Decide whether `key` may call `endpoint` now.
    ///
    /// Checks run in the order block → burst → window → daily → concurrency.
    /// On [`Decision::Allowed`] the identity holds one concurrency slot which
    /// the caller must return with [`release`](Self::release) however the
    /// request ends, unless the decision is `degraded`. Prefer
    /// [`admit`](Self::admit) or [`execute`](Self::execute), which do that for you.
    ///
    /// Never fails: store faults are resolved by the configured
    /// [`FailurePolicy`], and a record too contended to update within the
    /// store timeout is denied with [`DenyReason::StoreContention`].
    ///
    /// The store update runs on its own task. If it commits an admission after
    /// this call stopped waiting (store timeout, or the future was dropped),
    /// the slot it took is released again.
    pub async fn evaluate(&self, key: &str, tier: Tier, endpoint: &str) -> Decision {
        let limits = self.tier_limits(tier);
        let deadline = deadline_after(self.inner.config.store_timeout());

        let engine = self.clone();
        let owned_key = key.to_string();
        let owned_endpoint = endpoint.to_string();
        let update = async move {
            let config = engine.config();
            let retention = config.retention();
            let eval = Evaluation {
                limits,
                window_ms: millis(config.window()),
                burst_window_ms: millis(config.burst_window()),
                escalation: config.escalation(),
                endpoint: &owned_endpoint,
            };
            atomic_apply(engine.store(), &owned_key, deadline, |current, now| {
                let mut record = live_or_new(current, &owned_key, tier, now, retention);
                record.refresh_tier(tier);
                let verdict = quota::evaluate(&mut record, &eval, now);
                if verdict.mutates_record() {
                    Apply::Commit(record, (verdict, now))
                } else {
                    Apply::Keep((verdict, now))
                }
            })
            .await
        };

        let engine = self.clone();
        let owned_key = key.to_string();
        let abandoned = move |(verdict, _now): (Verdict, u64)| async move {
            if let Verdict::Admitted { .. } = verdict {
                tracing::warn!(key = %owned_key, "admission committed after the caller stopped waiting");
                engine.release_owned(owned_key).await;
            }
        };

        match self.settle(deadline, update, abandoned).await {
            Ok((verdict, now)) => self.decide(key, tier, verdict, now).await,
            Err(StoreError::Contention { attempts, .. }) => self.on_contention(key, limits, attempts).await,
            Err(err) => self.on_store_fault(key, limits, err).await,
        }
    }

    /// Evaluate `subject` and wrap an admission in a permit that returns the
    /// concurrency slot when released or dropped.
    pub async fn admit(&self, subject: &Subject) -> Admission {
        let decision = self.evaluate(&subject.key, subject.tier, &subject.endpoint).await;
        match decision {
            Decision::Allowed { degraded, .. } => Admission::Admitted(AdmissionPermit {
                releaser: Arc::new(self.clone()),
                key: subject.key.clone(),
                decision,
                held: !degraded,
            }),
            denied @ Decision::Denied { .. } => Admission::Rejected(denied),
        }
    }

    /// Run `operation` under admission control.
    ///
    /// The concurrency slot is returned on every exit path: normal completion,
    /// an error from `operation`, a panic, or the returned future being
    /// dropped (client disconnect, timeout).
    ///
    /// # Errors
    /// [`AdmissionError::Rejected`] if the request was not admitted, otherwise
    /// [`AdmissionError::Inner`] with the operation's error.
    pub async fn execute<R, E, Fut, Op>(&self, subject: &Subject, operation: Op) -> Result<R, AdmissionError<E>>
    where
        Op: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let permit = match self.admit(subject).await {
            Admission::Admitted(permit) => permit,
            Admission::Rejected(decision) => return Err(AdmissionError::Rejected(decision)),
        };
        let result = operation().await;
        permit.release().await;
        result.map_err(AdmissionError::Inner)
    }

    /// Return one concurrency slot for `key`.
    ///
    /// Lost races and store errors are retried with backoff until
    /// [`LimiterConfig::release_timeout`] runs out; only then is the error
    /// returned. Returns `Ok(false)` when there was nothing to release, e.g.
    /// after the key was reset while requests were in flight.
    pub async fn release(&self, key: &str) -> Result<bool, StoreError> {
        let budget = self.inner.config.release_timeout();
        let deadline = deadline_after(budget);
        let mut attempt: u32 = 0;

        let active = loop {
            attempt = attempt.saturating_add(1);
            let update = atomic_apply(&self.inner.store, key, deadline, |current, _now| match current {
                Some(mut record) => {
                    if concurrency::release(&mut record) {
                        let active = record.active_requests;
                        Apply::Commit(record, Some(active))
                    } else {
                        Apply::Keep(None)
                    }
                }
                None => Apply::Keep(None),
            });

            let err = match tokio::time::timeout_at(deadline, update).await {
                Ok(Ok(active)) => break active,
                Ok(Err(err)) => err,
                Err(_) => return Err(StoreError::Timeout(budget)),
            };
            let pause = Backoff::RELEASE.delay(attempt);
            if Instant::now() + pause >= deadline {
                return Err(err);
            }
            tracing::debug!(key, attempt, error = %err, "slot release failed, retrying");
            tokio::time::sleep(pause).await;
        };

        match active {
            Some(active) => {
                tracing::trace!(key, active, "concurrency slot released");
                self.emit(AdmissionEvent::Released { key: key.to_string(), active }).await;
                Ok(true)
            }
            None => {
                tracing::warn!(key, "release without a matching admission");
                Ok(false)
            }
        }
    }

    /// Take a concurrency slot without touching any window.
    ///
    /// Returns `false` and leaves the record unchanged when the tier's
    /// concurrency cap is reached. Pair every `true` with [`release`](Self::release).
    pub async fn try_acquire(&self, key: &str, tier: Tier) -> Result<bool, StoreError> {
        let max = self.tier_limits(tier).max_concurrent;
        let deadline = deadline_after(self.inner.config.store_timeout());

        let engine = self.clone();
        let owned_key = key.to_string();
        let update = async move {
            let retention = engine.config().retention();
            atomic_apply(engine.store(), &owned_key, deadline, |current, now| {
                let mut record = live_or_new(current, &owned_key, tier, now, retention);
                record.refresh_tier(tier);
                if concurrency::try_acquire(&mut record, max) {
                    Apply::Commit(record, true)
                } else {
                    Apply::Keep(false)
                }
            })
            .await
        };

        let engine = self.clone();
        let owned_key = key.to_string();
        let abandoned = move |acquired: bool| async move {
            if acquired {
                engine.release_owned(owned_key).await;
            }
        };

        self.settle(deadline, update, abandoned).await
    }

    /// Fetch the record for `key`, creating it on first sight and syncing its tier.
    pub async fn find_or_create(&self, key: &str, tier: Tier) -> Result<QuotaRecord, StoreError> {
        let retention = self.inner.config.retention();
        let deadline = deadline_after(self.inner.config.store_timeout());
        self.guarded(atomic_apply(&self.inner.store, key, deadline, |current, now| match current {
            Some(mut record) if !record.is_expired(now, retention) => {
                if record.refresh_tier(tier) {
                    Apply::Commit(record.clone(), record)
                } else {
                    Apply::Keep(record)
                }
            }
            _ => {
                let record = QuotaRecord::new(key, tier, now);
                Apply::Commit(record.clone(), record)
            }
        }))
        .await
    }

    /// Current record for `key`, if any.
    pub async fn inspect(&self, key: &str) -> Result<Option<QuotaRecord>, StoreError> {
        Ok(self.guarded(self.inner.store.load(key)).await?.map(|v| v.record))
    }

    /// Whether `key` is blocked right now, and until when.
    pub async fn block_state(&self, key: &str) -> Result<BlockState, StoreError> {
        let now = self.guarded(self.inner.store.now_millis()).await?;
        let current = self.guarded(self.inner.store.load(key)).await?;
        Ok(current.map_or(BlockState::Active, |v| v.record.block_state(now)))
    }

    /// Shorthand for `block_state(key)?.is_blocked()`.
    pub async fn is_blocked(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.block_state(key).await?.is_blocked())
    }

    /// Drop every counter, violation and block for `key`.
    pub async fn reset_key(&self, key: &str) -> Result<bool, StoreError> {
        let existed = self.guarded(self.inner.store.remove(key)).await?;
        tracing::info!(key, existed, "quota key reset");
        self.emit(AdmissionEvent::KeyReset { key: key.to_string() }).await;
        Ok(existed)
    }

    /// Replace `tier`'s limits; the next decision uses them.
    pub async fn adjust_tier_limits(&self, tier: Tier, limits: TierLimits) -> Result<(), ConfigError> {
        limits.validate()?;
        self.inner.tiers.update(|table| {
            let mut next = table.clone();
            next.insert(tier, limits);
            next
        });
        tracing::info!(%tier, ?limits, "tier limits adjusted");
        self.emit(AdmissionEvent::TierLimitsAdjusted { tier }).await;
        Ok(())
    }

    pub(crate) async fn guarded<F, R>(&self, fut: F) -> Result<R, StoreError>
    where
        F: Future<Output = Result<R, StoreError>>,
    {
        let timeout = self.inner.config.store_timeout();
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(timeout)),
        }
    }

    /// Run a store update on its own task and wait for it until `deadline`.
    ///
    /// The update always runs to completion. A result that arrives after this
    /// call stopped waiting, because the deadline passed or the caller was
    /// dropped, goes to `abandoned` instead of being lost.
    async fn settle<R, F, A, AF>(&self, deadline: Instant, update: F, abandoned: A) -> Result<R, StoreError>
    where
        R: Send + 'static,
        F: Future<Output = Result<R, StoreError>> + Send + 'static,
        A: FnOnce(R) -> AF + Send + 'static,
        AF: Future<Output = ()> + Send,
    {
        let (tx, mut rx) = oneshot::channel();
        tokio::spawn(async move {
            if let Err(Ok(value)) = tx.send(update.await) {
                abandoned(value).await;
            }
        });

        match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(gone)) => Err(StoreError::unavailable(gone)),
            Err(_) => {
                // Closing first means a late result is either seen here or
                // handed to `abandoned`, never both.
                rx.close();
                rx.try_recv().unwrap_or(Err(StoreError::Timeout(self.inner.config.store_timeout())))
            }
        }
    }

    pub(crate) async fn emit(&self, event: AdmissionEvent) {
        emit_best_effort(self.inner.sink.clone(), event).await;
    }

    async fn decide(&self, key: &str, tier: Tier, verdict: Verdict, now: u64) -> Decision {
        match verdict {
            Verdict::Admitted { limit, remaining, reset_after_ms, active } => {
                tracing::debug!(key, %tier, remaining, active, "request admitted");
                self.emit(AdmissionEvent::Admitted { key: key.to_string(), tier, remaining }).await;
                Decision::Allowed {
                    limit,
                    remaining,
                    reset_after: Duration::from_millis(reset_after_ms),
                    degraded: false,
                }
            }
            Verdict::Denied { reason, limit, reset_after_ms, retry_after_ms, violations, blocked_until } => {
                tracing::warn!(key, %tier, reason = %reason, violations, "request denied");
                self.emit(AdmissionEvent::Denied { key: key.to_string(), reason, violations }).await;
                if let Some(until) = blocked_until {
                    tracing::warn!(key, violations, until_millis = until, "identity blocked");
                    self.emit(AdmissionEvent::BlockStarted {
                        key: key.to_string(),
                        until_millis: until,
                        violations,
                    })
                    .await;
                }
                Decision::Denied {
                    reason,
                    retry_after: Duration::from_millis(retry_after_ms),
                    limit,
                    reset_after: Duration::from_millis(reset_after_ms),
                }
            }
            Verdict::Blocked { until, limit, violations } => {
                tracing::debug!(key, violations, until_millis = until, "blocked identity rejected");
                self.emit(AdmissionEvent::BlockedRejected { key: key.to_string() }).await;
                let wait = Duration::from_millis(until.saturating_sub(now));
                Decision::Denied { reason: DenyReason::Blocked, retry_after: wait, limit, reset_after: wait }
            }
        }
    }

    async fn on_contention(&self, key: &str, limits: TierLimits, attempts: u32) -> Decision {
        tracing::warn!(key, attempts, "quota record too contended to update in time");
        self.emit(AdmissionEvent::Contended { key: key.to_string(), attempts }).await;
        Decision::Denied {
            reason: DenyReason::StoreContention,
            retry_after: CONTENTION_RETRY_AFTER,
            limit: limits.window_max,
            reset_after: CONTENTION_RETRY_AFTER,
        }
    }

    async fn on_store_fault(&self, key: &str, limits: TierLimits, err: StoreError) -> Decision {
        let policy = self.inner.config.failure_policy();
        tracing::error!(key, error = %err, ?policy, "quota store fault");
        self.emit(AdmissionEvent::StoreFault { key: key.to_string(), policy }).await;
        match policy {
            FailurePolicy::FailOpen => Decision::Allowed {
                limit: limits.window_max,
                remaining: limits.window_max,
                reset_after: self.inner.config.window(),
                degraded: true,
            },
            FailurePolicy::FailClosed => Decision::Denied {
                reason: DenyReason::StoreUnavailable,
                retry_after: STORE_RETRY_AFTER,
                limit: limits.window_max,
                reset_after: STORE_RETRY_AFTER,
            },
        }
    }
}

/// The stored record unless it has idled past retention, else a fresh one.
fn live_or_new(
    current: Option<QuotaRecord>,
    key: &str,
    tier: Tier,
    now: u64,
    retention: Duration,
) -> QuotaRecord {
    match current {
        Some(record) if !record.is_expired(now, retention) => record,
        _ => QuotaRecord::new(key, tier, now),
    }
}

/// `budget` from now, capped at [`MAX_BUDGET`].
fn deadline_after(budget: Duration) -> Instant {
    Instant::now() + budget.min(MAX_BUDGET)
}

/// Type-erased handle a permit uses to give its slot back.
trait Release: Send + Sync {
    fn release_owned(&self, key: String) -> BoxFuture<'static, ()>;
}

impl<S, T> Release for QuotaEngine<S, T>
where
    S: QuotaStore + 'static,
    T: TelemetrySink + Sync,
    T::Future: Send,
{
    fn release_owned(&self, key: String) -> BoxFuture<'static, ()> {
        let engine = self.clone();
        Box::pin(async move {
            if let Err(err) = engine.release(&key).await {
                tracing::error!(key = %key, error = %err, "failed to release concurrency slot");
            }
        })
    }
}

/// Outcome of [`QuotaEngine::admit`].
#[derive(Debug)]
pub enum Admission {
    /// Proceed; keep the permit alive for the duration of the request.
    Admitted(AdmissionPermit),
    /// Answer with the decision's status and headers.
    Rejected(Decision),
}

/// A held concurrency slot.
///
/// Call [`release`](Self::release) when the request finishes. If the permit
/// is dropped instead (panic, cancellation), the release is spawned onto the
/// current tokio runtime.
pub struct AdmissionPermit {
    releaser: Arc<dyn Release>,
    key: String,
    decision: Decision,
    held: bool,
}

impl AdmissionPermit {
    /// The allow decision, for response headers.
    pub fn decision(&self) -> &Decision {
        &self.decision
    }

    /// Identity holding the slot.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Return the slot now.
    pub async fn release(mut self) {
        if self.held {
            self.held = false;
            self.releaser.release_owned(std::mem::take(&mut self.key)).await;
        }
    }
}

impl fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionPermit")
            .field("key", &self.key)
            .field("decision", &self.decision)
            .field("held", &self.held)
            .finish()
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;
        let key = std::mem::take(&mut self.key);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(self.releaser.release_owned(key));
            }
            Err(_) => {
                tracing::error!(key = %key, "permit dropped outside a tokio runtime; slot not released");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryQuotaStore;
    use crate::telemetry::MemorySink;

    const T0: u64 = 1_710_028_800_000; // 2024-03-10T00:00:00Z

    fn engine(clock: &ManualClock) -> QuotaEngine<InMemoryQuotaStore> {
        let store = InMemoryQuotaStore::with_clock(clock.clone());
        QuotaEngine::new(store, LimiterConfig::default())
    }

    #[tokio::test]
    async fn find_or_create_is_idempotent_and_syncs_tier() {
        let clock = ManualClock::new(T0);
        let e = engine(&clock);
        let first = e.find_or_create("wallet-A", Tier::Free).await.unwrap();
        clock.advance(1_000);
        let again = e.find_or_create("wallet-A", Tier::Free).await.unwrap();
        assert_eq!(first, again);
        let upgraded = e.find_or_create("wallet-A", Tier::Premium).await.unwrap();
        assert_eq!(upgraded.tier, Tier::Premium);
        assert_eq!(upgraded.window_start, first.window_start);
        assert_eq!(e.store().len(), 1);
    }

    #[tokio::test]
    async fn release_balances_evaluate() {
        let clock = ManualClock::new(T0);
        let e = engine(&clock);
        assert!(e.evaluate("k", Tier::Free, "/a").await.is_allowed());
        assert!(e.evaluate("k", Tier::Free, "/a").await.is_allowed());
        assert_eq!(e.inspect("k").await.unwrap().unwrap().active_requests, 2);
        assert!(e.release("k").await.unwrap());
        assert!(e.release("k").await.unwrap());
        assert!(!e.release("k").await.unwrap());
        assert_eq!(e.inspect("k").await.unwrap().unwrap().active_requests, 0);
    }

    #[tokio::test]
    async fn try_acquire_refuses_at_cap_without_mutation() {
        let clock = ManualClock::new(T0);
        let e = engine(&clock);
        let cap = e.tier_limits(Tier::Free).max_concurrent;
        for _ in 0..cap {
            assert!(e.try_acquire("k", Tier::Free).await.unwrap());
        }
        let before = e.inspect("k").await.unwrap();
        assert!(!e.try_acquire("k", Tier::Free).await.unwrap());
        assert_eq!(e.inspect("k").await.unwrap(), before);
    }

    #[tokio::test]
    async fn expired_record_is_replaced_lazily() {
        let clock = ManualClock::new(T0);
        let e = engine(&clock);
        for _ in 0..3 {
            e.evaluate("k", Tier::Free, "/a").await;
            e.release("k").await.unwrap();
        }
        clock.advance(e.config().retention().as_millis() as u64);
        let r = e.find_or_create("k", Tier::Free).await.unwrap();
        assert_eq!(r.daily_requests, 0);
        assert!(r.endpoint_counts.is_empty());
    }

    #[tokio::test]
    async fn adjust_tier_limits_applies_to_next_decision() {
        let clock = ManualClock::new(T0);
        let e = engine(&clock);
        let tight = TierLimits::new(100, 1, 1_000, 5).unwrap();
        e.adjust_tier_limits(Tier::Basic, tight).await.unwrap();
        assert!(e.evaluate("k", Tier::Basic, "/a").await.is_allowed());
        let d = e.evaluate("k", Tier::Basic, "/a").await;
        assert_eq!(d.reason(), Some(DenyReason::BurstLimitExceeded));
        assert!(e.adjust_tier_limits(Tier::Basic, TierLimits { max_concurrent: 0, ..tight }).await.is_err());
        assert_eq!(e.tier_limits(Tier::Basic), tight);
    }

    #[tokio::test]
    async fn reset_key_clears_block() {
        let clock = ManualClock::new(T0);
        let sink = MemorySink::new();
        let store = InMemoryQuotaStore::with_clock(clock.clone());
        let e = QuotaEngine::with_telemetry(store, LimiterConfig::default(), sink.clone());
        for _ in 0..13 {
            if e.evaluate("k", Tier::Free, "/a").await.is_allowed() {
                e.release("k").await.unwrap();
            }
        }
        assert!(e.is_blocked("k").await.unwrap());
        assert!(e.reset_key("k").await.unwrap());
        assert!(!e.is_blocked("k").await.unwrap());
        assert!(e.evaluate("k", Tier::Free, "/a").await.is_allowed());
        let events = sink.events();
        assert!(events.iter().any(|ev| matches!(ev, AdmissionEvent::BlockStarted { violations: 3, .. })));
        assert!(events.contains(&AdmissionEvent::KeyReset { key: "k".into() }));
    }

    #[tokio::test]
    async fn degraded_permit_releases_nothing() {
        let clock = ManualClock::new(T0);
        let e = engine(&clock);
        let permit = AdmissionPermit {
            releaser: Arc::new(e.clone()),
            key: "k".into(),
            decision: Decision::Allowed {
                limit: 1,
                remaining: 1,
                reset_after: Duration::ZERO,
                degraded: true,
            },
            held: false,
        };
        e.try_acquire("k", Tier::Free).await.unwrap();
        permit.release().await;
        assert_eq!(e.inspect("k").await.unwrap().unwrap().active_requests, 1);
    }
}
