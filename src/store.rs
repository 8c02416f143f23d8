//! Storage for quota records.
//!
//! The store is shared by every process that serves traffic, so it is the
//! only place quota state may live. Records are updated with optimistic
//! concurrency: each record carries a version, and a write only lands if the
//! version is unchanged since it was read. [`atomic_apply`] wraps that into a
//! retrying read-modify-write so no caller ever does a bare read-then-write.

use async_trait::async_trait;
use tokio::time::Instant;

use crate::backoff::Backoff;
use crate::error::StoreError;
use crate::record::{QuotaRecord, Versioned};

mod memory;
pub use memory::InMemoryQuotaStore;

/// Abstract storage interface for quota records.
///
/// Implementations must make [`compare_and_swap`](QuotaStore::compare_and_swap)
/// and [`compare_and_delete`](QuotaStore::compare_and_delete) atomic with
/// respect to each other across all processes sharing the backend.
#[async_trait]
pub trait QuotaStore: Send + Sync + std::fmt::Debug {
    /// The store's authoritative time, epoch milliseconds.
    async fn now_millis(&self) -> Result<u64, StoreError>;

    /// Fetch a record and its version.
    async fn load(&self, key: &str) -> Result<Option<Versioned>, StoreError>;

    /// Write `record` if the stored version still equals `expected_version`
    /// (0 = the key must be absent). The stored version is then bumped.
    ///
    /// Returns `Ok(false)` if another writer got there first.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: u64,
        record: &QuotaRecord,
    ) -> Result<bool, StoreError>;

    /// Delete the record if its version still equals `expected_version`.
    async fn compare_and_delete(&self, key: &str, expected_version: u64) -> Result<bool, StoreError>;

    /// Delete unconditionally. Returns whether a record existed.
    async fn remove(&self, key: &str) -> Result<bool, StoreError>;

    /// Every record currently stored.
    async fn scan(&self) -> Result<Vec<Versioned>, StoreError>;
}

/// What a mutation wants done with the record it was shown.
#[derive(Debug)]
pub enum Apply<T> {
    /// Persist the record, then return the value.
    Commit(QuotaRecord, T),
    /// Leave the store as it is and return the value.
    Keep(T),
}

/// Run `mutation` as one atomic read-modify-write on `key`.
///
/// The mutation receives the current record (if any) and the store time. It
/// must be pure: when another writer wins the race it is called again with the
/// fresh record, after a short jittered backoff. Lost races are retried until
/// another attempt would no longer finish before `deadline`; then this gives
/// up with [`StoreError::Contention`]. Store errors are returned as they are.
pub async fn atomic_apply<S, T, F>(
    store: &S,
    key: &str,
    deadline: Instant,
    mut mutation: F,
) -> Result<T, StoreError>
where
    S: QuotaStore + ?Sized,
    F: FnMut(Option<QuotaRecord>, u64) -> Apply<T> + Send,
    T: Send,
{
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        let started = Instant::now();
        let now = store.now_millis().await?;
        let (version, current) = match store.load(key).await? {
            Some(v) => (v.version, Some(v.record)),
            None => (0, None),
        };

        match mutation(current, now) {
            Apply::Keep(value) => return Ok(value),
            Apply::Commit(record, value) => {
                if store.compare_and_swap(key, version, &record).await? {
                    return Ok(value);
                }
            }
        }

        let pause = Backoff::CONTENTION.delay(attempt);
        // The next attempt is assumed to take up to twice as long as this one.
        let margin = started.elapsed().saturating_mul(2).saturating_add(pause);
        if Instant::now() + margin >= deadline {
            tracing::warn!(key, attempts = attempt, "quota record contention");
            return Err(StoreError::Contention { key: key.to_string(), attempts: attempt });
        }
        tracing::trace!(key, attempt, "quota record changed concurrently, retrying");
        tokio::time::sleep(pause).await;
    }
}
