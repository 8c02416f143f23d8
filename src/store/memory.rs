use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::QuotaStore;
use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use crate::record::{QuotaRecord, Versioned};

/// In-process quota store.
///
/// Only correct for single-instance deployments: every process gets its own
/// counters. Clones share the same map.
#[derive(Clone, Debug)]
pub struct InMemoryQuotaStore {
    data: Arc<Mutex<HashMap<String, Versioned>>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryQuotaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQuotaStore {
    /// Store using the system wall clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Store using a custom clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(clock: C) -> Self {
        Self { data: Arc::new(Mutex::new(HashMap::new())), clock: Arc::new(clock) }
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when no record is held.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic while holding the lock cannot leave a half-written entry: every
    // write is a single insert or remove.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Versioned>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) fn force_insert(&self, record: QuotaRecord) {
        let mut guard = self.lock();
        let version = guard.get(&record.key).map_or(0, |v| v.version) + 1;
        guard.insert(record.key.clone(), Versioned { version, record });
    }
}

#[async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn now_millis(&self) -> Result<u64, StoreError> {
        Ok(self.clock.now_millis())
    }

    async fn load(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        Ok(self.lock().get(key).cloned())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: u64,
        record: &QuotaRecord,
    ) -> Result<bool, StoreError> {
        let mut guard = self.lock();
        let current = guard.get(key).map_or(0, |v| v.version);
        if current != expected_version {
            return Ok(false);
        }
        guard.insert(key.to_string(), Versioned { version: current + 1, record: record.clone() });
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, expected_version: u64) -> Result<bool, StoreError> {
        let mut guard = self.lock();
        match guard.get(key) {
            Some(v) if v.version == expected_version => {
                guard.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.lock().remove(key).is_some())
    }

    async fn scan(&self) -> Result<Vec<Versioned>, StoreError> {
        Ok(self.lock().values().cloned().collect())
    }
}
