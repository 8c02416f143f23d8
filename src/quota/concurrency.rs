//! In-flight request accounting.
//!
//! Unlike the windowed counters, `active_requests` is a paired counter: every
//! successful [`try_acquire`] must be matched by exactly one [`release`].

use std::time::Duration;

use crate::record::QuotaRecord;

/// Suggested wait after a concurrency rejection. Slots free up when in-flight
/// requests finish, not on a schedule, so this is a hint only.
pub const CONCURRENCY_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Whether another request may start.
pub fn has_slot(record: &QuotaRecord, max_concurrent: u32) -> bool {
    record.active_requests < max_concurrent
}

/// Take a slot. Leaves the record untouched and returns false when full.
pub fn try_acquire(record: &mut QuotaRecord, max_concurrent: u32) -> bool {
    if !has_slot(record, max_concurrent) {
        return false;
    }
    record.active_requests += 1;
    true
}

/// Return a slot. Returns false if there was nothing to release.
pub fn release(record: &mut QuotaRecord) -> bool {
    match record.active_requests.checked_sub(1) {
        Some(n) => {
            record.active_requests = n;
            true
        }
        None => false,
    }
}
