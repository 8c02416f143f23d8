//! Calendar-day quota, reset at UTC midnight.

use chrono::{DateTime, Utc};

use crate::record::QuotaRecord;

const MILLIS_PER_DAY: u64 = 86_400_000;

/// The first UTC midnight strictly after `now_millis`.
pub fn next_utc_midnight(now_millis: u64) -> u64 {
    let next = i64::try_from(now_millis)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .and_then(|now| now.date_naive().succ_opt())
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .and_then(|midnight| u64::try_from(midnight.and_utc().timestamp_millis()).ok());
    next.unwrap_or_else(|| {
        // Outside chrono's range: plain epoch arithmetic gives the same answer.
        (now_millis / MILLIS_PER_DAY).saturating_add(1).saturating_mul(MILLIS_PER_DAY)
    })
}

/// Reset the daily counter once `daily_reset_at` has passed.
pub fn roll(record: &mut QuotaRecord, now: u64) -> bool {
    if now >= record.daily_reset_at {
        record.daily_requests = 0;
        record.daily_reset_at = next_utc_midnight(now);
        true
    } else {
        false
    }
}

/// Whether one more request fits in today's quota.
pub fn has_headroom(record: &QuotaRecord, daily_max: u64) -> bool {
    record.daily_requests < daily_max
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::Tier;

    // 2024-03-10T00:00:00Z
    const MIDNIGHT: u64 = 1_710_028_800_000;

    #[test]
    fn midnight_maps_to_following_midnight() {
        assert_eq!(next_utc_midnight(MIDNIGHT), MIDNIGHT + MILLIS_PER_DAY);
        assert_eq!(next_utc_midnight(MIDNIGHT - 1), MIDNIGHT);
        assert_eq!(next_utc_midnight(MIDNIGHT + 12 * 3_600_000), MIDNIGHT + MILLIS_PER_DAY);
    }

    #[test]
    fn agrees_with_epoch_arithmetic() {
        for now in [0, 1, 86_399_999, 86_400_000, 1_700_000_000_123] {
            let expected = (now / MILLIS_PER_DAY + 1) * MILLIS_PER_DAY;
            assert_eq!(next_utc_midnight(now), expected, "now={now}");
        }
    }

    #[test]
    fn roll_resets_only_after_midnight() {
        let mut r = QuotaRecord::new("k", Tier::Free, MIDNIGHT + 1_000);
        r.daily_requests = 1_000;
        assert!(!roll(&mut r, MIDNIGHT + MILLIS_PER_DAY - 1));
        assert_eq!(r.daily_requests, 1_000);
        assert!(!has_headroom(&r, 1_000));

        assert!(roll(&mut r, MIDNIGHT + MILLIS_PER_DAY));
        assert_eq!(r.daily_requests, 0);
        assert_eq!(r.daily_reset_at, MIDNIGHT + 2 * MILLIS_PER_DAY);
    }

    #[test]
    fn roll_after_idle_days_lands_on_next_midnight() {
        let mut r = QuotaRecord::new("k", Tier::Free, MIDNIGHT);
        r.daily_requests = 5;
        let later = MIDNIGHT + 3 * MILLIS_PER_DAY + 42;
        assert!(roll(&mut r, later));
        assert_eq!(r.daily_reset_at, MIDNIGHT + 4 * MILLIS_PER_DAY);
    }
}
