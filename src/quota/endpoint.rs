//! Per-endpoint tallies of admitted requests. Diagnostic only; never a denial source.

use crate::record::QuotaRecord;

/// Distinct endpoints tracked per record; later ones share [`OVERFLOW_ENDPOINT`].
pub const MAX_TRACKED_ENDPOINTS: usize = 256;

/// Bucket for endpoints beyond [`MAX_TRACKED_ENDPOINTS`].
pub const OVERFLOW_ENDPOINT: &str = "*";

/// Count one admitted request against `endpoint`.
pub fn record(record: &mut QuotaRecord, endpoint: &str) {
    let counts = &mut record.endpoint_counts;
    let slot = if counts.contains_key(endpoint) || counts.len() < MAX_TRACKED_ENDPOINTS {
        endpoint
    } else {
        OVERFLOW_ENDPOINT
    };
    *counts.entry(slot.to_string()).or_insert(0) += 1;
}

/// The `n` busiest endpoints, busiest first.
pub fn top(record: &QuotaRecord, n: usize) -> Vec<(&str, u64)> {
    let mut all: Vec<_> = record.endpoint_counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    all.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    all.truncate(n);
    all
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::Tier;

    #[test]
    fn counts_per_endpoint() {
        let mut r = QuotaRecord::new("k", Tier::Free, 0);
        record(&mut r, "/content");
        record(&mut r, "/content");
        record(&mut r, "/royalties");
        assert_eq!(r.endpoint_counts["/content"], 2);
        assert_eq!(top(&r, 1), vec![("/content", 2)]);
    }

    #[test]
    fn overflow_bucket_caps_distinct_endpoints() {
        let mut r = QuotaRecord::new("k", Tier::Free, 0);
        for i in 0..MAX_TRACKED_ENDPOINTS {
            record(&mut r, &format!("/e/{i}"));
        }
        record(&mut r, "/one-too-many");
        record(&mut r, "/e/0");
        assert_eq!(r.endpoint_counts.len(), MAX_TRACKED_ENDPOINTS + 1);
        assert_eq!(r.endpoint_counts[OVERFLOW_ENDPOINT], 1);
        assert_eq!(r.endpoint_counts["/e/0"], 2);
    }
}
