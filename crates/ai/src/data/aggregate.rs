use std::collections::BTreeMap;

use chrono::NaiveDate;

use super::BusinessRecord;

/// Sum record values per calendar day, ascending by date.
///
/// Days without records are absent from the output (no gap filling), so the
/// series is not evenly spaced when activity skips days.
pub fn aggregate_daily(records: &[BusinessRecord]) -> Vec<f64> {
    aggregate_daily_dated(records)
        .into_iter()
        .map(|(_, v)| v)
        .collect()
}

/// [`aggregate_daily`] with the bucket dates attached.
pub fn aggregate_daily_dated(records: &[BusinessRecord]) -> Vec<(NaiveDate, f64)> {
    let mut buckets: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for record in records {
        *buckets.entry(record.day()).or_insert(0.0) += record.value();
    }
    buckets.into_iter().collect()
}
