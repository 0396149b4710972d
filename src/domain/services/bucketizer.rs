use tracing::debug;

use crate::domain::entities::deviation_bucket::{bucket_index, DeviationBucket, DeviationRange};
use crate::domain::entities::trade_record::TradeRecord;

/// Currencies always present in bucket output
pub const DEFAULT_TRACKED_CURRENCIES: [&str; 4] = ["USD", "EUR", "GBP", "JPY"];

/// Cross-tabulates matched trades by deviation range and currency
#[derive(Debug, Clone)]
pub struct DeviationBucketizer {
    tracked_currencies: Vec<String>,
}

impl Default for DeviationBucketizer {
    fn default() -> Self {
        Self::new(DEFAULT_TRACKED_CURRENCIES.iter().map(|c| c.to_string()).collect())
    }
}

impl DeviationBucketizer {
    pub fn new(tracked_currencies: Vec<String>) -> Self {
        Self { tracked_currencies }
    }

    pub fn tracked_currencies(&self) -> &[String] {
        &self.tracked_currencies
    }

    /// Always returns the five fixed buckets, zero-filled.
    ///
    /// Each record adds one to its bucket's `total` and one to the count of
    /// both its base and quote currency. `tracked_total` sums the tracked
    /// currencies' leg counts. Records whose pair code is not six characters
    /// are skipped.
    pub fn bucketize<'a, I>(&self, records: I) -> Vec<DeviationBucket>
    where
        I: IntoIterator<Item = &'a TradeRecord>,
    {
        let mut buckets: Vec<DeviationBucket> = DeviationRange::all()
            .map(|range| DeviationBucket::empty(range, &self.tracked_currencies))
            .collect();

        let mut skipped = 0usize;
        for record in records {
            let Some((base, quote)) = record.currencies() else {
                skipped += 1;
                continue;
            };
            let bucket = &mut buckets[bucket_index(record.deviation_percent)];
            *bucket.currencies.entry(base.to_string()).or_insert(0) += 1;
            *bucket.currencies.entry(quote.to_string()).or_insert(0) += 1;
            bucket.total += 1;
        }

        for bucket in &mut buckets {
            let tracked: u64 = self.tracked_currencies.iter().map(|ccy| bucket.count(ccy)).sum();
            bucket.tracked_total = tracked;
        }

        if skipped > 0 {
            debug!(skipped, "Skipped records with malformed currency pair codes");
        }
        buckets
    }
}
