use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lower bounds of the five deviation ranges; the last range is open-ended
pub const DEVIATION_LOWER_BOUNDS: [f64; 5] = [0.0, 0.5, 1.0, 2.0, 5.0];

/// Half-open interval `[lower, upper)` on deviation percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviationRange {
    pub lower: f64,
    pub upper: Option<f64>,
}

impl DeviationRange {
    /// The fixed range at `index`; `None` past the last range
    pub fn at(index: usize) -> Option<Self> {
        Some(Self {
            lower: *DEVIATION_LOWER_BOUNDS.get(index)?,
            upper: DEVIATION_LOWER_BOUNDS.get(index + 1).copied(),
        })
    }

    /// The five fixed ranges in ascending order
    pub fn all() -> impl Iterator<Item = Self> {
        (0..DEVIATION_LOWER_BOUNDS.len()).filter_map(Self::at)
    }

    pub fn is_open_ended(&self) -> bool {
        self.upper.is_none()
    }

    pub fn label(&self) -> String {
        match self.upper {
            Some(upper) => format!("{:.1}% - {:.1}%", self.lower, upper),
            None => format!("{:.1}%+", self.lower),
        }
    }

    pub fn contains(&self, deviation: f64) -> bool {
        deviation >= self.lower && self.upper.map_or(true, |upper| deviation < upper)
    }
}

/// Index of the bucket a deviation falls into. Values below zero (or NaN)
/// land in the first bucket so that every input has exactly one bucket.
pub fn bucket_index(deviation_percent: f64) -> usize {
    DEVIATION_LOWER_BOUNDS
        .iter()
        .rposition(|lower| deviation_percent >= *lower)
        .unwrap_or(0)
}

/// Aggregate counts for one deviation range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviationBucket {
    pub range: String,
    pub bounds: DeviationRange,
    pub currencies: BTreeMap<String, u64>,
    /// Records in this range
    pub total: u64,
    /// Legs in this range whose currency is tracked
    pub tracked_total: u64,
    pub is_exceeding: bool,
}

impl DeviationBucket {
    /// Zero counts for every tracked currency. Every range above the first
    /// is flagged as exceeding.
    pub fn empty(bounds: DeviationRange, tracked_currencies: &[String]) -> Self {
        Self {
            range: bounds.label(),
            bounds,
            currencies: tracked_currencies
                .iter()
                .map(|ccy| (ccy.clone(), 0))
                .collect(),
            total: 0,
            tracked_total: 0,
            is_exceeding: bounds.lower > DEVIATION_LOWER_BOUNDS[0],
        }
    }

    pub fn count(&self, currency: &str) -> u64 {
        self.currencies.get(currency).copied().unwrap_or(0)
    }

    /// Sum of the per-currency leg counts
    pub fn leg_total(&self) -> u64 {
        self.currencies.values().sum()
    }
}
