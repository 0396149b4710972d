//! UAT/PROD trade matching
//!
//! UAT records are matched to PROD by `trade_id`. Matched records that are
//! out of scope are dropped from the matched set without being counted as
//! unmatched.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::domain::entities::environment::Environment;
use crate::domain::entities::fetch_task::DatasetKey;
use crate::domain::entities::trade_record::TradeRecord;
use crate::domain::errors::{ReconError, ReconResult};
use crate::persistence::trade_files::TradeFileStore;

/// Full outcome of matching one (legal entity, source system) pair
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub prod_count: usize,
    pub uat_count: usize,
    pub matched_count: usize,
    pub unmatched_count: usize,
    pub excluded_count: usize,
    pub matched: Vec<TradeRecord>,
}

impl MatchResult {
    pub fn summary(&self) -> MatchSummary {
        MatchSummary {
            prod_count: self.prod_count,
            uat_count: self.uat_count,
            matched_count: self.matched_count,
            unmatched_count: self.unmatched_count,
            excluded_count: self.excluded_count,
        }
    }
}

/// Counts published to the status registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSummary {
    pub prod_count: usize,
    pub uat_count: usize,
    pub matched_count: usize,
    pub unmatched_count: usize,
    pub excluded_count: usize,
}

/// Match UAT against PROD by trade id
pub fn match_records(uat: Vec<TradeRecord>, prod: &[TradeRecord]) -> MatchResult {
    let prod_ids: HashSet<&str> = prod.iter().map(|r| r.trade_id.as_str()).collect();
    let uat_count = uat.len();

    let mut matched = Vec::new();
    let mut unmatched_count = 0;
    let mut excluded_count = 0;

    for record in uat {
        if !prod_ids.contains(record.trade_id.as_str()) {
            unmatched_count += 1;
        } else if record.is_excluded() {
            excluded_count += 1;
        } else {
            matched.push(record);
        }
    }

    MatchResult {
        prod_count: prod.len(),
        uat_count,
        matched_count: matched.len(),
        unmatched_count,
        excluded_count,
        matched,
    }
}

/// Load both stored datasets for `key` and match them.
///
/// Returns `NotFound` when either dataset is absent and `Matching` when a
/// dataset exists but cannot be read.
pub fn match_stored(store: &TradeFileStore, key: &DatasetKey) -> ReconResult<MatchResult> {
    let uat = load(store, Environment::Uat, key)?;
    let prod = load(store, Environment::Prod, key)?;

    warn_on_duplicate_ids(&uat, Environment::Uat, key);
    warn_on_duplicate_ids(&prod, Environment::Prod, key);

    let result = match_records(uat, &prod);
    debug!(
        pair = %key.pair_label(),
        uat = result.uat_count,
        prod = result.prod_count,
        matched = result.matched_count,
        unmatched = result.unmatched_count,
        excluded = result.excluded_count,
        "Matched datasets"
    );
    Ok(result)
}

fn load(
    store: &TradeFileStore,
    environment: Environment,
    key: &DatasetKey,
) -> ReconResult<Vec<TradeRecord>> {
    store.read_trades(environment, key).map_err(|e| match e {
        ReconError::NotFound(msg) => ReconError::NotFound(msg),
        other => ReconError::Matching(format!(
            "could not read {} dataset {}: {}",
            environment,
            key.file_stem(),
            other
        )),
    })
}

fn warn_on_duplicate_ids(records: &[TradeRecord], environment: Environment, key: &DatasetKey) {
    let mut seen = HashSet::with_capacity(records.len());
    let duplicates = records
        .iter()
        .filter(|r| !seen.insert(r.trade_id.as_str()))
        .count();
    if duplicates > 0 {
        warn!(
            pair = %key.pair_label(),
            environment = %environment,
            duplicates,
            "Dataset contains duplicate trade ids"
        );
    }
}
