//! Threshold Table
//!
//! Holds the processed threshold rows for each mode and serializes every
//! read-modify-write behind one lock. Each successful mutation is written to
//! disk before it becomes visible to readers.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::entities::threshold::{
    CurrencyThreshold, GroupThreshold, IngestSummary, ThresholdListing, ThresholdMode,
    ThresholdRow, ThresholdUpdateAck, UpdateTarget, REQUIRED_THRESHOLD_COLUMNS,
};
use crate::domain::errors::{ReconError, ReconResult};
use crate::persistence::threshold_store::ThresholdFileStore;

/// Uploaded row before the adjusted columns exist
#[derive(Debug, Deserialize)]
struct UploadedThreshold {
    #[serde(rename = "LegalEntity")]
    legal_entity: String,
    #[serde(rename = "CCY")]
    currency: String,
    #[serde(rename = "Original_Group")]
    original_group: String,
    #[serde(rename = "Original_Threshold")]
    original_threshold: f64,
    #[serde(rename = "Proposed_Group")]
    proposed_group: String,
    #[serde(rename = "Proposed_Threshold")]
    proposed_threshold: f64,
}

impl From<UploadedThreshold> for ThresholdRow {
    fn from(u: UploadedThreshold) -> Self {
        ThresholdRow::from_proposal(
            u.legal_entity.trim(),
            u.currency.trim(),
            u.original_group.trim(),
            u.original_threshold,
            u.proposed_group.trim(),
            u.proposed_threshold,
        )
    }
}

pub struct ThresholdTable {
    tables: Mutex<HashMap<ThresholdMode, Vec<ThresholdRow>>>,
    store: ThresholdFileStore,
}

impl ThresholdTable {
    /// Open the table, reloading any processed files left by a previous run
    pub async fn open(store: ThresholdFileStore) -> ReconResult<Arc<Self>> {
        let loader = store.clone();
        let tables = tokio::task::spawn_blocking(move || {
            let mut tables = HashMap::new();
            for mode in ThresholdMode::ALL {
                if let Some(rows) = loader.load(mode)? {
                    info!(mode = %mode, rows = rows.len(), "Loaded processed thresholds");
                    tables.insert(mode, rows);
                }
            }
            Ok::<_, ReconError>(tables)
        })
        .await??;

        Ok(Arc::new(Self {
            tables: Mutex::new(tables),
            store,
        }))
    }

    /// Validate and store an uploaded CSV, replacing any table for `mode`
    pub async fn ingest_csv(&self, csv_bytes: &[u8], mode: ThresholdMode) -> ReconResult<IngestSummary> {
        let rows = parse_upload(csv_bytes)?;

        if mode == ThresholdMode::Currency {
            let mut seen = HashSet::with_capacity(rows.len());
            for row in &rows {
                if !seen.insert((row.legal_entity.as_str(), row.currency.as_str())) {
                    return Err(ReconError::Validation(format!(
                        "Duplicate threshold row for {}/{}",
                        row.legal_entity, row.currency
                    )));
                }
            }
        }

        let mut tables = self.tables.lock().await;
        self.persist(mode, rows.clone()).await?;
        let rows_processed = rows.len();
        tables.insert(mode, rows);

        info!(mode = %mode, rows = rows_processed, "Thresholds ingested");
        Ok(IngestSummary {
            rows_processed,
            threshold_mode: mode,
        })
    }

    /// Current view for `mode`; empty when nothing was ingested
    pub async fn read(&self, mode: ThresholdMode) -> ThresholdListing {
        let tables = self.tables.lock().await;
        match tables.get(&mode) {
            Some(rows) => shape(mode, rows),
            None => ThresholdListing::empty(mode),
        }
    }

    /// Snapshot of the raw rows for `mode`
    pub async fn rows(&self, mode: ThresholdMode) -> Option<Vec<ThresholdRow>> {
        self.tables.lock().await.get(&mode).cloned()
    }

    /// Set `Adjusted_Threshold` on every row selected by `target`.
    ///
    /// Group targets broadcast to all rows sharing the adjusted group;
    /// currency targets select the single (legal entity, currency) row.
    pub async fn update(
        &self,
        mode: ThresholdMode,
        target: UpdateTarget,
        value: f64,
    ) -> ReconResult<ThresholdUpdateAck> {
        if target.mode() != mode {
            return Err(ReconError::Validation(format!(
                "Target {} cannot be used in {} mode",
                target, mode
            )));
        }
        if !value.is_finite() || value < 0.0 {
            return Err(ReconError::Validation(format!(
                "Threshold must be a non-negative number, got {}",
                value
            )));
        }

        let mut tables = self.tables.lock().await;
        let current = tables.get(&mode).ok_or_else(|| {
            ReconError::NotFound(format!("No thresholds have been ingested in {} mode", mode))
        })?;

        let mut updated = current.clone();
        let mut rows_updated = 0;
        for row in updated.iter_mut().filter(|r| r.matches(&target)) {
            row.adjusted_threshold = value;
            rows_updated += 1;
        }
        if rows_updated == 0 {
            warn!(mode = %mode, target = %target, "Threshold update target not found");
            return Err(ReconError::NotFound(format!("Threshold target {} not found", target)));
        }

        self.persist(mode, updated.clone()).await?;
        tables.insert(mode, updated);

        info!(mode = %mode, target = %target, value, rows_updated, "Threshold adjusted");
        Ok(ThresholdUpdateAck {
            mode,
            target,
            adjusted_threshold: value,
            rows_updated,
        })
    }

    async fn persist(&self, mode: ThresholdMode, rows: Vec<ThresholdRow>) -> ReconResult<()> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.save(mode, &rows)).await?
    }
}

fn parse_upload(csv_bytes: &[u8]) -> ReconResult<Vec<ThresholdRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(csv_bytes);

    let headers = reader
        .headers()
        .map_err(|e| ReconError::Validation(format!("Unreadable threshold file: {}", e)))?
        .clone();
    let missing: Vec<String> = REQUIRED_THRESHOLD_COLUMNS
        .iter()
        .filter(|col| !headers.iter().any(|h| h == **col))
        .map(|col| col.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ReconError::MissingColumns(missing));
    }

    let mut rows = Vec::new();
    for (index, result) in reader.deserialize::<UploadedThreshold>().enumerate() {
        let uploaded = result
            .map_err(|e| ReconError::Validation(format!("Invalid threshold row {}: {}", index + 1, e)))?;
        rows.push(ThresholdRow::from(uploaded));
    }
    Ok(rows)
}

fn shape(mode: ThresholdMode, rows: &[ThresholdRow]) -> ThresholdListing {
    match mode {
        ThresholdMode::Group => {
            let mut groups: BTreeMap<&str, (f64, f64, f64)> = BTreeMap::new();
            for row in rows {
                groups
                    .entry(row.adjusted_group.as_str())
                    .and_modify(|(o, p, a)| {
                        *o = o.max(row.original_threshold);
                        *p = p.max(row.proposed_threshold);
                        *a = a.max(row.adjusted_threshold);
                    })
                    .or_insert((row.original_threshold, row.proposed_threshold, row.adjusted_threshold));
            }
            ThresholdListing::Group(
                groups
                    .into_iter()
                    .enumerate()
                    .map(|(i, (group, (original, proposed, adjusted)))| GroupThreshold {
                        id: i + 1,
                        group: group.to_string(),
                        original_threshold: original,
                        proposed_threshold: proposed,
                        adjusted_threshold: adjusted,
                    })
                    .collect(),
            )
        }
        ThresholdMode::Currency => ThresholdListing::Currency(
            rows.iter()
                .enumerate()
                .map(|(i, row)| CurrencyThreshold {
                    id: i + 1,
                    legal_entity: row.legal_entity.clone(),
                    currency: row.currency.clone(),
                    group: row.adjusted_group.clone(),
                    original_threshold: row.original_threshold,
                    proposed_threshold: row.proposed_threshold,
                    adjusted_threshold: row.adjusted_threshold,
                })
                .collect(),
        ),
    }
}
