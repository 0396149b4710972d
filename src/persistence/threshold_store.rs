//! Processed threshold tables, one CSV file per mode tag

use std::path::PathBuf;
use tracing::debug;

use super::{write_atomically, DataDir};
use crate::domain::entities::threshold::{ThresholdMode, ThresholdRow};
use crate::domain::errors::{ReconError, ReconResult};

#[derive(Debug, Clone)]
pub struct ThresholdFileStore {
    data: DataDir,
}

impl ThresholdFileStore {
    pub fn new(data: DataDir) -> Self {
        Self { data }
    }

    pub fn path(&self, mode: ThresholdMode) -> PathBuf {
        self.data
            .thresholds_dir()
            .join(format!("processed_thresholds_{}.csv", mode.tag()))
    }

    pub fn save(&self, mode: ThresholdMode, rows: &[ThresholdRow]) -> ReconResult<()> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for row in rows {
            writer.serialize(row)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| ReconError::Storage(e.to_string()))?;
        write_atomically(&self.path(mode), &bytes)?;
        debug!(mode = %mode, rows = rows.len(), "Saved threshold table");
        Ok(())
    }

    /// Previously processed table for `mode`, if any
    pub fn load(&self, mode: ThresholdMode) -> ReconResult<Option<Vec<ThresholdRow>>> {
        let path = self.path(mode);
        if !path.exists() {
            return Ok(None);
        }
        let mut reader = csv::Reader::from_path(&path)?;
        let rows = reader
            .deserialize()
            .collect::<Result<Vec<ThresholdRow>, _>>()?;
        Ok(Some(rows))
    }

    /// Raw file content for export
    pub fn read_bytes(&self, mode: ThresholdMode) -> ReconResult<Option<Vec<u8>>> {
        let path = self.path(mode);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read(path)?))
    }
}
