//! Gzip-compressed CSV datasets per environment, plus the exceptions file

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{write_atomically, DataDir};
use crate::domain::entities::environment::Environment;
use crate::domain::entities::fetch_task::{DateRange, DatasetKey};
use crate::domain::entities::trade_record::{ExceptionRecord, TradeRecord};
use crate::domain::errors::{ReconError, ReconResult};

const TRADE_FILE_SUFFIX: &str = ".csv.gz";

/// A UAT dataset with its PROD counterpart on disk
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct StoredPair {
    pub stem: String,
    pub uat: PathBuf,
    pub prod: PathBuf,
}

#[derive(Debug, Clone)]
pub struct TradeFileStore {
    data: DataDir,
}

impl TradeFileStore {
    pub fn new(data: DataDir) -> Self {
        Self { data }
    }

    pub fn data_dir(&self) -> &DataDir {
        &self.data
    }

    pub fn trade_path(&self, environment: Environment, key: &DatasetKey) -> PathBuf {
        self.data
            .trades_dir()
            .join(environment.name())
            .join(format!("{}{}", key.file_stem(), TRADE_FILE_SUFFIX))
    }

    pub fn exceptions_path(&self, date_range: &DateRange) -> PathBuf {
        self.data.exceptions_dir().join(format!(
            "exceptions_{}_{}.csv",
            date_range.start_str(),
            date_range.end_str()
        ))
    }

    /// Compress and store one environment's dataset, returning the row count
    pub fn write_trades(
        &self,
        environment: Environment,
        key: &DatasetKey,
        records: &[TradeRecord],
    ) -> ReconResult<usize> {
        let path = self.trade_path(environment, key);
        let mut writer = csv::Writer::from_writer(GzEncoder::new(Vec::new(), Compression::default()));
        for record in records {
            writer.serialize(record)?;
        }
        let encoder = writer
            .into_inner()
            .map_err(|e| ReconError::Storage(e.to_string()))?;
        let bytes = encoder.finish()?;
        write_atomically(&path, &bytes)?;

        debug!(
            path = %path.display(),
            records = records.len(),
            "Stored trade dataset"
        );
        Ok(records.len())
    }

    /// Load one environment's dataset; `NotFound` when it was never stored
    pub fn read_trades(&self, environment: Environment, key: &DatasetKey) -> ReconResult<Vec<TradeRecord>> {
        let path = self.trade_path(environment, key);
        if !path.exists() {
            return Err(ReconError::NotFound(format!(
                "{} dataset {} has not been fetched",
                environment,
                key.file_stem()
            )));
        }
        read_trade_file(&path)
    }

    pub fn write_exceptions(
        &self,
        date_range: &DateRange,
        records: &[ExceptionRecord],
    ) -> ReconResult<usize> {
        let path = self.exceptions_path(date_range);
        let mut writer = csv::Writer::from_writer(Vec::new());
        for record in records {
            writer.serialize(record)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| ReconError::Storage(e.to_string()))?;
        write_atomically(&path, &bytes)?;
        Ok(records.len())
    }

    pub fn read_exceptions(&self, date_range: &DateRange) -> ReconResult<Vec<ExceptionRecord>> {
        let path = self.exceptions_path(date_range);
        if !path.exists() {
            return Err(ReconError::NotFound(format!(
                "exceptions for {} to {} have not been fetched",
                date_range.start_str(),
                date_range.end_str()
            )));
        }
        let mut reader = csv::Reader::from_path(&path)?;
        let records = reader.deserialize().collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Every stored UAT dataset, sorted by file name
    pub fn uat_files(&self) -> ReconResult<Vec<PathBuf>> {
        list_trade_files(&self.data.trades_dir().join(Environment::Uat.name()))
    }

    /// UAT datasets that have a PROD dataset with the same key
    pub fn stored_pairs(&self) -> ReconResult<Vec<StoredPair>> {
        let prod_dir = self.data.trades_dir().join(Environment::Prod.name());
        let mut pairs = Vec::new();
        for uat in self.uat_files()? {
            let Some(file_name) = uat.file_name() else {
                continue;
            };
            let prod = prod_dir.join(file_name);
            if prod.exists() {
                let stem = file_name
                    .to_string_lossy()
                    .trim_end_matches(TRADE_FILE_SUFFIX)
                    .to_string();
                pairs.push(StoredPair { stem, uat, prod });
            }
        }
        pairs.sort();
        Ok(pairs)
    }

    /// All stored UAT rows as a single CSV document; `None` when nothing is stored
    pub fn export_uat_trades(&self) -> ReconResult<Option<Vec<u8>>> {
        let files = self.uat_files()?;
        let mut writer = csv::Writer::from_writer(Vec::new());
        let mut rows = 0usize;

        for path in files {
            match read_trade_file(&path) {
                Ok(records) => {
                    for record in &records {
                        writer.serialize(record)?;
                    }
                    rows += records.len();
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable dataset in export");
                }
            }
        }

        if rows == 0 {
            return Ok(None);
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| ReconError::Storage(e.to_string()))?;
        Ok(Some(bytes))
    }
}

/// Decompress and parse a stored dataset
pub fn read_trade_file(path: &Path) -> ReconResult<Vec<TradeRecord>> {
    let file = File::open(path)?;
    let decoder = MultiGzDecoder::new(BufReader::new(file));
    parse_trades(decoder)
}

/// Parse CSV trade rows from any reader
pub fn parse_trades<R: Read>(reader: R) -> ReconResult<Vec<TradeRecord>> {
    let mut reader = csv::Reader::from_reader(reader);
    let records = reader.deserialize().collect::<Result<Vec<TradeRecord>, _>>()?;
    Ok(records)
}

fn list_trade_files(dir: &Path) -> ReconResult<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_dataset = path
            .file_name()
            .map(|n| n.to_string_lossy().ends_with(TRADE_FILE_SUFFIX))
            .unwrap_or(false);
        if path.is_file() && is_dataset {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
