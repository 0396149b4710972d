//! Persistence Layer
//!
//! Flat-file storage for fetched datasets and processed thresholds.
//!
//! # Layout
//!
//! ```text
//! {data_dir}/
//!   trades/UAT/{product}_{entity}_{system}_{start}_{end}.csv.gz
//!   trades/PROD/{product}_{entity}_{system}_{start}_{end}.csv.gz
//!   exceptions/exceptions_{start}_{end}.csv
//!   thresholds/processed_thresholds_{mode}.csv
//! ```
//!
//! All functions here do blocking file I/O; async callers go through
//! `tokio::task::spawn_blocking`.

pub mod threshold_store;
pub mod trade_files;

use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::domain::errors::ReconResult;

/// Root of the on-disk layout
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create every directory of the layout
    pub fn initialize(&self) -> ReconResult<()> {
        for dir in [
            self.trades_dir().join("UAT"),
            self.trades_dir().join("PROD"),
            self.exceptions_dir(),
            self.thresholds_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        info!(root = %self.root.display(), "Data directory initialized");
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn trades_dir(&self) -> PathBuf {
        self.root.join("trades")
    }

    pub fn exceptions_dir(&self) -> PathBuf {
        self.root.join("exceptions")
    }

    pub fn thresholds_dir(&self) -> PathBuf {
        self.root.join("thresholds")
    }
}

/// Write `bytes` to `path` through a uniquely named sibling temp file and
/// rename, so readers never observe a half-written file. Concurrent writers
/// of the same path each get their own temp file; the last rename wins.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> ReconResult<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
