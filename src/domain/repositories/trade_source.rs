//! Trade Source Trait
//!
//! Upstream retrieval of per-environment trade datasets and the exception
//! dataset. The scheduler only talks to this trait, so the HTTP client and
//! the fixture generator are interchangeable and tests can inject doubles.

use async_trait::async_trait;

use crate::domain::entities::fetch_task::{DateRange, FetchTask};
use crate::domain::entities::trade_record::{ExceptionRecord, TradeRecord};

/// Common result type for upstream retrieval
pub type FetchResult<T> = Result<T, FetchError>;

/// Errors that can occur while retrieving a dataset
#[derive(Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Connection or transport failure
    Network(String),
    /// Upstream answered with a non-success status
    HttpStatus { status: u16, body: String },
    /// Body could not be decoded
    Parse(String),
    /// Attempt exceeded the configured timeout
    Timeout(u64),
    /// Dataset could not be written locally
    Storage(String),
    /// Source cannot serve this task
    Unsupported(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Network(msg) => write!(f, "Network error: {}", msg),
            FetchError::HttpStatus { status, body } => {
                write!(f, "Upstream returned HTTP {}: {}", status, body)
            }
            FetchError::Parse(msg) => write!(f, "Parse error: {}", msg),
            FetchError::Timeout(ms) => write!(f, "Timed out after {}ms", ms),
            FetchError::Storage(msg) => write!(f, "Storage error: {}", msg),
            FetchError::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
        }
    }
}

impl std::error::Error for FetchError {}

impl FetchError {
    /// Whether a later attempt may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout(_) => true,
            FetchError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            FetchError::Parse(_) | FetchError::Storage(_) | FetchError::Unsupported(_) => false,
        }
    }
}

/// Source of environment datasets
#[async_trait]
pub trait TradeSource: Send + Sync {
    /// Fetch the trade dataset for a UAT or PROD task
    async fn fetch_trades(&self, task: &FetchTask) -> FetchResult<Vec<TradeRecord>>;

    /// Fetch exception records for a date range
    async fn fetch_exceptions(&self, date_range: &DateRange) -> FetchResult<Vec<ExceptionRecord>>;

    /// Short name used in logs
    fn name(&self) -> &str;
}
