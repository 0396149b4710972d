use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used across the reconciliation core
pub type ReconResult<T> = Result<T, ReconError>;

#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", content = "message")]
pub enum ReconError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Matching failed: {0}")]
    Matching(String),

    #[error("No data available: {0}")]
    NotAvailable(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReconError {
    /// HTTP status code the thin API layer answers with
    pub fn status_code(&self) -> u16 {
        match self {
            ReconError::Validation(_) | ReconError::MissingColumns(_) => 400,
            ReconError::NotFound(_) | ReconError::NotAvailable(_) => 404,
            ReconError::InvalidTransition { .. } => 409,
            ReconError::Fetch(_) => 502,
            ReconError::Matching(_) | ReconError::Storage(_) | ReconError::Internal(_) => 500,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ReconError::NotFound(_))
    }
}

impl From<std::io::Error> for ReconError {
    fn from(e: std::io::Error) -> Self {
        ReconError::Storage(e.to_string())
    }
}

impl From<csv::Error> for ReconError {
    fn from(e: csv::Error) -> Self {
        ReconError::Storage(e.to_string())
    }
}

impl From<tokio::task::JoinError> for ReconError {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_panic() {
            ReconError::Internal(format!("background task panicked: {}", e))
        } else {
            ReconError::Internal(format!("background task cancelled: {}", e))
        }
    }
}
