//! Processing Status Registry
//!
//! Tracks every submitted reconciliation request by id. All writes take the
//! registry-wide write lock, so a reader sees an entry either before or after
//! a transition and never in between. The map itself is never handed out;
//! readers receive clones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::entities::processing_status::ProcessingStatus;
use crate::domain::errors::{ReconError, ReconResult};
use crate::domain::services::matcher::MatchSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    Started,
    Completed,
    Failed,
}

impl RequestState {
    pub fn name(&self) -> &'static str {
        match self {
            RequestState::Started => "started",
            RequestState::Completed => "completed",
            RequestState::Failed => "failed",
        }
    }
}

/// Outcome of matching one (legal entity, source system) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum PairMatching {
    Matched(MatchSummary),
    /// One of the two fetches did not complete
    Skipped { reason: String },
    /// Both datasets exist but could not be matched
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub request_id: String,
    pub state: RequestState,
    pub statuses: Vec<ProcessingStatus>,
    pub matching_results: BTreeMap<String, PairMatching>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct StatusRegistry {
    entries: RwLock<HashMap<String, RequestRecord>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new request in the `started` state
    pub async fn create(&self, request_id: &str) -> ReconResult<()> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(request_id) {
            return Err(ReconError::Internal(format!(
                "Request {} is already registered",
                request_id
            )));
        }
        let now = Utc::now();
        entries.insert(
            request_id.to_string(),
            RequestRecord {
                request_id: request_id.to_string(),
                state: RequestState::Started,
                statuses: Vec::new(),
                matching_results: BTreeMap::new(),
                error: None,
                created_at: now,
                updated_at: now,
            },
        );
        info!(request_id, "Request registered");
        Ok(())
    }

    /// Publish task statuses and matching results together
    pub async fn complete(
        &self,
        request_id: &str,
        statuses: Vec<ProcessingStatus>,
        matching_results: BTreeMap<String, PairMatching>,
    ) -> ReconResult<()> {
        let mut entries = self.entries.write().await;
        let record = started_entry(&mut entries, request_id, RequestState::Completed)?;
        record.state = RequestState::Completed;
        record.statuses = statuses;
        record.matching_results = matching_results;
        record.updated_at = Utc::now();
        info!(
            request_id,
            tasks = record.statuses.len(),
            pairs = record.matching_results.len(),
            "Request completed"
        );
        Ok(())
    }

    pub async fn fail(&self, request_id: &str, error: impl Into<String>) -> ReconResult<()> {
        let mut entries = self.entries.write().await;
        let record = started_entry(&mut entries, request_id, RequestState::Failed)?;
        let error = error.into();
        warn!(request_id, error = %error, "Request failed");
        record.state = RequestState::Failed;
        record.error = Some(error);
        record.updated_at = Utc::now();
        Ok(())
    }

    pub async fn get(&self, request_id: &str) -> ReconResult<RequestRecord> {
        self.entries
            .read()
            .await
            .get(request_id)
            .cloned()
            .ok_or_else(|| ReconError::NotFound(format!("Request {} not found", request_id)))
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

fn started_entry<'a>(
    entries: &'a mut HashMap<String, RequestRecord>,
    request_id: &str,
    next: RequestState,
) -> ReconResult<&'a mut RequestRecord> {
    let record = entries
        .get_mut(request_id)
        .ok_or_else(|| ReconError::NotFound(format!("Request {} not found", request_id)))?;
    if record.state != RequestState::Started {
        return Err(ReconError::InvalidTransition {
            from: record.state.name().to_string(),
            to: next.name().to_string(),
        });
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::environment::Environment;
    use crate::domain::entities::processing_status::TaskState;
    use std::sync::Arc;

    fn status(state: TaskState) -> ProcessingStatus {
        ProcessingStatus {
            legal_entity: "GSI".to_string(),
            source_system: "SLANG".to_string(),
            environment: Environment::Uat,
            state,
            records_count: 10,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn test_lifecycle_to_completed() {
        let registry = StatusRegistry::new();
        registry.create("req_1").await.unwrap();

        let record = registry.get("req_1").await.unwrap();
        assert_eq!(record.state, RequestState::Started);
        assert!(record.statuses.is_empty());

        let mut matching = BTreeMap::new();
        matching.insert(
            "GSI_SLANG".to_string(),
            PairMatching::Skipped {
                reason: "PROD fetch failed".to_string(),
            },
        );
        registry
            .complete("req_1", vec![status(TaskState::Completed)], matching)
            .await
            .unwrap();

        let record = registry.get("req_1").await.unwrap();
        assert_eq!(record.state, RequestState::Completed);
        assert_eq!(record.statuses.len(), 1);
        assert_eq!(record.matching_results.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let registry = StatusRegistry::new();
        assert!(registry.get("missing").await.unwrap_err().is_not_found());
        assert!(registry.fail("missing", "boom").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_terminal_states_are_final() {
        let registry = StatusRegistry::new();
        registry.create("req_1").await.unwrap();
        registry.fail("req_1", "worker crashed").await.unwrap();

        let err = registry
            .complete("req_1", Vec::new(), BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ReconError::InvalidTransition { .. }));

        let record = registry.get("req_1").await.unwrap();
        assert_eq!(record.state, RequestState::Failed);
        assert_eq!(record.error.as_deref(), Some("worker crashed"));
    }

    #[tokio::test]
    async fn test_duplicate_create_is_rejected() {
        let registry = StatusRegistry::new();
        registry.create("req_1").await.unwrap();
        assert!(registry.create("req_1").await.is_err());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_writers_each_land_once() {
        let registry = Arc::new(StatusRegistry::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let id = format!("req_{}", i);
                registry.create(&id).await.unwrap();
                registry
                    .complete(&id, vec![status(TaskState::Completed)], BTreeMap::new())
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(registry.len().await, 32);
        for i in 0..32 {
            let record = registry.get(&format!("req_{}", i)).await.unwrap();
            assert_eq!(record.state, RequestState::Completed);
        }
    }

    #[test]
    fn test_pair_matching_serializes_with_outcome_tag() {
        let json = serde_json::to_value(PairMatching::Failed {
            error: "bad gzip".to_string(),
        })
        .unwrap();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["error"], "bad gzip");
    }
}
