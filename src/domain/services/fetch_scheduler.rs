//! Fetch Fan-Out Scheduler
//!
//! Turns a reconciliation request into fetch tasks and runs them on a
//! bounded pool. Every task owns its `ProcessingStatus` and always drives it
//! to a terminal state; a failing or panicking task never affects its
//! siblings. `run` returns only once every task has finished.

use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::domain::entities::environment::Environment;
use crate::domain::entities::fetch_task::{FetchTask, ReconciliationRequest};
use crate::domain::entities::processing_status::{ProcessingStatus, TaskState};
use crate::domain::entities::trade_record::TradeRecord;
use crate::domain::errors::{ReconError, ReconResult};
use crate::domain::repositories::trade_source::{FetchError, TradeSource};
use crate::persistence::trade_files::TradeFileStore;
use crate::task_runner::{retry_with_backoff, RetryConfig};

/// Default cap on simultaneous environment calls per request
pub const DEFAULT_MAX_PARALLEL_FETCHES: usize = 6;

#[derive(Clone)]
pub struct FetchScheduler {
    source: Arc<dyn TradeSource>,
    store: TradeFileStore,
    max_workers: usize,
    retry: RetryConfig,
}

impl FetchScheduler {
    pub fn new(source: Arc<dyn TradeSource>, store: TradeFileStore) -> Self {
        Self {
            source,
            store,
            max_workers: DEFAULT_MAX_PARALLEL_FETCHES,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Fan out every planned task and wait for all of them.
    ///
    /// Statuses are returned in planning order.
    pub async fn run(&self, request: &ReconciliationRequest) -> Vec<ProcessingStatus> {
        let tasks = request.plan_tasks();
        let semaphore = Arc::new(Semaphore::new(self.max_workers));

        info!(
            tasks = tasks.len(),
            max_workers = self.max_workers,
            source = self.source.name(),
            "Starting fetch fan-out"
        );

        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let semaphore = semaphore.clone();
            let source = self.source.clone();
            let store = self.store.clone();
            let retry = self.retry.clone();
            let owned_task = task.clone();

            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        let mut status = ProcessingStatus::pending(&owned_task);
                        settle(&mut status, Err(format!("worker pool unavailable: {}", e)));
                        return status;
                    }
                };
                execute(owned_task, source, store, retry).await
            });
            handles.push((task, handle));
        }

        let (tasks, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let statuses: Vec<ProcessingStatus> = join_all(handles)
            .await
            .into_iter()
            .zip(tasks)
            .map(|(joined, task)| match joined {
                Ok(status) => status,
                Err(e) => {
                    error!(task = %task.label(), error = %e, "Fetch task aborted");
                    let mut status = ProcessingStatus::pending(&task);
                    settle(&mut status, Err(format!("fetch task aborted: {}", e)));
                    status
                }
            })
            .collect();

        let completed = statuses.iter().filter(|s| s.is_completed()).count();
        info!(
            completed,
            failed = statuses.len() - completed,
            "Fetch fan-out finished"
        );
        statuses
    }
}

async fn execute(
    task: FetchTask,
    source: Arc<dyn TradeSource>,
    store: TradeFileStore,
    retry: RetryConfig,
) -> ProcessingStatus {
    let mut status = ProcessingStatus::pending(&task);
    if let Err(e) = status.begin_download() {
        warn!(task = %task.label(), error = %e, "Unexpected status transition");
    }

    let label = task.label();
    info!(task = %label, "Fetching dataset");

    let outcome = fetch_and_store(&task, source.as_ref(), &store, &retry)
        .await
        .map_err(|e| e.to_string());

    match &outcome {
        Ok(count) => info!(task = %label, records = count, "Dataset stored"),
        Err(e) => warn!(task = %label, error = %e, "Fetch task failed"),
    }
    settle(&mut status, outcome);
    status
}

async fn fetch_and_store(
    task: &FetchTask,
    source: &dyn TradeSource,
    store: &TradeFileStore,
    retry: &RetryConfig,
) -> Result<usize, FetchError> {
    let label = task.label();

    match task.environment {
        Environment::Exceptions => {
            let records =
                retry_with_backoff(&label, retry, || source.fetch_exceptions(&task.date_range)).await?;
            let store = store.clone();
            let date_range = task.date_range;
            blocking_write(move || store.write_exceptions(&date_range, &records)).await
        }
        environment => {
            let mut records = retry_with_backoff(&label, retry, || source.fetch_trades(task)).await?;
            for record in &mut records {
                stamp(record, task);
            }
            let store = store.clone();
            let key = task.dataset_key();
            blocking_write(move || store.write_trades(environment, &key, &records)).await
        }
    }
}

/// Fill in the key columns an upstream row may omit
fn stamp(record: &mut TradeRecord, task: &FetchTask) {
    record
        .product_type
        .get_or_insert_with(|| task.product_type.clone());
    record
        .legal_entity
        .get_or_insert_with(|| task.legal_entity.clone());
    record
        .source_system
        .get_or_insert_with(|| task.source_system.clone());
}

async fn blocking_write<F>(write: F) -> Result<usize, FetchError>
where
    F: FnOnce() -> ReconResult<usize> + Send + 'static,
{
    tokio::task::spawn_blocking(write)
        .await
        .map_err(|e| FetchError::Storage(e.to_string()))?
        .map_err(|e: ReconError| FetchError::Storage(e.to_string()))
}

fn settle(status: &mut ProcessingStatus, outcome: Result<usize, String>) {
    if status.state == TaskState::Pending {
        let _ = status.begin_download();
    }
    let transition = match outcome {
        Ok(count) => status.complete(count),
        Err(message) => status.fail(message),
    };
    if let Err(e) = transition {
        error!(
            legal_entity = %status.legal_entity,
            source_system = %status.source_system,
            error = %e,
            "Could not settle task status"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::fetch_task::{DateRange, ReconciliationRequestPayload};
    use crate::domain::entities::trade_record::ExceptionRecord;
    use crate::domain::repositories::trade_source::FetchResult;
    use crate::persistence::DataDir;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct ScriptedSource {
        failing_entity: Option<String>,
        panicking_entity: Option<String>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl TradeSource for ScriptedSource {
        async fn fetch_trades(&self, task: &FetchTask) -> FetchResult<Vec<TradeRecord>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.panicking_entity.as_deref() == Some(task.legal_entity.as_str()) {
                panic!("upstream client crashed");
            }
            if self.failing_entity.as_deref() == Some(task.legal_entity.as_str()) {
                return Err(FetchError::Network("connection reset by peer".to_string()));
            }
            Ok(vec![
                TradeRecord::new("T1", "EURUSD", 0.4),
                TradeRecord::new("T2", "USDJPY", 1.4),
            ])
        }

        async fn fetch_exceptions(&self, _date_range: &DateRange) -> FetchResult<Vec<ExceptionRecord>> {
            Ok(vec![ExceptionRecord {
                trade_id: "T1".to_string(),
                exception_type: "PRICE_DEVIATION".to_string(),
                description: None,
                status: "OPEN".to_string(),
                created_at: None,
            }])
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn request(entities: &[&str], systems: &[&str], exceptions: bool) -> ReconciliationRequest {
        ReconciliationRequestPayload {
            product_type: Some("FX_SPOT".to_string()),
            legal_entities: Some(entities.iter().map(|s| s.to_string()).collect()),
            source_systems: Some(systems.iter().map(|s| s.to_string()).collect()),
            start_date: Some("2024-01-01".to_string()),
            end_date: Some("2024-01-31".to_string()),
            download_trades: Some(true),
            download_exceptions: Some(exceptions),
        }
        .validate()
        .unwrap()
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 2,
            initial_retry_delay: Duration::from_millis(1),
            max_retry_delay: Duration::from_millis(2),
            attempt_timeout: Duration::from_secs(5),
        }
    }

    fn scheduler(source: Arc<ScriptedSource>) -> (tempfile::TempDir, TradeFileStore, FetchScheduler) {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::new(dir.path());
        data.initialize().unwrap();
        let store = TradeFileStore::new(data);
        let scheduler = FetchScheduler::new(source, store.clone()).with_retry(fast_retry());
        (dir, store, scheduler)
    }

    #[tokio::test]
    async fn test_status_count_matches_plan() {
        let (_dir, _store, scheduler) = scheduler(Arc::new(ScriptedSource::default()));
        let request = request(&["GSI", "GSLB"], &["SLANG", "SYS2", "SYS3"], true);

        let statuses = scheduler.run(&request).await;

        assert_eq!(statuses.len(), 2 * 3 * 2 + 1);
        assert_eq!(statuses.len(), request.expected_task_count());
        assert!(statuses.iter().all(|s| s.state.is_terminal()));
        assert!(statuses.iter().all(|s| s.is_completed()));
        assert_eq!(statuses.last().unwrap().environment, Environment::Exceptions);
    }

    #[tokio::test]
    async fn test_one_failure_is_isolated() {
        let source = Arc::new(ScriptedSource {
            failing_entity: Some("GSLB".to_string()),
            ..Default::default()
        });
        let (_dir, store, scheduler) = scheduler(source);
        let request = request(&["GSI", "GSLB"], &["SLANG"], false);

        let statuses = scheduler.run(&request).await;

        assert_eq!(statuses.len(), 4);
        let failed: Vec<_> = statuses.iter().filter(|s| s.state == TaskState::Failed).collect();
        assert_eq!(failed.len(), 2);
        for status in &failed {
            assert_eq!(status.legal_entity, "GSLB");
            assert!(status
                .error_message
                .as_deref()
                .unwrap()
                .contains("connection reset by peer"));
        }
        for status in statuses.iter().filter(|s| s.legal_entity == "GSI") {
            assert_eq!(status.state, TaskState::Completed);
            assert_eq!(status.records_count, 2);
        }

        let stored = store
            .read_trades(Environment::Uat, &request.dataset_key("GSI", "SLANG"))
            .unwrap();
        assert_eq!(stored[0].legal_entity.as_deref(), Some("GSI"));
        assert_eq!(stored[0].source_system.as_deref(), Some("SLANG"));
    }

    #[tokio::test]
    async fn test_panicking_task_is_recorded_as_failed() {
        let source = Arc::new(ScriptedSource {
            panicking_entity: Some("GSI".to_string()),
            ..Default::default()
        });
        let (_dir, _store, scheduler) = scheduler(source);
        let request = request(&["GSI", "GSLB"], &["SLANG"], true);

        let statuses = scheduler.run(&request).await;

        assert_eq!(statuses.len(), 5);
        for status in &statuses {
            if status.legal_entity == "GSI" {
                assert_eq!(status.state, TaskState::Failed);
                assert!(status.error_message.is_some());
            } else {
                assert_eq!(status.state, TaskState::Completed);
            }
        }
    }

    #[tokio::test]
    async fn test_worker_pool_is_bounded() {
        let source = Arc::new(ScriptedSource::default());
        let (_dir, _store, scheduler) = scheduler(source.clone());
        let scheduler = scheduler.with_max_workers(3);
        let request = request(&["A", "B", "C", "D"], &["S1", "S2"], false);

        let statuses = scheduler.run(&request).await;

        assert_eq!(statuses.len(), 16);
        let peak = source.peak.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= 3, "peak concurrency was {}", peak);
    }

    #[tokio::test]
    async fn test_exceptions_only_request() {
        let (_dir, store, scheduler) = scheduler(Arc::new(ScriptedSource::default()));
        let mut request = request(&["GSI"], &["SLANG"], true);
        request.download_trades = false;

        let statuses = scheduler.run(&request).await;

        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].records_count, 1);
        assert_eq!(store.read_exceptions(&request.date_range).unwrap().len(), 1);
    }
}
