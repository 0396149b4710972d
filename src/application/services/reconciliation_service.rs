//! Reconciliation Service
//!
//! Facade the HTTP layer talks to. Owns the scheduler, the threshold table
//! and the status registry, and supervises one background job per submitted
//! request.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::application::registry::{PairMatching, RequestRecord, StatusRegistry};
use crate::config::ReconConfig;
use crate::domain::entities::deviation_bucket::DeviationBucket;
use crate::domain::entities::environment::Environment;
use crate::domain::entities::fetch_task::{ReconciliationRequest, ReconciliationRequestPayload};
use crate::domain::entities::processing_status::ProcessingStatus;
use crate::domain::entities::threshold::{
    IngestSummary, ThresholdImpact, ThresholdListing, ThresholdMode, ThresholdUpdateAck,
    UpdateTarget,
};
use crate::domain::entities::trade_record::TradeRecord;
use crate::domain::errors::{ReconError, ReconResult};
use crate::domain::repositories::trade_source::TradeSource;
use crate::domain::services::bucketizer::DeviationBucketizer;
use crate::domain::services::fetch_scheduler::FetchScheduler;
use crate::domain::services::impact::threshold_impact;
use crate::domain::services::matcher::{match_records, match_stored};
use crate::domain::services::threshold_table::ThresholdTable;
use crate::persistence::threshold_store::ThresholdFileStore;
use crate::persistence::trade_files::{read_trade_file, TradeFileStore};
use crate::persistence::DataDir;

/// What `export` can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Trades,
    Thresholds,
}

impl std::str::FromStr for ExportKind {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trades" => Ok(ExportKind::Trades),
            "thresholds" => Ok(ExportKind::Thresholds),
            other => Err(ReconError::Validation(format!(
                "Unknown export type '{}' (expected 'trades' or 'thresholds')",
                other
            ))),
        }
    }
}

/// Tabular export ready to be sent as an attachment
#[derive(Debug, Clone, PartialEq)]
pub struct ExportFile {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Background job per in-flight request, keyed by request id
type JobMap = Arc<Mutex<HashMap<String, JoinHandle<()>>>>;

pub struct ReconciliationService {
    scheduler: FetchScheduler,
    trade_store: TradeFileStore,
    threshold_store: ThresholdFileStore,
    thresholds: Arc<ThresholdTable>,
    registry: Arc<StatusRegistry>,
    bucketizer: DeviationBucketizer,
    /// Jobs still running; each removes itself when it finishes. Also where
    /// cancellation would hook in.
    jobs: JobMap,
    sequence: AtomicU64,
}

impl ReconciliationService {
    /// Prepare the data directory and reload persisted thresholds
    pub async fn open(config: &ReconConfig, source: Arc<dyn TradeSource>) -> ReconResult<Arc<Self>> {
        let data = DataDir::new(config.data_dir.clone());
        let init = data.clone();
        tokio::task::spawn_blocking(move || init.initialize()).await??;

        let trade_store = TradeFileStore::new(data.clone());
        let threshold_store = ThresholdFileStore::new(data);
        let thresholds = ThresholdTable::open(threshold_store.clone()).await?;

        let scheduler = FetchScheduler::new(source, trade_store.clone())
            .with_max_workers(config.max_parallel_fetches)
            .with_retry(config.retry_config());

        info!(
            data_dir = %config.data_dir.display(),
            source = scheduler.source_name(),
            max_workers = scheduler.max_workers(),
            "Reconciliation service ready"
        );

        Ok(Arc::new(Self {
            scheduler,
            trade_store,
            threshold_store,
            thresholds,
            registry: Arc::new(StatusRegistry::new()),
            bucketizer: DeviationBucketizer::new(config.tracked_currencies.clone()),
            jobs: Arc::new(Mutex::new(HashMap::new())),
            sequence: AtomicU64::new(1),
        }))
    }

    /// Validate the request, register it and start processing in the background.
    /// Returns as soon as the request id is registered.
    pub async fn submit_reconciliation(&self, payload: ReconciliationRequestPayload) -> ReconResult<String> {
        let request = payload.validate()?;
        let request_id = self.next_request_id();
        self.registry.create(&request_id).await?;

        info!(
            request_id = %request_id,
            product_type = %request.product_type,
            legal_entities = request.legal_entities.len(),
            source_systems = request.source_systems.len(),
            tasks = request.expected_task_count(),
            "Reconciliation submitted"
        );

        // Held across spawn so the job cannot deregister before it is inserted
        let mut jobs = self.jobs.lock().await;
        let job = tokio::spawn(supervise(
            request_id.clone(),
            request,
            self.scheduler.clone(),
            self.trade_store.clone(),
            self.registry.clone(),
            self.jobs.clone(),
        ));
        jobs.insert(request_id.clone(), job);
        Ok(request_id)
    }

    pub async fn get_status(&self, request_id: &str) -> ReconResult<RequestRecord> {
        self.registry.get(request_id).await
    }

    /// Wait for the background job of `request_id` and return its final record
    pub async fn wait_for_completion(&self, request_id: &str) -> ReconResult<RequestRecord> {
        let job = self.jobs.lock().await.remove(request_id);
        if let Some(job) = job {
            job.await?;
        }
        self.registry.get(request_id).await
    }

    pub async fn ingest_thresholds(&self, csv_bytes: &[u8], mode: ThresholdMode) -> ReconResult<IngestSummary> {
        self.thresholds.ingest_csv(csv_bytes, mode).await
    }

    pub async fn read_thresholds(&self, mode: ThresholdMode) -> ThresholdListing {
        self.thresholds.read(mode).await
    }

    pub async fn update_threshold(
        &self,
        mode: ThresholdMode,
        target: UpdateTarget,
        value: f64,
    ) -> ReconResult<ThresholdUpdateAck> {
        self.thresholds.update(mode, target, value).await
    }

    /// Bucket the matched trades of every UAT/PROD pair stored on disk
    pub async fn compute_deviation_buckets(&self, mode: ThresholdMode) -> ReconResult<Vec<DeviationBucket>> {
        let trades = self.matched_trades_on_disk().await?;
        let buckets = self.bucketizer.bucketize(&trades);
        debug!(mode = %mode, trades = trades.len(), "Computed deviation buckets");
        Ok(buckets)
    }

    /// Alert counts before and after moving the selected rows to `value`
    pub async fn threshold_impact(
        &self,
        mode: ThresholdMode,
        target: UpdateTarget,
        value: f64,
    ) -> ReconResult<ThresholdImpact> {
        if target.mode() != mode {
            return Err(ReconError::Validation(format!(
                "Target {} cannot be used in {} mode",
                target, mode
            )));
        }
        let rows = self.thresholds.rows(mode).await.ok_or_else(|| {
            ReconError::NotFound(format!("No thresholds have been ingested in {} mode", mode))
        })?;
        if !rows.iter().any(|r| r.matches(&target)) {
            return Err(ReconError::NotFound(format!("Threshold target {} not found", target)));
        }

        let trades = self.matched_trades_on_disk().await?;
        let impact = threshold_impact(&rows, &target, value, &trades);
        info!(
            mode = %mode,
            target = %target,
            value,
            current_alerts = impact.current_alerts,
            new_alerts = impact.new_alerts,
            "Computed threshold impact"
        );
        Ok(impact)
    }

    pub async fn export(&self, kind: ExportKind) -> ReconResult<ExportFile> {
        match kind {
            ExportKind::Trades => {
                let store = self.trade_store.clone();
                let bytes = tokio::task::spawn_blocking(move || store.export_uat_trades())
                    .await??
                    .ok_or_else(|| ReconError::NotAvailable("no trade data has been fetched".to_string()))?;
                Ok(ExportFile {
                    file_name: "all_trades.csv".to_string(),
                    content_type: "text/csv",
                    bytes,
                })
            }
            ExportKind::Thresholds => {
                let store = self.threshold_store.clone();
                let bytes = tokio::task::spawn_blocking(move || store.read_bytes(ThresholdMode::Group))
                    .await??
                    .ok_or_else(|| {
                        ReconError::NotAvailable("no group thresholds have been ingested".to_string())
                    })?;
                Ok(ExportFile {
                    file_name: format!("processed_thresholds_{}.csv", ThresholdMode::Group),
                    content_type: "text/csv",
                    bytes,
                })
            }
        }
    }

    async fn matched_trades_on_disk(&self) -> ReconResult<Vec<TradeRecord>> {
        let store = self.trade_store.clone();
        tokio::task::spawn_blocking(move || {
            let mut matched = Vec::new();
            for pair in store.stored_pairs()? {
                let loaded = read_trade_file(&pair.uat).and_then(|uat| Ok((uat, read_trade_file(&pair.prod)?)));
                match loaded {
                    Ok((uat, prod)) => matched.extend(match_records(uat, &prod).matched),
                    Err(e) => warn!(dataset = %pair.stem, error = %e, "Skipping unreadable dataset pair"),
                }
            }
            Ok(matched)
        })
        .await?
    }

    fn next_request_id(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("req_{}_{}", chrono::Local::now().format("%Y%m%d_%H%M%S"), seq)
    }
}

/// Run the job on its own task so that a panic is still recorded as a
/// failed request.
async fn supervise(
    request_id: String,
    request: ReconciliationRequest,
    scheduler: FetchScheduler,
    store: TradeFileStore,
    registry: Arc<StatusRegistry>,
    jobs: JobMap,
) {
    let job = tokio::spawn(process_request(
        request_id.clone(),
        request,
        scheduler,
        store,
        registry.clone(),
    ));

    let failure = match job.await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(e) => Some(ReconError::from(e).to_string()),
    };

    if let Some(message) = failure {
        error!(request_id = %request_id, error = %message, "Reconciliation job failed");
        if let Err(e) = registry.fail(&request_id, message).await {
            error!(request_id = %request_id, error = %e, "Could not record job failure");
        }
    }

    jobs.lock().await.remove(&request_id);
    debug!(request_id = %request_id, "Reconciliation job finished");
}

async fn process_request(
    request_id: String,
    request: ReconciliationRequest,
    scheduler: FetchScheduler,
    store: TradeFileStore,
    registry: Arc<StatusRegistry>,
) -> ReconResult<()> {
    let statuses = scheduler.run(&request).await;
    let matching = match_completed_pairs(&request, &statuses, &store).await?;
    registry.complete(&request_id, statuses, matching).await
}

/// Match every (legal entity, source system) pair whose UAT and PROD fetches
/// both completed; the rest are recorded as skipped.
async fn match_completed_pairs(
    request: &ReconciliationRequest,
    statuses: &[ProcessingStatus],
    store: &TradeFileStore,
) -> ReconResult<BTreeMap<String, PairMatching>> {
    let mut results = BTreeMap::new();
    if !request.download_trades {
        return Ok(results);
    }

    for legal_entity in &request.legal_entities {
        for source_system in &request.source_systems {
            let key = request.dataset_key(legal_entity, source_system);
            let find = |environment: Environment| {
                statuses.iter().find(|s| {
                    s.environment == environment
                        && &s.legal_entity == legal_entity
                        && &s.source_system == source_system
                })
            };

            let not_ready: Vec<String> = [Environment::Uat, Environment::Prod]
                .into_iter()
                .filter_map(|env| match find(env) {
                    Some(status) if status.is_completed() => None,
                    Some(status) => Some(format!(
                        "{} fetch {}: {}",
                        env,
                        status.state,
                        status.error_message.as_deref().unwrap_or("no error recorded")
                    )),
                    None => Some(format!("{} fetch was not scheduled", env)),
                })
                .collect();

            let outcome = if not_ready.is_empty() {
                let store = store.clone();
                let stored_key = key.clone();
                match tokio::task::spawn_blocking(move || match_stored(&store, &stored_key)).await? {
                    Ok(result) => PairMatching::Matched(result.summary()),
                    Err(e) => {
                        warn!(pair = %key.pair_label(), error = %e, "Matching failed");
                        PairMatching::Failed { error: e.to_string() }
                    }
                }
            } else {
                PairMatching::Skipped {
                    reason: not_ready.join("; "),
                }
            };
            results.insert(key.pair_label(), outcome);
        }
    }
    Ok(results)
}
