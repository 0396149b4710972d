//! Reconciliation End-to-End Tests
//!
//! Drive the service the way the HTTP layer does: submit a request, wait for
//! the background job, then inspect the registry, the buckets and the export.
//!
//! Test Categories:
//! 1. Fan-out and failure isolation through the service
//! 2. Full HTTP round trip against a live server

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use trade_recon::application::handlers::router;
use trade_recon::application::registry::{PairMatching, RequestState};
use trade_recon::application::services::reconciliation_service::ReconciliationService;
use trade_recon::config::ReconConfig;
use trade_recon::domain::entities::environment::Environment;
use trade_recon::domain::entities::fetch_task::{DateRange, FetchTask, ReconciliationRequestPayload};
use trade_recon::domain::entities::processing_status::TaskState;
use trade_recon::domain::entities::trade_record::{ExceptionRecord, TradeRecord};
use trade_recon::domain::repositories::trade_source::{FetchError, FetchResult, TradeSource};
use trade_recon::infrastructure::fixture_trade_source::FixtureTradeSource;

/// Serves fixed datasets; PROD for `down_entity` is unreachable
struct FlakyUpstream {
    down_entity: &'static str,
}

#[async_trait]
impl TradeSource for FlakyUpstream {
    async fn fetch_trades(&self, task: &FetchTask) -> FetchResult<Vec<TradeRecord>> {
        if task.legal_entity == self.down_entity && task.environment == Environment::Prod {
            return Err(FetchError::Network("connection refused".to_string()));
        }
        Ok(match task.environment {
            Environment::Uat => vec![
                TradeRecord::new("1", "EURUSD", 0.3),
                TradeRecord::new("2", "GBPUSD", 0.9).with_description("Trade is Out Of Scope"),
                TradeRecord::new("3", "USDJPY", 2.4),
            ],
            _ => vec![
                TradeRecord::new("2", "GBPUSD", 0.9),
                TradeRecord::new("3", "USDJPY", 2.4),
                TradeRecord::new("4", "EURUSD", 0.1),
            ],
        })
    }

    async fn fetch_exceptions(&self, _date_range: &DateRange) -> FetchResult<Vec<ExceptionRecord>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

fn config(dir: &tempfile::TempDir) -> ReconConfig {
    ReconConfig {
        data_dir: dir.path().to_path_buf(),
        fetch_max_attempts: 2,
        fetch_retry_delay_ms: 1,
        ..ReconConfig::default()
    }
}

fn payload(entities: &[&str], exceptions: bool) -> ReconciliationRequestPayload {
    ReconciliationRequestPayload {
        product_type: Some("FX_SPOT".to_string()),
        legal_entities: Some(entities.iter().map(|e| e.to_string()).collect()),
        source_systems: Some(vec!["SLANG".to_string()]),
        start_date: Some("2024-01-01".to_string()),
        end_date: Some("2024-01-31".to_string()),
        download_trades: Some(true),
        download_exceptions: Some(exceptions),
    }
}

// ============================================================================
// 1. Fan-out and failure isolation
// ============================================================================

#[tokio::test]
async fn test_one_failed_task_keeps_request_completed() {
    let dir = tempfile::tempdir().unwrap();
    let service = ReconciliationService::open(&config(&dir), Arc::new(FlakyUpstream { down_entity: "GSLB" }))
        .await
        .unwrap();

    let id = service
        .submit_reconciliation(payload(&["GSI", "GSLB"], false))
        .await
        .unwrap();
    let record = service.wait_for_completion(&id).await.unwrap();

    assert_eq!(record.state, RequestState::Completed);
    assert_eq!(record.statuses.len(), 4);

    let failed: Vec<_> = record
        .statuses
        .iter()
        .filter(|s| s.state == TaskState::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].legal_entity, "GSLB");
    assert_eq!(failed[0].environment, Environment::Prod);
    assert!(failed[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("connection refused"));
    assert_eq!(
        record
            .statuses
            .iter()
            .filter(|s| s.state == TaskState::Completed)
            .count(),
        3
    );

    match &record.matching_results["GSI_SLANG"] {
        PairMatching::Matched(summary) => {
            assert_eq!(summary.uat_count, 3);
            assert_eq!(summary.prod_count, 3);
            assert_eq!(summary.matched_count, 1);
            assert_eq!(summary.unmatched_count, 1);
            assert_eq!(summary.excluded_count, 1);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(matches!(
        record.matching_results["GSLB_SLANG"],
        PairMatching::Skipped { .. }
    ));
}

#[tokio::test]
async fn test_status_count_follows_request_shape() {
    let dir = tempfile::tempdir().unwrap();
    let service = ReconciliationService::open(&config(&dir), Arc::new(FixtureTradeSource::new(10)))
        .await
        .unwrap();

    let mut request = payload(&["GSI", "GSLB", "GSJP"], true);
    request.source_systems = Some(vec!["SLANG".to_string(), "TOMS".to_string()]);
    let id = service.submit_reconciliation(request).await.unwrap();
    let record = service.wait_for_completion(&id).await.unwrap();

    assert_eq!(record.statuses.len(), 3 * 2 * 2 + 1);
    assert!(record.statuses.iter().all(|s| s.state.is_terminal()));
    let exceptions = record
        .statuses
        .iter()
        .find(|s| s.environment == Environment::Exceptions)
        .unwrap();
    assert_eq!(exceptions.legal_entity, "ALL");
    assert_eq!(exceptions.records_count, 50);
}

#[tokio::test]
async fn test_concurrent_requests_are_tracked_independently() {
    let dir = tempfile::tempdir().unwrap();
    let service = ReconciliationService::open(&config(&dir), Arc::new(FixtureTradeSource::new(10)))
        .await
        .unwrap();

    let mut ids = Vec::new();
    for entity in ["GSI", "GSLB", "GSJP", "GSAU"] {
        ids.push(service.submit_reconciliation(payload(&[entity], false)).await.unwrap());
    }
    for id in &ids {
        let record = service.wait_for_completion(id).await.unwrap();
        assert_eq!(record.request_id, *id);
        assert_eq!(record.state, RequestState::Completed);
        assert_eq!(record.statuses.len(), 2);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_requests_for_the_same_dataset_key_do_not_collide() {
    let dir = tempfile::tempdir().unwrap();
    let service = ReconciliationService::open(&config(&dir), Arc::new(FixtureTradeSource::new(3000)))
        .await
        .unwrap();

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(
            service
                .submit_reconciliation(payload(&["GSI", "GSI", "GSI"], false))
                .await
                .unwrap(),
        );
    }

    for id in &ids {
        let record = service.wait_for_completion(id).await.unwrap();
        assert_eq!(record.state, RequestState::Completed);
        // duplicate entries collapse into one UAT and one PROD task
        assert_eq!(record.statuses.len(), 2);
        for status in &record.statuses {
            assert_eq!(
                status.state,
                TaskState::Completed,
                "{} failed: {:?}",
                status.environment,
                status.error_message
            );
        }
        assert!(matches!(
            record.matching_results["GSI_SLANG"],
            PairMatching::Matched(_)
        ));
    }
}

#[tokio::test]
async fn test_path_like_names_are_rejected_before_any_write() {
    let root = tempfile::tempdir().unwrap();
    let data_dir = root.path().join("data");
    let cfg = ReconConfig {
        data_dir: data_dir.clone(),
        ..config(&root)
    };
    let service = ReconciliationService::open(&cfg, Arc::new(FixtureTradeSource::new(10)))
        .await
        .unwrap();

    for hostile in ["x/../../../../escaped", "..", "GSI/UAT"] {
        let err = service
            .submit_reconciliation(payload(&[hostile], false))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400, "{} was accepted", hostile);
    }

    let mut request = payload(&["GSI"], false);
    request.source_systems = Some(vec!["../SLANG".to_string()]);
    assert_eq!(service.submit_reconciliation(request).await.unwrap_err().status_code(), 400);

    // only the data directory exists under the root, and it holds no datasets
    let entries: Vec<_> = std::fs::read_dir(root.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(entries, vec![std::ffi::OsString::from("data")]);
    for env in ["UAT", "PROD"] {
        let stored = std::fs::read_dir(data_dir.join("trades").join(env)).unwrap().count();
        assert_eq!(stored, 0);
    }
}

// ============================================================================
// 2. HTTP round trip
// ============================================================================

async fn spawn_server(service: Arc<ReconciliationService>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(service)).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn poll_until_done(client: &reqwest::Client, base: &str, id: &str) -> Value {
    for _ in 0..200 {
        let body: Value = client
            .get(format!("{}/api/data/status/{}", base, id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if body["state"] != "started" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("request {} never finished", id);
}

#[tokio::test]
async fn test_http_download_status_buckets_and_export() {
    let dir = tempfile::tempdir().unwrap();
    let service = ReconciliationService::open(&config(&dir), Arc::new(FixtureTradeSource::new(50)))
        .await
        .unwrap();
    let base = spawn_server(service).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{}/api/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");

    let response = client
        .post(format!("{}/api/data/download", base))
        .json(&json!({ "product_type": "FX_SPOT" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let submitted: Value = client
        .post(format!("{}/api/data/download", base))
        .json(&json!({
            "product_type": "FX_SPOT",
            "legal_entities": ["GSI"],
            "source_systems": ["SLANG"],
            "start_date": "2024-01-01",
            "end_date": "2024-01-31"
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(submitted["status"], "processing_started");
    let id = submitted["request_id"].as_str().unwrap().to_string();

    let status = poll_until_done(&client, &base, &id).await;
    assert_eq!(status["state"], "completed");
    assert_eq!(status["statuses"].as_array().unwrap().len(), 3);
    assert_eq!(status["matching_results"]["GSI_SLANG"]["outcome"], "matched");

    let buckets: Value = client
        .post(format!("{}/api/analysis/deviation-buckets", base))
        .json(&json!({ "threshold_mode": "group" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let buckets = buckets.as_array().unwrap();
    assert_eq!(buckets.len(), 5);
    assert_eq!(buckets[0]["range"], "0.0% - 0.5%");
    assert_eq!(buckets[0]["isExceeding"], false);
    assert_eq!(buckets[4]["isExceeding"], true);
    let matched = status["matching_results"]["GSI_SLANG"]["matched_count"].as_u64().unwrap();
    let total: u64 = buckets.iter().map(|b| b["total"].as_u64().unwrap()).sum();
    assert_eq!(total, matched);

    let export = client
        .get(format!("{}/api/export/trades", base))
        .send()
        .await
        .unwrap();
    assert_eq!(export.status(), 200);
    assert!(export
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .contains("all_trades.csv"));
    let text = export.text().await.unwrap();
    assert!(text.starts_with("trade_id,"));
    assert_eq!(text.lines().count(), 51);

    let missing = client
        .get(format!("{}/api/data/status/req_unknown", base))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
}
