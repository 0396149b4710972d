pub mod reconciliation_handler;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::application::services::reconciliation_service::ReconciliationService;
use reconciliation_handler::*;

/// Upper bound for uploaded threshold files and request bodies
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// HTTP routes over the reconciliation service
pub fn router(service: Arc<ReconciliationService>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/data/download", post(download_data))
        .route("/api/data/status/:request_id", get(get_processing_status))
        .route("/api/thresholds/upload", post(upload_thresholds))
        .route("/api/thresholds", get(get_thresholds).patch(update_threshold))
        .route("/api/analysis/deviation-buckets", post(analyze_deviation_buckets))
        .route("/api/analysis/impact", post(analyze_threshold_impact))
        .route("/api/export/:kind", get(export_data))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES)),
        )
        .with_state(service)
}
