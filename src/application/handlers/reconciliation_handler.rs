use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::application::registry::RequestRecord;
use crate::application::services::reconciliation_service::{ExportKind, ReconciliationService};
use crate::domain::entities::deviation_bucket::DeviationBucket;
use crate::domain::entities::fetch_task::ReconciliationRequestPayload;
use crate::domain::entities::threshold::{
    IngestSummary, ThresholdImpact, ThresholdListing, ThresholdMode, ThresholdUpdateAck,
    UpdateTarget,
};
use crate::domain::errors::ReconError;

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(e: ReconError) -> ApiError {
    let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorResponse { error: e.to_string() }))
}

/// `?mode=group|currency`, defaulting to group
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ModeQuery {
    pub mode: Option<String>,
}

impl ModeQuery {
    fn parse(&self) -> Result<ThresholdMode, ApiError> {
        parse_mode(self.mode.as_deref())
    }
}

fn parse_mode(mode: Option<&str>) -> Result<ThresholdMode, ApiError> {
    match mode {
        Some(raw) => raw.parse().map_err(api_error),
        None => Ok(ThresholdMode::default()),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub request_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    #[serde(flatten)]
    pub summary: IngestSummary,
}

/// Selects threshold rows: `group` in group mode, `legalEntity` + `currency`
/// in currency mode.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSelector {
    pub group: Option<String>,
    pub legal_entity: Option<String>,
    pub currency: Option<String>,
}

impl TargetSelector {
    fn into_target(self, mode: ThresholdMode) -> Result<UpdateTarget, ApiError> {
        let missing = |field: &str| {
            api_error(ReconError::Validation(format!(
                "'{}' is required in {} mode",
                field, mode
            )))
        };
        match mode {
            ThresholdMode::Group => Ok(UpdateTarget::Group(self.group.ok_or_else(|| missing("group"))?)),
            ThresholdMode::Currency => Ok(UpdateTarget::Currency {
                legal_entity: self.legal_entity.ok_or_else(|| missing("legalEntity"))?,
                currency: self.currency.ok_or_else(|| missing("currency"))?,
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateThresholdBody {
    #[serde(flatten)]
    pub target: TargetSelector,
    pub adjusted_threshold: f64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BucketRequest {
    pub threshold_mode: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactRequest {
    pub threshold_mode: Option<String>,
    #[serde(flatten)]
    pub target: TargetSelector,
    pub proposed_threshold: f64,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
    })
}

/// Start a reconciliation in the background
pub async fn download_data(
    State(service): State<Arc<ReconciliationService>>,
    Json(payload): Json<ReconciliationRequestPayload>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let request_id = service.submit_reconciliation(payload).await.map_err(api_error)?;
    Ok(Json(SubmitResponse {
        request_id,
        status: "processing_started".to_string(),
        message: "Data download started in background".to_string(),
    }))
}

pub async fn get_processing_status(
    State(service): State<Arc<ReconciliationService>>,
    Path(request_id): Path<String>,
) -> Result<Json<RequestRecord>, ApiError> {
    service.get_status(&request_id).await.map(Json).map_err(api_error)
}

/// Threshold file upload; the request body is the raw CSV
pub async fn upload_thresholds(
    State(service): State<Arc<ReconciliationService>>,
    Query(query): Query<ModeQuery>,
    body: Bytes,
) -> Result<Json<UploadResponse>, ApiError> {
    let mode = query.parse()?;
    if body.is_empty() {
        return Err(api_error(ReconError::Validation("No file provided".to_string())));
    }
    let summary = service.ingest_thresholds(&body, mode).await.map_err(api_error)?;
    Ok(Json(UploadResponse {
        message: "Threshold file processed successfully".to_string(),
        summary,
    }))
}

pub async fn get_thresholds(
    State(service): State<Arc<ReconciliationService>>,
    Query(query): Query<ModeQuery>,
) -> Result<Json<ThresholdListing>, ApiError> {
    let mode = query.parse()?;
    Ok(Json(service.read_thresholds(mode).await))
}

pub async fn update_threshold(
    State(service): State<Arc<ReconciliationService>>,
    Query(query): Query<ModeQuery>,
    Json(body): Json<UpdateThresholdBody>,
) -> Result<Json<ThresholdUpdateAck>, ApiError> {
    let mode = query.parse()?;
    let target = body.target.into_target(mode)?;
    service
        .update_threshold(mode, target, body.adjusted_threshold)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn analyze_deviation_buckets(
    State(service): State<Arc<ReconciliationService>>,
    body: Option<Json<BucketRequest>>,
) -> Result<Json<Vec<DeviationBucket>>, ApiError> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let mode = parse_mode(request.threshold_mode.as_deref())?;
    service
        .compute_deviation_buckets(mode)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn analyze_threshold_impact(
    State(service): State<Arc<ReconciliationService>>,
    Json(body): Json<ImpactRequest>,
) -> Result<Json<ThresholdImpact>, ApiError> {
    let mode = parse_mode(body.threshold_mode.as_deref())?;
    let target = body.target.into_target(mode)?;
    service
        .threshold_impact(mode, target, body.proposed_threshold)
        .await
        .map(Json)
        .map_err(api_error)
}

/// CSV download of stored trades or group thresholds
pub async fn export_data(
    State(service): State<Arc<ReconciliationService>>,
    Path(kind): Path<String>,
) -> Result<Response, ApiError> {
    let kind: ExportKind = kind.parse().map_err(api_error)?;
    let file = service.export(kind).await.map_err(api_error)?;
    let disposition = format!("attachment; filename=\"{}\"", file.file_name);
    Ok((
        [
            (header::CONTENT_TYPE, file.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        file.bytes,
    )
        .into_response())
}
