//! Axum routes for the custody kernel service.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio_util::io::ReaderStream;

use crate::analysis::AnalysisError;
use crate::custody::{ChainStatus, CustodyError};
use crate::engine::DecisionError;
use crate::evidence::{BatchCollectItem, EvidenceError};
use crate::policy::PolicyError;
use crate::types::{
    AccessDecision, AccessRequest, Analysis, AnalysisRequest, CollectRequest, CustodyRecord,
    Evidence, EvidenceQuery, EvidenceType, Policy, PolicyInput, PolicyPatch, PolicyVersion,
};
use crate::ENGINE_SCHEMA_VERSION;

use super::state::ServiceState;

/// Actor attributed to requests that carry no `X-Actor` header.
const DEFAULT_ACTOR: &str = "system";

fn actor_from(headers: &HeaderMap) -> String {
    headers
        .get("x-actor")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| DEFAULT_ACTOR.to_string())
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Structured error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
    /// Machine-readable error code.
    pub code: String,
    /// Additional error details (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    /// Create a new error response with code and message.
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            details: None,
        }
    }
}

/// An error plus the status it maps to.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse::new(code, message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::warn!(
            target: "custody_kernel::service",
            status = self.status.as_u16(),
            code = %self.body.code,
            error = %self.body.error,
            "request error"
        );
        (self.status, Json(self.body)).into_response()
    }
}

impl From<PolicyError> for ApiError {
    fn from(e: PolicyError) -> Self {
        let message = e.to_string();
        match e {
            PolicyError::NotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "POLICY_NOT_FOUND", message)
            }
            PolicyError::VersionNotFound { .. } => {
                Self::new(StatusCode::NOT_FOUND, "POLICY_VERSION_NOT_FOUND", message)
            }
            PolicyError::RestoreConflict { .. } => {
                Self::new(StatusCode::CONFLICT, "RESTORE_CONFLICT", message)
            }
            PolicyError::InvalidEffect(_) => {
                Self::new(StatusCode::BAD_REQUEST, "INVALID_EFFECT", message)
            }
            PolicyError::InvalidPagination { .. } => {
                Self::new(StatusCode::BAD_REQUEST, "INVALID_PAGINATION", message)
            }
            PolicyError::Store(_) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE", message)
            }
        }
    }
}

impl From<DecisionError> for ApiError {
    fn from(e: DecisionError) -> Self {
        let message = e.to_string();
        match e {
            DecisionError::EmptyBatch => {
                Self::new(StatusCode::BAD_REQUEST, "EMPTY_BATCH", message)
            }
            DecisionError::BatchTooLarge(_) => {
                Self::new(StatusCode::BAD_REQUEST, "BATCH_TOO_LARGE", message)
            }
            DecisionError::Cancelled => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "EVALUATION_CANCELLED", message)
            }
            DecisionError::Policy(inner) => Self::from(inner),
        }
    }
}

impl From<CustodyError> for ApiError {
    fn from(e: CustodyError) -> Self {
        let message = e.to_string();
        match e {
            CustodyError::EvidenceNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "EVIDENCE_NOT_FOUND", message)
            }
            CustodyError::ChainBroken(_) => {
                Self::new(StatusCode::CONFLICT, "CHAIN_OF_CUSTODY_BROKEN", message)
            }
            CustodyError::Store(_) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE", message)
            }
        }
    }
}

impl From<EvidenceError> for ApiError {
    fn from(e: EvidenceError) -> Self {
        let message = e.to_string();
        match e {
            EvidenceError::NotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "EVIDENCE_NOT_FOUND", message)
            }
            EvidenceError::Deleted(_) => {
                Self::new(StatusCode::NOT_FOUND, "EVIDENCE_DELETED", message)
            }
            EvidenceError::InvalidEvidenceType(_) => {
                Self::new(StatusCode::BAD_REQUEST, "INVALID_EVIDENCE_TYPE", message)
            }
            EvidenceError::InvalidPagination { .. } => {
                Self::new(StatusCode::BAD_REQUEST, "INVALID_PAGINATION", message)
            }
            EvidenceError::EmptyBatch => {
                Self::new(StatusCode::BAD_REQUEST, "EMPTY_BATCH", message)
            }
            EvidenceError::BatchTooLarge(_) => {
                Self::new(StatusCode::BAD_REQUEST, "BATCH_TOO_LARGE", message)
            }
            EvidenceError::ChainOfCustodyBroken(_) => {
                Self::new(StatusCode::CONFLICT, "CHAIN_OF_CUSTODY_BROKEN", message)
            }
            EvidenceError::Blob(crate::evidence::BlobError::NotFound(_)) => {
                Self::new(StatusCode::NOT_FOUND, "BLOB_NOT_FOUND", message)
            }
            EvidenceError::Blob(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "BLOB_IO_ERROR", message)
            }
            EvidenceError::Custody(inner) => Self::from(inner),
            EvidenceError::Store(_) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE", message)
            }
        }
    }
}

impl From<AnalysisError> for ApiError {
    fn from(e: AnalysisError) -> Self {
        let message = e.to_string();
        match e {
            AnalysisError::EvidenceNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "EVIDENCE_NOT_FOUND", message)
            }
            AnalysisError::InvalidAnalysisType(_) => {
                Self::new(StatusCode::BAD_REQUEST, "INVALID_ANALYSIS_TYPE", message)
            }
            AnalysisError::NotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "ANALYSIS_NOT_FOUND", message)
            }
            AnalysisError::AnalysisInProgress(_) => {
                Self::new(StatusCode::ACCEPTED, "ANALYSIS_IN_PROGRESS", message)
            }
            AnalysisError::Store(_) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE", message)
            }
        }
    }
}

/// Body of a policy update: the patch plus an audit reason.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdatePolicyBody {
    /// Reason recorded in the history entry.
    #[serde(default)]
    pub reason: String,
    /// The patch itself.
    #[serde(flatten)]
    pub patch: PolicyPatch,
}

/// Query parameters for policy listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ListPoliciesParams {
    /// Restrict to active policies.
    #[serde(default)]
    pub active_only: bool,
    /// 1-based page number.
    #[serde(default = "default_page")]
    pub page: u32,
    /// Page size, 1 to 100.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    20
}

/// Query parameters for history listing.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryParams {
    /// 1-based page number.
    #[serde(default = "default_page")]
    pub page: u32,
    /// Page size, 1 to 100.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

/// Body of a restore request.
#[derive(Debug, Clone, Deserialize)]
pub struct RestorePolicyBody {
    /// The history version to restore.
    pub version: u32,
    /// Reason recorded in the history entry.
    #[serde(default)]
    pub reason: String,
}

/// Query parameters for deletions carrying an audit reason.
#[derive(Debug, Clone, Deserialize)]
pub struct DeleteParams {
    /// Reason recorded in the audit trail.
    #[serde(default)]
    pub reason: String,
}

/// Paged policy listing.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyListResponse {
    /// Policies on this page.
    pub policies: Vec<Policy>,
    /// Total rows across all pages.
    pub total: u64,
    /// Echo of the requested page.
    pub page: u32,
    /// Echo of the requested page size.
    pub page_size: u32,
}

/// Paged history listing.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryResponse {
    /// History entries on this page.
    pub versions: Vec<PolicyVersion>,
    /// Total rows across all pages.
    pub total: u64,
    /// Echo of the requested page.
    pub page: u32,
    /// Echo of the requested page size.
    pub page_size: u32,
}

/// Body of an evidence collection request. The artifact bytes travel
/// base64-encoded.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectEvidenceBody {
    /// Human-readable name.
    pub name: String,
    /// Wire string for the evidence type.
    pub evidence_type: String,
    /// Where the artifact came from.
    #[serde(default)]
    pub source: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Tag set for search.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Base64-encoded artifact bytes.
    pub content: String,
}

impl CollectEvidenceBody {
    fn into_parts(self) -> Result<(CollectRequest, Vec<u8>), ApiError> {
        let content = base64::engine::general_purpose::STANDARD
            .decode(&self.content)
            .map_err(|e| {
                ApiError::new(
                    StatusCode::BAD_REQUEST,
                    "INVALID_CONTENT_ENCODING",
                    format!("content is not valid base64: {}", e),
                )
            })?;
        Ok((
            CollectRequest {
                name: self.name,
                evidence_type: self.evidence_type,
                source: self.source,
                description: self.description,
                tags: self.tags,
                metadata: self.metadata,
            },
            content,
        ))
    }
}

/// Per-item error in a batch collection response.
#[derive(Debug, Clone, Serialize)]
pub struct BatchCollectErrorDto {
    /// Index of the failed item in the request batch.
    pub index: usize,
    /// What went wrong.
    pub error: String,
}

/// Batch collection response.
#[derive(Debug, Serialize)]
pub struct BatchCollectResponse {
    /// Evidence collected successfully.
    pub collected: Vec<Evidence>,
    /// Number of successes.
    pub success_count: usize,
    /// Items that failed.
    pub errors: Vec<BatchCollectErrorDto>,
}

/// Query parameters for evidence search.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchParams {
    /// Substring matched against name, description, and source.
    #[serde(default)]
    pub q: String,
    /// Comma-separated evidence types.
    #[serde(default)]
    pub types: String,
    /// Comma-separated required tags.
    #[serde(default)]
    pub tags: String,
    /// Lower bound on collection time (RFC3339).
    #[serde(default)]
    pub collected_after: Option<chrono::DateTime<chrono::Utc>>,
    /// Upper bound on collection time (RFC3339).
    #[serde(default)]
    pub collected_before: Option<chrono::DateTime<chrono::Utc>>,
    /// 1-based page number.
    #[serde(default = "default_page")]
    pub page: u32,
    /// Page size, 1 to 100.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl SearchParams {
    fn into_query(self) -> Result<EvidenceQuery, ApiError> {
        let mut types = Vec::new();
        for raw in self.types.split(',').filter(|s| !s.is_empty()) {
            let t = EvidenceType::from_str(raw).ok_or_else(|| {
                ApiError::new(
                    StatusCode::BAD_REQUEST,
                    "INVALID_EVIDENCE_TYPE",
                    format!("invalid evidence type: {}", raw),
                )
            })?;
            types.push(t);
        }
        Ok(EvidenceQuery {
            text: self.q,
            types,
            collected_after: self.collected_after,
            collected_before: self.collected_before,
            tags: self
                .tags
                .split(',')
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect(),
            page: self.page,
            page_size: self.page_size,
        })
    }
}

/// Body of a custody append.
#[derive(Debug, Clone, Deserialize)]
pub struct AddCustodyBody {
    /// Who handled the evidence; defaults to the request actor.
    #[serde(default)]
    pub handler: String,
    /// What happened.
    pub action: String,
    /// Where the evidence was.
    #[serde(default)]
    pub location: String,
    /// Free-form notes.
    #[serde(default)]
    pub notes: String,
    /// Opaque digital signature.
    #[serde(default)]
    pub signature: String,
}

/// Custody chain response.
#[derive(Debug, Serialize)]
pub struct CustodyChainResponse {
    /// The evidence id.
    pub evidence_id: String,
    /// The chain, oldest first.
    pub records: Vec<CustodyRecord>,
}

/// Chain verification response.
#[derive(Debug, Serialize)]
pub struct VerifyChainResponse {
    /// Whether the chain is non-empty and fully verified.
    pub valid: bool,
    /// `intact`, `broken`, or `empty`.
    pub status: String,
    /// Failure detail when broken.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<ChainStatus> for VerifyChainResponse {
    fn from(status: ChainStatus) -> Self {
        match status {
            ChainStatus::Intact { .. } => Self {
                valid: true,
                status: "intact".to_string(),
                detail: None,
            },
            ChainStatus::Empty => Self {
                valid: false,
                status: "empty".to_string(),
                detail: None,
            },
            ChainStatus::Broken { index, reason } => Self {
                valid: false,
                status: "broken".to_string(),
                detail: Some(format!("record {}: {}", index, reason)),
            },
        }
    }
}

/// Status payload returned while an analysis is still running.
#[derive(Debug, Serialize)]
pub struct AnalysisPendingResponse {
    /// The analysis id.
    pub analysis_id: String,
    /// Current non-terminal status.
    pub status: String,
}

/// Service health response (detailed).
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy` or `degraded`.
    pub status: String,
    /// Crate version.
    pub version: String,
    /// Engine schema version.
    pub schema_version: String,
    /// Backend connectivity.
    pub database: bool,
}

/// Simple liveness response.
#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    /// Always `alive`.
    pub status: String,
}

/// Readiness response with dependency status.
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    /// Whether the service can take traffic.
    pub ready: bool,
    /// Backend connectivity.
    pub database: bool,
}

// ============================================================================
// Policy Handlers
// ============================================================================

async fn create_policy_handler(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Json(input): Json<PolicyInput>,
) -> Result<(StatusCode, Json<Policy>), ApiError> {
    let policy = state.policies.create(input, &actor_from(&headers)).await?;
    Ok((StatusCode::CREATED, Json(policy)))
}

async fn list_policies_handler(
    State(state): State<ServiceState>,
    Query(params): Query<ListPoliciesParams>,
) -> Result<Json<PolicyListResponse>, ApiError> {
    let page = state
        .policies
        .list(params.active_only, params.page, params.page_size)
        .await?;
    Ok(Json(PolicyListResponse {
        policies: page.items,
        total: page.total,
        page: params.page,
        page_size: params.page_size,
    }))
}

async fn get_policy_handler(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<Policy>, ApiError> {
    Ok(Json(state.policies.get(&id).await?))
}

async fn update_policy_handler(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<UpdatePolicyBody>,
) -> Result<Json<Policy>, ApiError> {
    let policy = state
        .policies
        .update(&id, body.patch, &actor_from(&headers), &body.reason)
        .await?;
    Ok(Json(policy))
}

async fn delete_policy_handler(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Query(params): Query<DeleteParams>,
) -> Result<StatusCode, ApiError> {
    state
        .policies
        .delete(&id, &actor_from(&headers), &params.reason)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn policy_history_handler(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let page = state
        .policies
        .history(&id, params.page, params.page_size)
        .await?;
    Ok(Json(HistoryResponse {
        versions: page.items,
        total: page.total,
        page: params.page,
        page_size: params.page_size,
    }))
}

async fn restore_policy_handler(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<RestorePolicyBody>,
) -> Result<Json<Policy>, ApiError> {
    let policy = state
        .policies
        .restore(&id, body.version, &actor_from(&headers), &body.reason)
        .await?;
    Ok(Json(policy))
}

// ============================================================================
// Decision Handlers
// ============================================================================

/// Evaluate one access request. Always 200 for a successful evaluation,
/// whether the answer is allow or deny.
async fn check_handler(
    State(state): State<ServiceState>,
    Json(request): Json<AccessRequest>,
) -> Result<Json<AccessDecision>, ApiError> {
    let decision = state.engine.check(&request).await?;
    super::middleware::record_decision_metric(decision.allowed, decision.cache_hit);
    Ok(Json(decision))
}

async fn bulk_check_handler(
    State(state): State<ServiceState>,
    Json(requests): Json<Vec<AccessRequest>>,
) -> Result<Json<Vec<AccessDecision>>, ApiError> {
    Ok(Json(state.engine.bulk_check(&requests).await?))
}

// ============================================================================
// Evidence Handlers
// ============================================================================

async fn collect_evidence_handler(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Json(body): Json<CollectEvidenceBody>,
) -> Result<(StatusCode, Json<Evidence>), ApiError> {
    let (request, content) = body.into_parts()?;
    let evidence = state
        .evidence
        .collect(request, &content, &actor_from(&headers))
        .await?;
    Ok((StatusCode::CREATED, Json(evidence)))
}

async fn batch_collect_handler(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Json(bodies): Json<Vec<CollectEvidenceBody>>,
) -> Result<(StatusCode, Json<BatchCollectResponse>), ApiError> {
    let mut items = Vec::with_capacity(bodies.len());
    for body in bodies {
        let (request, content) = body.into_parts()?;
        items.push(BatchCollectItem { request, content });
    }

    let outcome = state
        .evidence
        .batch_collect(items, &actor_from(&headers))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(BatchCollectResponse {
            success_count: outcome.collected.len(),
            collected: outcome.collected,
            errors: outcome
                .errors
                .into_iter()
                .map(|e| BatchCollectErrorDto {
                    index: e.index,
                    error: e.error.to_string(),
                })
                .collect(),
        }),
    ))
}

async fn search_evidence_handler(
    State(state): State<ServiceState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<crate::types::EvidencePage>, ApiError> {
    let query = params.into_query()?;
    Ok(Json(state.evidence.search(&query).await?))
}

async fn get_evidence_handler(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<Evidence>, ApiError> {
    Ok(Json(state.evidence.get(&id).await?))
}

async fn delete_evidence_handler(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Query(params): Query<DeleteParams>,
) -> Result<StatusCode, ApiError> {
    state
        .evidence
        .delete(&id, &actor_from(&headers), &params.reason)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Stream the evidence file. Chain verification runs first; a broken chain
/// answers 409 and no bytes leave the server.
async fn download_evidence_handler(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let (evidence, file) = state.evidence.retrieve_file(&id).await?;

    let stream = ReaderStream::new(file);
    let mut response = Body::from_stream(stream).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/octet-stream"),
    );
    if let Ok(disposition) = header::HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        evidence.name.replace('"', "_")
    )) {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, disposition);
    }
    Ok(response)
}

// ============================================================================
// Custody Handlers
// ============================================================================

async fn get_custody_handler(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<CustodyChainResponse>, ApiError> {
    let records = state.custody.chain(&id).await?;
    Ok(Json(CustodyChainResponse {
        evidence_id: id,
        records,
    }))
}

async fn add_custody_handler(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<AddCustodyBody>,
) -> Result<(StatusCode, Json<CustodyRecord>), ApiError> {
    let handler = if body.handler.is_empty() {
        actor_from(&headers)
    } else {
        body.handler
    };
    let record = state
        .custody
        .add(
            &id,
            &handler,
            &body.action,
            &body.location,
            &body.notes,
            &body.signature,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn verify_custody_handler(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<VerifyChainResponse>, ApiError> {
    let status = state.evidence.verify_custody(&id).await?;
    super::middleware::record_chain_verification(status.is_intact());
    Ok(Json(VerifyChainResponse::from(status)))
}

// ============================================================================
// Analysis Handlers
// ============================================================================

async fn start_analysis_handler(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Json(request): Json<AnalysisRequest>,
) -> Result<(StatusCode, Json<Analysis>), ApiError> {
    let analysis = state
        .analysis
        .start(request, &actor_from(&headers))
        .await?;
    Ok((StatusCode::ACCEPTED, Json(analysis)))
}

async fn get_analysis_handler(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<Analysis>, ApiError> {
    Ok(Json(state.analysis.get(&id).await?))
}

/// Results are only available from terminal states; a non-terminal analysis
/// answers 202 with its current status.
async fn analysis_results_handler(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match state.analysis.get_results(&id).await {
        Ok(analysis) => Ok(Json(analysis).into_response()),
        Err(AnalysisError::AnalysisInProgress(_)) => {
            let analysis = state.analysis.get(&id).await?;
            Ok((
                StatusCode::ACCEPTED,
                Json(AnalysisPendingResponse {
                    analysis_id: id,
                    status: analysis.status.to_string(),
                }),
            )
                .into_response())
        }
        Err(e) => Err(e.into()),
    }
}

// ============================================================================
// Health Handlers
// ============================================================================

async fn health_handler(State(state): State<ServiceState>) -> Json<HealthResponse> {
    let db_healthy = state.health.is_healthy().await;
    Json(HealthResponse {
        status: if db_healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        schema_version: ENGINE_SCHEMA_VERSION.to_string(),
        database: db_healthy,
    })
}

async fn liveness_handler() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "alive".to_string(),
    })
}

async fn readiness_handler(
    State(state): State<ServiceState>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    let db_healthy = state.health.is_healthy().await;
    if db_healthy {
        Ok(Json(ReadinessResponse {
            ready: true,
            database: true,
        }))
    } else {
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                ready: false,
                database: false,
            }),
        ))
    }
}

// ============================================================================
// Router Construction
// ============================================================================

/// Create the Axum router for the custody kernel service.
pub fn create_router(state: ServiceState) -> Router {
    Router::new()
        // Policy control plane
        .route(
            "/api/v1/control/policies",
            post(create_policy_handler).get(list_policies_handler),
        )
        .route(
            "/api/v1/control/policies/:id",
            get(get_policy_handler)
                .put(update_policy_handler)
                .delete(delete_policy_handler),
        )
        .route(
            "/api/v1/control/policies/:id/history",
            get(policy_history_handler),
        )
        .route(
            "/api/v1/control/policies/:id/restore",
            post(restore_policy_handler),
        )
        // Decision point
        .route("/api/v1/control/check", post(check_handler))
        .route("/api/v1/control/check/bulk", post(bulk_check_handler))
        // Evidence catalogue
        .route(
            "/api/v1/forensic/evidence",
            post(collect_evidence_handler).get(search_evidence_handler),
        )
        .route("/api/v1/forensic/evidence/batch", post(batch_collect_handler))
        .route(
            "/api/v1/forensic/evidence/:id",
            get(get_evidence_handler).delete(delete_evidence_handler),
        )
        .route(
            "/api/v1/forensic/evidence/:id/download",
            get(download_evidence_handler),
        )
        // Custody chain
        .route(
            "/api/v1/forensic/evidence/:id/custody",
            get(get_custody_handler).post(add_custody_handler),
        )
        .route(
            "/api/v1/forensic/evidence/:id/custody/verify",
            post(verify_custody_handler),
        )
        // Analysis orchestration
        .route("/api/v1/forensic/analysis", post(start_analysis_handler))
        .route("/api/v1/forensic/analysis/:id", get(get_analysis_handler))
        .route(
            "/api/v1/forensic/analysis/:id/results",
            get(analysis_results_handler),
        )
        // Health checks
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .with_state(state)
}
