//! REST API handlers for campaign monitoring, budget rebalancing, bid
//! optimization and operational endpoints.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use campaign_budget::{
    AllocationAnalysis, ApprovalOutcome, BidOptimization, BidOptions, PendingChange,
    RebalanceExecution, RebalanceOptions,
};
use campaign_core::rules::{BudgetRules, MonitorConfig};
use campaign_core::types::{Alert, BudgetHistoryEntry};
use campaign_core::CampaignError;
use campaign_monitor::{AutopilotService, MonitorStarted, PerformanceSnapshot, StopOutcome};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};
use uuid::Uuid;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AutopilotService>,
    pub node_id: String,
    pub start_time: Instant,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);
pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    /// Earliest time a rebalance is allowed again, on `cooldown_active`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_eligible: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub active_monitors: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopResponse {
    pub campaign_id: String,
    pub outcome: StopOutcome,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub approved: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MonitorsResponse {
    pub campaign_ids: Vec<String>,
}

/// Map a service error to its HTTP status and error code.
pub fn status_for(err: &CampaignError) -> (StatusCode, &'static str) {
    match err {
        CampaignError::Config(_) => (StatusCode::BAD_REQUEST, "invalid_configuration"),
        CampaignError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        CampaignError::Cooldown { .. } => (StatusCode::CONFLICT, "cooldown_active"),
        CampaignError::InsufficientData { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "insufficient_data")
        }
        CampaignError::External(_) => (StatusCode::BAD_GATEWAY, "upstream_failure"),
        CampaignError::Timeout(..) => (StatusCode::GATEWAY_TIMEOUT, "upstream_timeout"),
        CampaignError::Serialization(_) | CampaignError::Io(_) | CampaignError::Internal(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
    }
}

fn reject(err: CampaignError) -> ApiError {
    let (status, code) = status_for(&err);
    metrics::counter!("api.errors", "code" => code).increment(1);

    let next_eligible = match &err {
        CampaignError::Cooldown { next_eligible, .. } => Some(*next_eligible),
        _ => None,
    };

    let message = if status.is_server_error() {
        error!(error = %err, "Request failed");
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            "Internal processing error".to_string()
        } else {
            err.to_string()
        }
    } else {
        warn!(error = %err, "Request rejected");
        err.to_string()
    };

    (
        status,
        Json(ErrorResponse {
            error: code.to_string(),
            message,
            next_eligible,
        }),
    )
}

fn bad_body(status: StatusCode, code: &'static str, message: String) -> ApiError {
    metrics::counter!("api.errors", "code" => code).increment(1);
    warn!(%message, "Request body rejected");
    (
        status,
        Json(ErrorResponse {
            error: code.to_string(),
            message,
            next_eligible: None,
        }),
    )
}

/// Decode an optional JSON body. An empty body means "use the defaults";
/// anything else must be `application/json` and parse in full.
fn optional_json<T: DeserializeOwned>(
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Option<T>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or_default().trim().to_ascii_lowercase());
    let is_json = content_type.as_deref().is_some_and(|essence| {
        essence == "application/json"
            || (essence.starts_with("application/") && essence.ends_with("+json"))
    });
    if !is_json {
        return Err(bad_body(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "unsupported_media_type",
            "Expected request with `Content-Type: application/json`".to_string(),
        ));
    }

    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| bad_body(StatusCode::BAD_REQUEST, "invalid_body", e.to_string()))
}

// ─── Monitoring ─────────────────────────────────────────────────────────

/// POST /v1/campaigns/:campaign_id/monitoring. The body is an optional
/// monitor config; service defaults apply when it is empty.
pub async fn start_monitoring(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<MonitorStarted> {
    let config: Option<MonitorConfig> = optional_json(&headers, &body)?;
    state
        .service
        .start_monitoring(&campaign_id, config)
        .await
        .map(Json)
        .map_err(reject)
}

/// DELETE /v1/campaigns/:campaign_id/monitoring
pub async fn stop_monitoring(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
) -> (StatusCode, Json<StopResponse>) {
    let outcome = state.service.stop_monitoring(&campaign_id).await;
    let status = match outcome {
        StopOutcome::Stopped => StatusCode::OK,
        StopOutcome::NotFound => StatusCode::NOT_FOUND,
    };
    (
        status,
        Json(StopResponse {
            campaign_id,
            outcome,
        }),
    )
}

/// GET /v1/campaigns/:campaign_id/snapshot
pub async fn get_snapshot(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
) -> ApiResult<PerformanceSnapshot> {
    state
        .service
        .get_performance_snapshot(&campaign_id)
        .map(Json)
        .map_err(reject)
}

/// GET /v1/campaigns/:campaign_id/alerts
pub async fn get_alerts(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
) -> ApiResult<Vec<Alert>> {
    state
        .service
        .get_alerts(&campaign_id)
        .map(Json)
        .map_err(reject)
}

/// GET /v1/monitors
pub async fn list_monitors(State(state): State<AppState>) -> Json<MonitorsResponse> {
    Json(MonitorsResponse {
        campaign_ids: state.service.active_monitors(),
    })
}

// ─── Budget ─────────────────────────────────────────────────────────────

/// GET /v1/campaigns/:campaign_id/allocation
pub async fn analyze_allocation(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
) -> ApiResult<AllocationAnalysis> {
    state
        .service
        .analyze_budget_allocation(&campaign_id)
        .await
        .map(Json)
        .map_err(reject)
}

/// POST /v1/campaigns/:campaign_id/rebalance
pub async fn execute_rebalance(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<RebalanceExecution> {
    let options: RebalanceOptions = optional_json(&headers, &body)?.unwrap_or_default();
    state
        .service
        .execute_rebalance(&campaign_id, options)
        .await
        .map(Json)
        .map_err(reject)
}

/// POST /v1/campaigns/:campaign_id/rebalance/simulate
pub async fn simulate_rebalance(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
) -> ApiResult<RebalanceExecution> {
    state
        .service
        .simulate_rebalance(&campaign_id)
        .await
        .map(Json)
        .map_err(reject)
}

/// POST /v1/campaigns/:campaign_id/bids/optimize
pub async fn optimize_bids(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<BidOptimization> {
    let options: BidOptions = optional_json(&headers, &body)?.unwrap_or_default();
    state
        .service
        .optimize_bids(&campaign_id, options)
        .await
        .map(Json)
        .map_err(reject)
}

/// GET /v1/campaigns/:campaign_id/pending-changes
pub async fn pending_changes(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
) -> Json<Vec<PendingChange>> {
    Json(state.service.pending_changes(&campaign_id))
}

/// POST /v1/approvals/:change_id
pub async fn approve_change(
    State(state): State<AppState>,
    Path(change_id): Path<Uuid>,
    Json(request): Json<ApprovalRequest>,
) -> ApiResult<ApprovalOutcome> {
    state
        .service
        .approve_pending_change(change_id, request.approved)
        .await
        .map(Json)
        .map_err(reject)
}

/// GET /v1/campaigns/:campaign_id/budget-history
pub async fn budget_history(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
) -> ApiResult<Vec<BudgetHistoryEntry>> {
    state
        .service
        .get_budget_history(&campaign_id)
        .await
        .map(Json)
        .map_err(reject)
}

/// PUT /v1/campaigns/:campaign_id/budget-rules
pub async fn set_budget_rules(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
    Json(rules): Json<BudgetRules>,
) -> ApiResult<BudgetRules> {
    state
        .service
        .set_budget_rules(&campaign_id, rules)
        .map_err(reject)?;
    Ok(Json(state.service.budget_rules(&campaign_id)))
}

/// GET /v1/campaigns/:campaign_id/budget-rules
pub async fn get_budget_rules(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
) -> Json<BudgetRules> {
    Json(state.service.budget_rules(&campaign_id))
}

// ─── Operational ────────────────────────────────────────────────────────

/// GET /health — Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        active_monitors: state.service.active_monitors().len(),
    })
}

/// GET /ready — Readiness probe for Kubernetes.
pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

/// GET /live — Liveness probe for Kubernetes.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
