//! Dashboard HTTP API, health checks and Prometheus metrics

use crate::actions::{apply, ActionPayload};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use optimizer_lib::{
    analytics::AnomalyAlert,
    health::{ComponentStatus, HealthRegistry},
    idempotency::{GuardedOutcome, IdempotencyEngine},
    inventory::InventoryPipeline,
    risk::{rank_opportunities, Opportunity, RiskScorer},
    suggest::{total_savings, SuggestionFilter},
    CanonicalResource, EngineError, OptimizerMetrics, SuggestedAction, Suggestion, ValidationError,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Agent name used when an action request does not name one
pub const DEFAULT_AGENT: &str = "dashboard";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: OptimizerMetrics,
    pub pipeline: Arc<InventoryPipeline>,
    pub engine: IdempotencyEngine,
    pub scorer: RiskScorer,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: OptimizerMetrics,
        pipeline: Arc<InventoryPipeline>,
        engine: IdempotencyEngine,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            pipeline,
            engine,
            scorer: RiskScorer::default(),
        }
    }
}

/// Error body: `{error, code}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "error": self.message, "code": self.code })),
        )
            .into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: e.code(),
            message: e.to_string(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::IntegrityViolation { .. } | EngineError::InProgress { .. } => {
                StatusCode::CONFLICT
            }
            EngineError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Execution { .. } => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            code: e.code(),
            message: e.to_string(),
        }
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[derive(Debug, Serialize)]
struct ResourcesResponse {
    resources: Vec<CanonicalResource>,
    total_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_updated: Option<DateTime<Utc>>,
}

async fn resources(State(state): State<Arc<AppState>>) -> Json<ResourcesResponse> {
    let snapshot = state.pipeline.snapshot();
    Json(ResourcesResponse {
        resources: snapshot.resources.clone(),
        total_count: snapshot.len(),
        last_updated: snapshot.fetched_at,
    })
}

async fn resource_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let derived = state.pipeline.derived_metrics();
    Json(derived.as_ref().clone())
}

#[derive(Debug, Default, Deserialize)]
struct SuggestionQuery {
    #[serde(rename = "type")]
    action: Option<String>,
    min_savings: Option<f64>,
}

#[derive(Debug, Serialize)]
struct SuggestionsResponse {
    suggestions: Vec<Suggestion>,
    total_suggestions: usize,
    total_potential_savings: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
}

async fn optimization_suggestions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SuggestionQuery>,
) -> Result<Json<SuggestionsResponse>, ApiError> {
    let filter = SuggestionFilter {
        action: query
            .action
            .as_deref()
            .filter(|a| !a.is_empty())
            .map(str::parse::<SuggestedAction>)
            .transpose()?,
        min_savings: query.min_savings,
    };

    let set = state.pipeline.suggestions();
    let suggestions = filter.apply(&set.suggestions);
    Ok(Json(SuggestionsResponse {
        total_suggestions: suggestions.len(),
        total_potential_savings: total_savings(&suggestions),
        timestamp: set.timestamp,
        suggestions,
    }))
}

#[derive(Debug, Serialize)]
struct OpportunitiesResponse {
    opportunities: Vec<Opportunity>,
    total: usize,
}

async fn opportunities(State(state): State<Arc<AppState>>) -> Json<OpportunitiesResponse> {
    let set = state.pipeline.suggestions();
    let opportunities = rank_opportunities(&set.suggestions, &state.scorer);
    Json(OpportunitiesResponse {
        total: opportunities.len(),
        opportunities,
    })
}

async fn anomalies(State(state): State<Arc<AppState>>) -> Json<Vec<AnomalyAlert>> {
    Json(state.pipeline.anomalies().await)
}

/// Body of `POST /actions`
#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    #[serde(default)]
    pub agent: Option<String>,
    pub action: String,
    pub resource_id: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    pub risk: f64,
}

#[derive(Debug, Serialize)]
struct ActionResponse {
    status: &'static str,
    request_id: String,
    resource_id: String,
}

async fn execute_action(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ActionRequest>,
) -> Result<(StatusCode, Json<ActionResponse>), ApiError> {
    let agent = request.agent.unwrap_or_else(|| DEFAULT_AGENT.to_string());
    let payload = ActionPayload {
        action: request.action,
        resource_id: request.resource_id,
        params: request.params,
    };
    let action = payload.validate()?;

    let adapter = state.pipeline.adapter().clone();
    let resource_id = payload.resource_id.clone();
    let outcome = state
        .engine
        .execute_guarded(&agent, &payload.action, &payload.to_value(), request.risk, move || {
            apply(adapter, resource_id, action)
        })
        .await?;

    let (status_code, status) = match &outcome {
        GuardedOutcome::Completed { .. } => (StatusCode::OK, "completed"),
        GuardedOutcome::Skipped { .. } => (StatusCode::OK, "skipped"),
        GuardedOutcome::AwaitingApproval { .. } => (StatusCode::ACCEPTED, "awaiting_approval"),
    };

    Ok((
        status_code,
        Json(ActionResponse {
            status,
            request_id: outcome.request_id().to_string(),
            resource_id: outcome.resource_id().to_string(),
        }),
    ))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/resources", get(resources))
        .route("/resource-metrics", get(resource_metrics))
        .route("/optimization-suggestions", get(optimization_suggestions))
        .route("/opportunities", get(opportunities))
        .route("/anomalies", get(anomalies))
        .route("/actions", post(execute_action))
        .with_state(state)
}

/// Start the API server, stopping when `shutdown` resolves
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
