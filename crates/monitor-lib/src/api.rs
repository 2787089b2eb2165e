//! HTTP API for health checks, Prometheus metrics, monitor status and
//! metric discovery on the configured backends

use crate::aggregator::ServiceAggregator;
use crate::debounce::DebounceEngine;
use crate::dispatch::FailingCheck;
use crate::error::{CheckError, StoreError};
use crate::health::{ComponentStatus, HealthRegistry};
use crate::models::{
    CheckId, EffectiveStatus, InstanceId, OverallStatus, ServiceId, StatusCheck,
    StatusCheckResult,
};
use crate::report::{build_report, CheckReport};
use crate::sources::MetricSource;
use crate::store::Store;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_RESULT_LIMIT: usize = 20;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub store: Arc<dyn Store>,
    pub debounce: Arc<DebounceEngine>,
    pub aggregator: Arc<ServiceAggregator>,
    /// Backends searchable through `/api/metrics`, keyed by check kind
    pub metric_sources: BTreeMap<String, Arc<dyn MetricSource>>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        store: Arc<dyn Store>,
        debounce: Arc<DebounceEngine>,
        aggregator: Arc<ServiceAggregator>,
    ) -> Self {
        Self {
            health_registry,
            store,
            debounce,
            aggregator,
            metric_sources: BTreeMap::new(),
        }
    }

    pub fn with_metric_source(
        mut self,
        name: impl Into<String>,
        source: Arc<dyn MetricSource>,
    ) -> Self {
        self.metric_sources.insert(name.into(), source);
        self
    }
}

/// Error body returned by the status endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug)]
pub enum ApiError {
    Store(StoreError),
    Source(CheckError),
    BadRequest(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Store(err @ StoreError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, err.to_string())
            }
            ApiError::Store(err) => {
                warn!(error = %err, "Store error while serving request");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ApiError::Source(err @ CheckError::Configuration(_)) => {
                (StatusCode::BAD_REQUEST, err.to_string())
            }
            ApiError::Source(err) => {
                warn!(error = %err, "Metric backend error while serving request");
                (StatusCode::BAD_GATEWAY, err.to_string())
            }
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSummary {
    pub id: ServiceId,
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    pub status: OverallStatus,
    pub alerts_enabled: bool,
    pub failing_checks: Vec<FailingCheck>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub id: InstanceId,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    pub status: OverallStatus,
    pub failing_checks: Vec<FailingCheck>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSummary {
    #[serde(flatten)]
    pub check: StatusCheck,
    pub effective_status: EffectiveStatus,
    #[serde(default)]
    pub last_result: Option<StatusCheckResult>,
}

#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct MetricSearchQuery {
    pub source: String,
    pub pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSearch {
    pub source: String,
    pub pattern: String,
    pub metrics: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
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
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn service_summary(state: &AppState, id: ServiceId) -> Result<ServiceSummary, ApiError> {
    let service = state.store.get_service(id).await?;
    let (status, failing_checks) = state.aggregator.evaluate(id).await?;
    Ok(ServiceSummary {
        id,
        name: service.name,
        url: service.url,
        status,
        alerts_enabled: service.alerts_enabled,
        failing_checks,
    })
}

async fn list_services(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ServiceSummary>>, ApiError> {
    let mut summaries = Vec::new();
    for service in state.store.list_services().await? {
        summaries.push(service_summary(&state, service.id).await?);
    }
    Ok(Json(summaries))
}

async fn get_service(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ServiceId>,
) -> Result<Json<ServiceSummary>, ApiError> {
    Ok(Json(service_summary(&state, id).await?))
}

async fn list_instances(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<InstanceSummary>>, ApiError> {
    let mut summaries = Vec::new();
    for instance in state.store.list_instances().await? {
        let (status, failing_checks) = state.aggregator.evaluate_instance(instance.id).await?;
        summaries.push(InstanceSummary {
            id: instance.id,
            name: instance.name,
            address: instance.address,
            status,
            failing_checks,
        });
    }
    Ok(Json(summaries))
}

async fn list_checks(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CheckSummary>>, ApiError> {
    let mut summaries = Vec::new();
    for check in state.store.list_checks().await? {
        let last_result = state.store.recent_results(check.id, 1).await?.pop();
        summaries.push(CheckSummary {
            effective_status: state.debounce.effective(check.id),
            check,
            last_result,
        });
    }
    Ok(Json(summaries))
}

async fn check_results(
    State(state): State<Arc<AppState>>,
    Path(id): Path<CheckId>,
    Query(query): Query<ResultsQuery>,
) -> Result<Json<Vec<StatusCheckResult>>, ApiError> {
    state.store.get_check(id).await?;
    let limit = query.limit.unwrap_or(DEFAULT_RESULT_LIMIT);
    Ok(Json(state.store.recent_results(id, limit).await?))
}

async fn check_report(
    State(state): State<Arc<AppState>>,
    Path(id): Path<CheckId>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<CheckReport>, ApiError> {
    if query.from > query.to {
        return Err(ApiError::BadRequest(format!(
            "from ({}) is after to ({})",
            query.from, query.to
        )));
    }

    let mut reports =
        build_report(state.store.as_ref(), &[id], query.from, query.to, Utc::now()).await?;
    reports
        .pop()
        .map(Json)
        .ok_or_else(|| ApiError::BadRequest("empty report".to_string()))
}

/// Metric paths on a backend, for building metric checks
async fn find_metrics(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MetricSearchQuery>,
) -> Result<Json<MetricSearch>, ApiError> {
    let source = state.metric_sources.get(&query.source).ok_or_else(|| {
        ApiError::BadRequest(format!("no {} backend configured", query.source))
    })?;
    if query.pattern.trim().is_empty() {
        return Err(ApiError::BadRequest("pattern must not be empty".to_string()));
    }

    let metrics = source
        .find_metrics(&query.pattern)
        .await
        .map_err(ApiError::Source)?;
    Ok(Json(MetricSearch {
        source: query.source,
        pattern: query.pattern,
        metrics,
    }))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/services", get(list_services))
        .route("/api/services/:id", get(get_service))
        .route("/api/instances", get(list_instances))
        .route("/api/checks", get(list_checks))
        .route("/api/checks/:id/results", get(check_results))
        .route("/api/checks/:id/report", get(check_report))
        .route("/api/metrics", get(find_metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
