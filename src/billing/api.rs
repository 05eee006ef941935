//! Billing Gate HTTP API
//!
//! Endpoints:
//! - GET /v1/health - Liveness
//! - GET /v1/plans - Plans offered on the pricing page
//! - POST /v1/access - Evaluate a tenant document's entitlement
//! - POST /v1/checkout - Start a hosted checkout and return its redirect URL
//!
//! A client that disconnects while `/v1/checkout` is pending drops the
//! handler future, which drops the intent's document watch.

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::access::{AccessEvaluator, EntitlementDecision};
use super::checkout::{CheckoutRequest, CheckoutSessionCoordinator};
use super::classify::{CheckoutError, CheckoutErrorKind};
use super::clock::Clock;
use super::plans::{Plan, PlanCatalog};
use super::store::DocumentStore;
use super::tenant::TenantSnapshot;
use crate::config::GateConfig;

/// Shared application state
pub struct AppState {
    pub evaluator: AccessEvaluator,
    pub checkout: CheckoutSessionCoordinator,
    pub plans: PlanCatalog,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(config: &GateConfig, store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            evaluator: config.access_evaluator(),
            checkout: CheckoutSessionCoordinator::new(store, clock.clone(), config.checkout.clone()),
            plans: config.plans.clone(),
            clock,
        }
    }
}

/// Create API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health_check))
        .route("/v1/plans", get(list_plans))
        .route("/v1/access", post(evaluate_access))
        .route("/v1/checkout", post(start_checkout))
        .with_state(state)
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: error.into(), code: None, retryable: None }))
}

/// HTTP status for each checkout error kind
pub fn status_for(kind: CheckoutErrorKind) -> StatusCode {
    match kind {
        CheckoutErrorKind::Misconfigured => StatusCode::INTERNAL_SERVER_ERROR,
        CheckoutErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        CheckoutErrorKind::PriceNotFound => StatusCode::UNPROCESSABLE_ENTITY,
        CheckoutErrorKind::ProviderError => StatusCode::BAD_GATEWAY,
        CheckoutErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        CheckoutErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<CheckoutError> for ErrorResponse {
    fn from(err: CheckoutError) -> Self {
        Self {
            code: Some(err.kind.code()),
            retryable: Some(err.is_retryable()),
            error: err.message,
        }
    }
}

// === Handlers ===

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "tenant-gate".to_string(),
        version: crate::VERSION.to_string(),
    })
}

async fn list_plans(State(state): State<Arc<AppState>>) -> Json<Vec<Plan>> {
    Json(state.plans.plans().to_vec())
}

async fn evaluate_access(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AccessRequest>,
) -> Result<Json<EntitlementDecision>, ApiError> {
    let snapshot = TenantSnapshot::from_document(&request.tenant)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    Ok(Json(state.evaluator.evaluate(
        &snapshot,
        request.user_email.as_deref(),
        state.clock.now(),
    )))
}

async fn start_checkout(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CheckoutBody>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let price_id = match (&body.plan_id, &body.price_id) {
        (Some(plan_id), _) => state
            .plans
            .find(plan_id)
            .map(|plan| plan.price_id.clone())
            .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Unknown plan '{}'", plan_id)))?,
        (None, Some(price_id)) => price_id.clone(),
        (None, None) => return Err(api_error(StatusCode::BAD_REQUEST, "plan_id or price_id is required")),
    };

    let request = CheckoutRequest {
        user_id: body.user_id,
        price_id,
        success_url: body.success_url,
        cancel_url: body.cancel_url,
    };

    let url = state.checkout.start_request(request).await.map_err(|err| {
        let status = status_for(err.kind);
        (status, Json(ErrorResponse::from(err)))
    })?;
    Ok(Json(CheckoutResponse { url }))
}

// === Request/Response types ===

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    service: String,
    version: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retryable: Option<bool>,
}

#[derive(Deserialize)]
struct AccessRequest {
    tenant: Value,
    #[serde(default)]
    user_email: Option<String>,
}

#[derive(Deserialize)]
struct CheckoutBody {
    user_id: String,
    #[serde(default)]
    plan_id: Option<String>,
    #[serde(default)]
    price_id: Option<String>,
    #[serde(default)]
    success_url: Option<String>,
    #[serde(default)]
    cancel_url: Option<String>,
}

#[derive(Serialize)]
struct CheckoutResponse {
    url: String,
}
