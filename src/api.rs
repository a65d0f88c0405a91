// src/api.rs
//! HTTP registration surface: thin adapters over the catalog, the
//! subscription index and the dispatch loop.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::change_detector::LastKnownUpdate;
use crate::dispatch::{DispatchLoop, LoopStatus, PollError, ServiceOutcome};
use crate::subscriptions::{DestinationId, SubscriptionError};

#[derive(Clone)]
pub struct AppState {
    pub dispatch: Arc<DispatchLoop>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/services", get(list_services))
        .route("/services/{service}/latest", get(latest_update))
        .route("/services/{service}/check", post(check_service))
        .route(
            "/scopes/{scope}/subscriptions",
            get(list_subscriptions).post(subscribe),
        )
        .route(
            "/scopes/{scope}/subscriptions/{service}/{destination}",
            delete(unsubscribe),
        )
        .route("/loop", get(loop_status))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    UnknownService(String),
    Subscription(SubscriptionError),
    NotFound(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::UnknownService(s) => (
                StatusCode::BAD_REQUEST,
                "unknown_service",
                format!("{s} is not a known service, see GET /services"),
            ),
            ApiError::Subscription(e @ SubscriptionError::AlreadySubscribed { .. }) => {
                (StatusCode::CONFLICT, "already_subscribed", e.to_string())
            }
            ApiError::Subscription(e @ SubscriptionError::NotSubscribed { .. }) => {
                (StatusCode::NOT_FOUND, "not_subscribed", e.to_string())
            }
            ApiError::Subscription(e) => {
                tracing::error!(error = %e, "subscription store failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", e.to_string())
            }
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m),
            ApiError::Internal(m) => {
                tracing::error!(error = %m, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", m)
            }
        };
        (status, Json(ErrorBody { error, message })).into_response()
    }
}

impl From<SubscriptionError> for ApiError {
    fn from(e: SubscriptionError) -> Self {
        ApiError::Subscription(e)
    }
}

#[derive(Serialize)]
struct ServiceInfo {
    id: String,
    friendly_name: String,
}

async fn list_services(State(state): State<AppState>) -> Json<Vec<ServiceInfo>> {
    Json(
        state
            .dispatch
            .catalog()
            .iter()
            .map(|e| ServiceInfo {
                id: e.id.clone(),
                friendly_name: e.friendly_name.clone(),
            })
            .collect(),
    )
}

async fn latest_update(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<Json<LastKnownUpdate>, ApiError> {
    let entry = state
        .dispatch
        .catalog()
        .get(&service)
        .ok_or(ApiError::UnknownService(service.clone()))?;
    state
        .dispatch
        .detector()
        .last_known(&entry.id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no update seen yet for {}", entry.id)))
}

async fn check_service(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<Json<ServiceOutcome>, ApiError> {
    match state.dispatch.check_service(&service).await {
        Ok(outcome) => Ok(Json(outcome)),
        Err(PollError::UnknownService(s)) => Err(ApiError::UnknownService(s)),
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

async fn list_subscriptions(
    State(state): State<AppState>,
    Path(scope): Path<String>,
) -> Result<Json<BTreeMap<String, Vec<DestinationId>>>, ApiError> {
    Ok(Json(
        state.dispatch.subscriptions().list_for_scope(&scope).await?,
    ))
}

#[derive(Debug, Deserialize)]
struct SubscribeReq {
    service: String,
    destination: DestinationId,
}

async fn subscribe(
    State(state): State<AppState>,
    Path(scope): Path<String>,
    Json(body): Json<SubscribeReq>,
) -> Result<StatusCode, ApiError> {
    let entry = state
        .dispatch
        .catalog()
        .get(&body.service)
        .ok_or(ApiError::UnknownService(body.service.clone()))?;
    state
        .dispatch
        .subscriptions()
        .add(&scope, &entry.id, body.destination)
        .await?;
    Ok(StatusCode::CREATED)
}

async fn unsubscribe(
    State(state): State<AppState>,
    Path((scope, service, destination)): Path<(String, String, u64)>,
) -> Result<StatusCode, ApiError> {
    let entry = state
        .dispatch
        .catalog()
        .get(&service)
        .ok_or(ApiError::UnknownService(service.clone()))?;
    state
        .dispatch
        .subscriptions()
        .remove(&scope, &entry.id, DestinationId(destination))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct LoopInfo {
    #[serde(flatten)]
    status: LoopStatus,
    healthy: bool,
}

async fn loop_status(State(state): State<AppState>) -> Json<LoopInfo> {
    Json(LoopInfo {
        status: state.dispatch.status(),
        healthy: state.dispatch.is_healthy(chrono::Utc::now()),
    })
}
