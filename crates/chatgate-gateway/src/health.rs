//! §6.1 health/ready/live split: `/health` reports driver detail for
//! operators, `/ready` gates load-balancer admission on driver
//! availability, `/live` is a pure liveness probe with no downstream calls.

use crate::state::GatewayState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

pub async fn health(State(state): State<Arc<GatewayState>>) -> Response {
    let models = state.orchestrator.available_models().await;
    let agents: BTreeSet<String> = models.into_iter().map(|m| m.provider).collect();
    Json(json!({ "status": "healthy", "agents": agents })).into_response()
}

pub async fn ready(State(state): State<Arc<GatewayState>>) -> Response {
    if state.orchestrator.any_driver_healthy().await {
        (StatusCode::OK, "OK").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable").into_response()
    }
}

pub async fn live() -> Response {
    (StatusCode::OK, "OK").into_response()
}
