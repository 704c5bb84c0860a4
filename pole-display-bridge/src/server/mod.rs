//! Local operator surface: read the controller snapshot and trigger the
//! manual recovery actions (check, reconnect, breaker reset, discovery).

use crate::controller::DisplayController;
use crate::monitor::CheckOutcome;
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tokio::sync::watch;

#[derive(Clone)]
struct ServerState {
    token: String,
    controller: DisplayController,
}

pub async fn start(
    addr: SocketAddr,
    token: String,
    controller: DisplayController,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = Arc::new(ServerState { token, controller });

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status))
        .route("/status/check", post(status_check))
        .route("/reconnect", post(reconnect))
        .route("/breaker/reset", post(breaker_reset))
        .route("/endpoints", get(endpoints))
        .with_state(state);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "operator server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;

    Ok(())
}

async fn status(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    query: Query<HashMap<String, String>>,
) -> Response {
    if !is_token_valid(&headers, &query.0, &state.token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(state.controller.snapshot()).into_response()
}

async fn status_check(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    query: Query<HashMap<String, String>>,
) -> Response {
    if !is_token_valid(&headers, &query.0, &state.token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let outcome = state.controller.check_status().await;
    outcome_response(outcome, &state.controller)
}

async fn reconnect(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    query: Query<HashMap<String, String>>,
) -> Response {
    if !is_token_valid(&headers, &query.0, &state.token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let outcome = state.controller.reconnect().await;
    outcome_response(outcome, &state.controller)
}

async fn breaker_reset(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    query: Query<HashMap<String, String>>,
) -> Response {
    if !is_token_valid(&headers, &query.0, &state.token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.controller.reset_circuit_breaker();
    Json(state.controller.snapshot()).into_response()
}

async fn endpoints(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    query: Query<HashMap<String, String>>,
) -> Response {
    if !is_token_valid(&headers, &query.0, &state.token) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match state.controller.available_endpoints().await {
        Ok(endpoints) => Json(serde_json::json!({ "endpoints": endpoints })).into_response(),
        Err(err) => (
            StatusCode::BAD_GATEWAY,
            format!("Endpoint discovery failed: {}", err),
        )
            .into_response(),
    }
}

fn outcome_response(outcome: CheckOutcome, controller: &DisplayController) -> Response {
    let code = match outcome {
        CheckOutcome::Busy | CheckOutcome::Throttled => StatusCode::ACCEPTED,
        CheckOutcome::Suspended => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (
        code,
        Json(serde_json::json!({
            "outcome": format!("{:?}", outcome),
            "snapshot": controller.snapshot(),
        })),
    )
        .into_response()
}

fn is_token_valid(headers: &HeaderMap, query: &HashMap<String, String>, token: &str) -> bool {
    // Authorization header first, query parameter for browser access.
    if let Some(auth_header) = headers.get("authorization") {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(provided_token) = auth_str.strip_prefix("Bearer ") {
                return provided_token == token;
            }
        }
    }

    query.get("token").map(|t| t == token).unwrap_or(false)
}

async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "healthy",
            "timestamp": std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs()
        })),
    )
}
