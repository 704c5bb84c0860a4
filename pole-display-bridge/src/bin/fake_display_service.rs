//! Stand-in for the display service, for exercising the bridge without
//! hardware. Serves the `api/v1/display/*` surface, keeps the two visible
//! lines in memory and fails a configurable share of requests.
//!
//! Environment: `FAKE_DISPLAY_PORT` (default 8085), `FAKE_DISPLAY_FAILURE_RATE`
//! (0.0 to 1.0, default 0), `FAKE_DISPLAY_ENDPOINTS` (comma separated,
//! default `COM3,COM4`).

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use pole_display_bridge::client::{
    ConnectRequest, EndpointsEnvelope, ErrorRequest, PriceRequest, TotalRequest, WriteRequest,
};
use pole_display_bridge::model::{DisplayInfo, DisplayStatus, EndpointDescriptor, SessionInfo};
use rand::Rng;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::TcpListener;

const LINE_WIDTH: usize = 20;

#[derive(Default)]
struct Panel {
    attached: Option<String>,
    baud_rate: u32,
    lines: (String, String),
}

struct FakeState {
    panel: Mutex<Panel>,
    failure_rate: f64,
    endpoints: Vec<String>,
}

impl FakeState {
    fn panel(&self) -> std::sync::MutexGuard<'_, Panel> {
        self.panel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flaky(&self) -> Option<Response> {
        if self.failure_rate > 0.0 && rand::thread_rng().gen_bool(self.failure_rate) {
            tracing::debug!("injecting failure");
            return Some(service_error("Serial port write timeout"));
        }
        None
    }

    /// Writes two lines if a panel is attached.
    fn show(&self, line1: &str, line2: &str) -> Response {
        if let Some(failure) = self.flaky() {
            return failure;
        }
        let mut panel = self.panel();
        if panel.attached.is_none() {
            return service_error("Display not connected");
        }
        panel.lines = (clip(line1), clip(line2));
        tracing::info!(line1 = %panel.lines.0, line2 = %panel.lines.1, "display updated");
        ok()
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    let port: u16 = env_or("FAKE_DISPLAY_PORT", 8085);
    let failure_rate: f64 = env_or::<f64>("FAKE_DISPLAY_FAILURE_RATE", 0.0).clamp(0.0, 1.0);
    let endpoints = std::env::var("FAKE_DISPLAY_ENDPOINTS")
        .unwrap_or_else(|_| "COM3,COM4".to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let state = Arc::new(FakeState {
        panel: Mutex::new(Panel::default()),
        failure_rate,
        endpoints,
    });

    let app = Router::new()
        .route("/api/v1/display/status", get(status))
        .route("/api/v1/display/endpoints", get(endpoints_list))
        .route("/api/v1/display/connect", post(connect))
        .route("/api/v1/display/disconnect", post(disconnect))
        .route("/api/v1/display/write", post(write))
        .route("/api/v1/display/welcome", post(welcome))
        .route("/api/v1/display/thank-you", post(thank_you))
        .route("/api/v1/display/price", post(price))
        .route("/api/v1/display/total", post(total))
        .route("/api/v1/display/error", post(error))
        .route("/api/v1/display/clear", post(clear))
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%addr, error = %err, "bind failed");
            std::process::exit(1);
        }
    };
    tracing::info!(%addr, failure_rate, "fake display service listening");
    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!(error = %err, "server failed");
        std::process::exit(1);
    }
}

async fn status(State(state): State<Arc<FakeState>>) -> Response {
    if let Some(failure) = state.flaky() {
        return failure;
    }
    let panel = state.panel();
    let body = DisplayStatus {
        connected: panel.attached.is_some(),
        display: panel.attached.as_ref().map(|port| DisplayInfo {
            port: Some(port.clone()),
            model: Some("Fake VFD 2x20".to_string()),
            baud_rate: Some(panel.baud_rate),
        }),
        session: Some(SessionInfo {
            session_id: Some("fake-session".to_string()),
            owner: Some("fake_display_service".to_string()),
        }),
    };
    Json(body).into_response()
}

async fn endpoints_list(State(state): State<Arc<FakeState>>) -> Response {
    let endpoints = state
        .endpoints
        .iter()
        .map(|path| EndpointDescriptor {
            path: path.clone(),
            description: Some("Fake serial display".to_string()),
            manufacturer: Some("Acme".to_string()),
        })
        .collect();
    Json(EndpointsEnvelope { endpoints }).into_response()
}

async fn connect(State(state): State<Arc<FakeState>>, Json(req): Json<ConnectRequest>) -> Response {
    if !state.endpoints.iter().any(|e| e == &req.endpoint) {
        return service_error(&format!("Port {} not found", req.endpoint));
    }
    let mut panel = state.panel();
    panel.attached = Some(req.endpoint.clone());
    panel.baud_rate = req.config.baud_rate;
    tracing::info!(endpoint = %req.endpoint, baud_rate = req.config.baud_rate, "display attached");
    ok()
}

async fn disconnect(State(state): State<Arc<FakeState>>) -> Response {
    let mut panel = state.panel();
    panel.attached = None;
    panel.lines = Default::default();
    tracing::info!("display detached");
    ok()
}

async fn write(State(state): State<Arc<FakeState>>, Json(req): Json<WriteRequest>) -> Response {
    state.show(&req.line1, &req.line2)
}

async fn welcome(State(state): State<Arc<FakeState>>) -> Response {
    state.show("Welcome!", "")
}

async fn thank_you(State(state): State<Arc<FakeState>>) -> Response {
    state.show("Thank you!", "Please come again")
}

async fn price(State(state): State<Arc<FakeState>>, Json(req): Json<PriceRequest>) -> Response {
    state.show(&req.item, &format!("{:>width$.2}", req.price, width = LINE_WIDTH))
}

async fn total(State(state): State<Arc<FakeState>>, Json(req): Json<TotalRequest>) -> Response {
    state.show("TOTAL", &format!("{:>width$.2}", req.total, width = LINE_WIDTH))
}

async fn error(State(state): State<Arc<FakeState>>, Json(req): Json<ErrorRequest>) -> Response {
    let first: String = req.message.chars().take(LINE_WIDTH).collect();
    let rest: String = req.message.chars().skip(LINE_WIDTH).collect();
    state.show(&first, &rest)
}

async fn clear(State(state): State<Arc<FakeState>>) -> Response {
    state.show("", "")
}

fn clip(line: &str) -> String {
    line.chars().take(LINE_WIDTH).collect()
}

fn ok() -> Response {
    Json(serde_json::json!({ "success": true })).into_response()
}

fn service_error(message: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "success": false, "error": message })),
    )
        .into_response()
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
