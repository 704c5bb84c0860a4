//! Scripted in-memory transport for controller tests.

use crate::client::{DisplayServiceError, DisplayTransport};
use crate::model::{ConnectConfig, DisplayInfo, DisplayStatus, EndpointDescriptor, SessionInfo};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Mutex;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Connect(String),
    Disconnect,
    GetStatus,
    Write(String, String),
    Welcome,
    ThankYou,
    Price(String, f64),
    Total(f64),
    Error(String),
    Clear,
    ListEndpoints,
}

/// How the next calls of a given family should end.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Ok,
    Service(u16, String),
    Network,
    BadResponse,
}

impl Outcome {
    fn into_result(self) -> Result<(), DisplayServiceError> {
        match self {
            Self::Ok => Ok(()),
            Self::Service(status, body) => Err(DisplayServiceError::Api {
                status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                body,
            }),
            Self::Network => Err(DisplayServiceError::Network {
                code: "ECONNREFUSED",
                message: "connection refused".to_string(),
            }),
            Self::BadResponse => Err(DisplayServiceError::Json(
                serde_json::from_str::<serde_json::Value>("{").unwrap_err(),
            )),
        }
    }
}

struct Script {
    status: Outcome,
    peripheral_connected: bool,
    ops: Outcome,
    endpoints: Vec<EndpointDescriptor>,
    fail_endpoints: bool,
    hold: Option<fn(&Call) -> bool>,
    calls: Vec<Call>,
}

pub struct FakeTransport {
    script: Mutex<Script>,
    gate: Semaphore,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTransport {
    /// Healthy service with a connected display.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                status: Outcome::Ok,
                peripheral_connected: true,
                ops: Outcome::Ok,
                endpoints: Vec::new(),
                fail_endpoints: false,
                hold: None,
                calls: Vec::new(),
            }),
            gate: Semaphore::new(0),
        }
    }

    pub fn set_status(&self, outcome: Outcome) {
        self.script.lock().unwrap().status = outcome;
    }

    pub fn set_peripheral_connected(&self, connected: bool) {
        self.script.lock().unwrap().peripheral_connected = connected;
    }

    pub fn set_ops(&self, outcome: Outcome) {
        self.script.lock().unwrap().ops = outcome;
    }

    pub fn set_endpoints(&self, endpoints: Vec<EndpointDescriptor>) {
        self.script.lock().unwrap().endpoints = endpoints;
    }

    pub fn fail_endpoints(&self, fail: bool) {
        self.script.lock().unwrap().fail_endpoints = fail;
    }

    /// While held, display operations and status checks park until
    /// `release` hands out a permit.
    pub fn hold(&self) {
        self.hold_matching(|_| true);
    }

    /// Holds only the calls `pred` selects; everything else answers at once.
    pub fn hold_matching(&self, pred: fn(&Call) -> bool) {
        self.script.lock().unwrap().hold = Some(pred);
    }

    pub fn release(&self, permits: usize) {
        self.gate.add_permits(permits);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.script.lock().unwrap().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn clear_calls(&self) {
        self.script.lock().unwrap().calls.clear();
    }

    /// Yields until at least `n` calls have been recorded.
    pub async fn wait_for_calls(&self, n: usize) {
        while self.script.lock().unwrap().calls.len() < n {
            tokio::task::yield_now().await;
        }
    }

    fn record(&self, call: Call) {
        self.script.lock().unwrap().calls.push(call);
    }

    /// Records the call, then parks on the gate if it is held.
    async fn enter(&self, call: Call) {
        let held = {
            let mut script = self.script.lock().unwrap();
            let held = script.hold.map(|pred| pred(&call)).unwrap_or(false);
            script.calls.push(call);
            held
        };
        if held {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }
    }

    async fn op(&self, call: Call) -> Result<(), DisplayServiceError> {
        self.enter(call).await;
        let outcome = self.script.lock().unwrap().ops.clone();
        outcome.into_result()
    }
}

#[async_trait]
impl DisplayTransport for FakeTransport {
    async fn connect(
        &self,
        endpoint: &str,
        _config: &ConnectConfig,
    ) -> Result<(), DisplayServiceError> {
        self.op(Call::Connect(endpoint.to_string())).await
    }

    async fn disconnect(&self) -> Result<(), DisplayServiceError> {
        self.op(Call::Disconnect).await
    }

    async fn get_status(&self) -> Result<DisplayStatus, DisplayServiceError> {
        self.enter(Call::GetStatus).await;
        let (outcome, connected) = {
            let script = self.script.lock().unwrap();
            (script.status.clone(), script.peripheral_connected)
        };
        outcome.into_result()?;
        Ok(DisplayStatus {
            connected,
            display: Some(DisplayInfo {
                port: Some("COM3".to_string()),
                model: Some("VFD-220".to_string()),
                baud_rate: Some(9600),
            }),
            session: Some(SessionInfo {
                session_id: Some("till-1".to_string()),
                owner: Some("register-1".to_string()),
            }),
        })
    }

    async fn write_message(&self, line1: &str, line2: &str) -> Result<(), DisplayServiceError> {
        self.op(Call::Write(line1.to_string(), line2.to_string())).await
    }

    async fn show_welcome(&self) -> Result<(), DisplayServiceError> {
        self.op(Call::Welcome).await
    }

    async fn show_thank_you(&self) -> Result<(), DisplayServiceError> {
        self.op(Call::ThankYou).await
    }

    async fn show_price(&self, item: &str, price: f64) -> Result<(), DisplayServiceError> {
        self.op(Call::Price(item.to_string(), price)).await
    }

    async fn show_total(&self, total: f64) -> Result<(), DisplayServiceError> {
        self.op(Call::Total(total)).await
    }

    async fn show_error(&self, message: &str) -> Result<(), DisplayServiceError> {
        self.op(Call::Error(message.to_string())).await
    }

    async fn clear_display(&self) -> Result<(), DisplayServiceError> {
        self.op(Call::Clear).await
    }

    async fn list_endpoints(&self) -> Result<Vec<EndpointDescriptor>, DisplayServiceError> {
        self.record(Call::ListEndpoints);
        let script = self.script.lock().unwrap();
        if script.fail_endpoints {
            return Err(DisplayServiceError::Api {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: "enumeration failed".to_string(),
            });
        }
        Ok(script.endpoints.clone())
    }
}
