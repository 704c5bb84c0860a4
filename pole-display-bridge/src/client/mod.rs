use crate::model::{ConnectConfig, DisplayStatus, EndpointDescriptor};
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Method, Request, StatusCode, Url,
};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

const DEFAULT_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Remote calls the controller makes against the display service.
///
/// The controller only ever talks to the peripheral through this trait, so
/// tests can swap in a scripted fake.
#[async_trait]
pub trait DisplayTransport: Send + Sync {
    async fn connect(
        &self,
        endpoint: &str,
        config: &ConnectConfig,
    ) -> Result<(), DisplayServiceError>;
    async fn disconnect(&self) -> Result<(), DisplayServiceError>;
    async fn get_status(&self) -> Result<DisplayStatus, DisplayServiceError>;
    async fn write_message(&self, line1: &str, line2: &str) -> Result<(), DisplayServiceError>;
    async fn show_welcome(&self) -> Result<(), DisplayServiceError>;
    async fn show_thank_you(&self) -> Result<(), DisplayServiceError>;
    async fn show_price(&self, item: &str, price: f64) -> Result<(), DisplayServiceError>;
    async fn show_total(&self, total: f64) -> Result<(), DisplayServiceError>;
    async fn show_error(&self, message: &str) -> Result<(), DisplayServiceError>;
    async fn clear_display(&self) -> Result<(), DisplayServiceError>;
    async fn list_endpoints(&self) -> Result<Vec<EndpointDescriptor>, DisplayServiceError>;
}

#[derive(Clone, Debug)]
pub struct DisplayServiceClient {
    http: Client,
    base_url: Url,
    api_key: Option<String>,
    client_version: String,
}

#[derive(Clone, Debug)]
pub struct DisplayServiceClientBuilder {
    base_url: String,
    api_key: Option<String>,
    client_version: String,
    timeout: Duration,
}

impl DisplayServiceClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            client_version: DEFAULT_CLIENT_VERSION.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn client_version(mut self, client_version: impl Into<String>) -> Self {
        self.client_version = client_version.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<DisplayServiceClient, DisplayServiceError> {
        DisplayServiceClient::from_parts(
            self.base_url,
            self.api_key,
            self.client_version,
            self.timeout,
        )
    }
}

impl DisplayServiceClient {
    pub fn builder(base_url: impl Into<String>) -> DisplayServiceClientBuilder {
        DisplayServiceClientBuilder::new(base_url)
    }

    fn from_parts(
        base_url: String,
        api_key: Option<String>,
        client_version: String,
        timeout: Duration,
    ) -> Result<Self, DisplayServiceError> {
        if client_version.trim().is_empty() {
            return Err(DisplayServiceError::Config(
                "client version header value must not be empty",
            ));
        }
        let api_key = api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        let mut parsed =
            Url::parse(base_url.trim()).map_err(|err| DisplayServiceError::Url(err.to_string()))?;
        if !parsed.path().ends_with('/') {
            let new_path = format!("{}/", parsed.path().trim_end_matches('/'));
            parsed.set_path(&new_path);
        }

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(DisplayServiceError::Http)?;

        Ok(Self {
            http,
            base_url: parsed,
            api_key,
            client_version,
        })
    }

    pub fn build_status_request(&self) -> Result<Request, DisplayServiceError> {
        self.build_request(Method::GET, "status")
    }

    pub fn build_endpoints_request(&self) -> Result<Request, DisplayServiceError> {
        self.build_request(Method::GET, "endpoints")
    }

    pub fn build_command_request<T: Serialize>(
        &self,
        path: &str,
        body: Option<&T>,
    ) -> Result<Request, DisplayServiceError> {
        let mut builder = self.build_request_builder(Method::POST, path)?;
        if let Some(body) = body {
            let bytes = serde_json::to_vec(body).map_err(DisplayServiceError::Json)?;
            builder = builder.header(CONTENT_TYPE, "application/json").body(bytes);
        }
        builder.build().map_err(DisplayServiceError::Http)
    }

    async fn send(&self, req: Request) -> Result<(StatusCode, String), DisplayServiceError> {
        let resp = self.http.execute(req).await.map_err(map_send_error)?;
        let status = resp.status();
        let body = resp.text().await.map_err(map_send_error)?;
        Ok((status, body))
    }

    async fn command<T: Serialize + Sync>(
        &self,
        path: &str,
        body: Option<&T>,
    ) -> Result<(), DisplayServiceError> {
        let req = self.build_command_request(path, body)?;
        let (status, body) = self.send(req).await?;
        parse_command_response(status, &body)
    }

    fn build_request(&self, method: Method, path: &str) -> Result<Request, DisplayServiceError> {
        self.build_request_builder(method, path)?
            .build()
            .map_err(DisplayServiceError::Http)
    }

    fn build_request_builder(
        &self,
        method: Method,
        path: &str,
    ) -> Result<reqwest::RequestBuilder, DisplayServiceError> {
        let url = self
            .base_url
            .join(&format!("api/v1/display/{}", path))
            .map_err(|err| DisplayServiceError::Url(err.to_string()))?;
        let headers = self.common_headers()?;
        Ok(self.http.request(method, url).headers(headers))
    }

    fn common_headers(&self) -> Result<HeaderMap, DisplayServiceError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &self.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", key))
                    .map_err(DisplayServiceError::InvalidHeaderValue)?,
            );
        }
        headers.insert(
            "X-Display-Client-Version",
            HeaderValue::from_str(self.client_version.trim())
                .map_err(DisplayServiceError::InvalidHeaderValue)?,
        );
        Ok(headers)
    }
}

#[async_trait]
impl DisplayTransport for DisplayServiceClient {
    async fn connect(
        &self,
        endpoint: &str,
        config: &ConnectConfig,
    ) -> Result<(), DisplayServiceError> {
        let body = ConnectRequest {
            endpoint: endpoint.to_string(),
            config: config.clone(),
        };
        self.command("connect", Some(&body)).await
    }

    async fn disconnect(&self) -> Result<(), DisplayServiceError> {
        self.command::<()>("disconnect", None).await
    }

    async fn get_status(&self) -> Result<DisplayStatus, DisplayServiceError> {
        let req = self.build_status_request()?;
        let (status, body) = self.send(req).await?;
        parse_status_response(status, &body)
    }

    async fn write_message(&self, line1: &str, line2: &str) -> Result<(), DisplayServiceError> {
        let body = WriteRequest {
            line1: line1.to_string(),
            line2: line2.to_string(),
        };
        self.command("write", Some(&body)).await
    }

    async fn show_welcome(&self) -> Result<(), DisplayServiceError> {
        self.command::<()>("welcome", None).await
    }

    async fn show_thank_you(&self) -> Result<(), DisplayServiceError> {
        self.command::<()>("thank-you", None).await
    }

    async fn show_price(&self, item: &str, price: f64) -> Result<(), DisplayServiceError> {
        let body = PriceRequest {
            item: item.to_string(),
            price,
        };
        self.command("price", Some(&body)).await
    }

    async fn show_total(&self, total: f64) -> Result<(), DisplayServiceError> {
        self.command("total", Some(&TotalRequest { total })).await
    }

    async fn show_error(&self, message: &str) -> Result<(), DisplayServiceError> {
        let body = ErrorRequest {
            message: message.to_string(),
        };
        self.command("error", Some(&body)).await
    }

    async fn clear_display(&self) -> Result<(), DisplayServiceError> {
        self.command::<()>("clear", None).await
    }

    async fn list_endpoints(&self) -> Result<Vec<EndpointDescriptor>, DisplayServiceError> {
        let req = self.build_endpoints_request()?;
        let (status, body) = self.send(req).await?;
        parse_endpoints_response(status, &body)
    }
}

#[derive(Debug)]
pub enum DisplayServiceError {
    Config(&'static str),
    Url(String),
    Http(reqwest::Error),
    Network { code: &'static str, message: String },
    Json(serde_json::Error),
    InvalidHeaderValue(reqwest::header::InvalidHeaderValue),
    Api { status: StatusCode, body: String },
}

impl fmt::Display for DisplayServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config error: {msg}"),
            Self::Url(err) => write!(f, "url error: {err}"),
            Self::Http(err) => write!(f, "http error: {err}"),
            Self::Network { code, message } => write!(f, "network error {code}: {message}"),
            Self::Json(err) => write!(f, "json error: {err}"),
            Self::InvalidHeaderValue(err) => write!(f, "invalid header value: {err}"),
            Self::Api { status, body } => write!(f, "api error {}: {}", status.as_u16(), body),
        }
    }
}

impl std::error::Error for DisplayServiceError {}

fn map_send_error(err: reqwest::Error) -> DisplayServiceError {
    let code = if err.is_connect() {
        "ECONNREFUSED"
    } else if err.is_timeout() {
        "ETIMEDOUT"
    } else if err.is_body() || err.is_decode() {
        "ECONNRESET"
    } else {
        "ERR_NETWORK"
    };
    DisplayServiceError::Network {
        code,
        message: err.to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub endpoint: String,
    pub config: ConnectConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRequest {
    pub line1: String,
    pub line2: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceRequest {
    pub item: String,
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TotalRequest {
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRequest {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsEnvelope {
    pub endpoints: Vec<EndpointDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum EndpointsBody {
    Envelope(EndpointsEnvelope),
    Bare(Vec<EndpointDescriptor>),
}

pub fn parse_status_response(
    status: StatusCode,
    body: &str,
) -> Result<DisplayStatus, DisplayServiceError> {
    if !status.is_success() {
        return Err(api_error(status, body));
    }
    serde_json::from_str(body).map_err(DisplayServiceError::Json)
}

pub fn parse_endpoints_response(
    status: StatusCode,
    body: &str,
) -> Result<Vec<EndpointDescriptor>, DisplayServiceError> {
    if status == StatusCode::NO_CONTENT {
        return Ok(Vec::new());
    }
    if !status.is_success() {
        return Err(api_error(status, body));
    }
    let parsed: EndpointsBody = serde_json::from_str(body).map_err(DisplayServiceError::Json)?;
    let mut endpoints = match parsed {
        EndpointsBody::Envelope(envelope) => envelope.endpoints,
        EndpointsBody::Bare(list) => list,
    };
    endpoints.retain(|e| !e.path.trim().is_empty());
    Ok(endpoints)
}

pub fn parse_command_response(status: StatusCode, body: &str) -> Result<(), DisplayServiceError> {
    if !status.is_success() {
        return Err(api_error(status, body));
    }
    // Some firmware bridges answer 200 with {"success": false, "error": "..."}.
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body) {
        if map.get("success").and_then(|v| v.as_bool()) == Some(false) {
            return Err(DisplayServiceError::Api {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: extract_error_message(body),
            });
        }
    }
    Ok(())
}

fn api_error(status: StatusCode, body: &str) -> DisplayServiceError {
    DisplayServiceError::Api {
        status,
        body: extract_error_message(body),
    }
}

/// Pulls the `error`/`message`/`detail` field out of a JSON error body, or
/// returns the trimmed body unchanged.
pub fn extract_error_message(body: &str) -> String {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["error", "message", "detail"] {
            if let Some(text) = map.get(field).and_then(|v| v.as_str()) {
                return text.trim().to_string();
            }
        }
    }
    body.trim().to_string()
}
