use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Disconnected,
    PortError,
    ServerError,
    Network,
    BadResponse,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::PortError => "port_error",
            Self::ServerError => "server_error",
            Self::Network => "network",
            Self::BadResponse => "bad_response",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified view of the most recent failure. Only the latest one is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDiagnostic {
    pub kind: ErrorKind,
    pub message: String,
    pub suggestion: String,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub code: Option<String>,
}

impl ErrorDiagnostic {
    /// Text shown to the operator as the current error.
    pub fn user_message(&self) -> String {
        format!("{}. {}", self.message, self.suggestion)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiagnosticInfo {
    pub last_checked_unix_ms: Option<u64>,
    pub connected: bool,
    pub last_error: Option<ErrorDiagnostic>,
    pub candidate_endpoints: Option<Vec<EndpointDescriptor>>,
    pub suggestion: Option<String>,
    pub connection_attempts: u32,
    pub failed_attempts: u32,
    pub display_info: Option<DisplayInfo>,
    pub session_owner: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionState {
    pub connected: bool,
    pub last_checked_unix_ms: Option<u64>,
    pub diagnostic_info: DiagnosticInfo,
}

/// Named display operations. Each one is its own single-flight key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Welcome,
    ThankYou,
    ItemAdded,
    Summary,
    Price,
    Total,
    Write,
    Clear,
    Error,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Welcome => "show_welcome",
            Self::ThankYou => "show_thank_you",
            Self::ItemAdded => "show_item_added",
            Self::Summary => "show_summary",
            Self::Price => "show_price",
            Self::Total => "show_total",
            Self::Write => "write_message",
            Self::Clear => "clear_display",
            Self::Error => "show_error",
        }
    }

    /// Only the running summary fires often enough to need duplicate suppression.
    pub fn is_dedup_eligible(&self) -> bool {
        matches!(self, Self::Summary)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRecord {
    pub key: Operation,
    pub fingerprint: String,
    pub at: tokio::time::Instant,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DisplayStatus {
    pub connected: bool,
    #[serde(default)]
    pub display: Option<DisplayInfo>,
    #[serde(default)]
    pub session: Option<SessionInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DisplayInfo {
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub baud_rate: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionInfo {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EndpointDescriptor {
    pub path: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
}

pub const DEFAULT_BAUD_RATE: u32 = 9600;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectConfig {
    pub baud_rate: u32,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

/// Read-only view of the controller handed to the CLI and the operator server.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ControllerSnapshot {
    pub connected: bool,
    pub current_error: Option<String>,
    pub loading: bool,
    pub is_temporarily_disabled: bool,
    pub consecutive_error_count: u32,
    pub disabled_remaining_ms: Option<u64>,
    pub in_flight: Vec<Operation>,
    pub diagnostic_info: DiagnosticInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_summary_is_dedup_eligible() {
        let all = [
            Operation::Welcome,
            Operation::ThankYou,
            Operation::ItemAdded,
            Operation::Summary,
            Operation::Price,
            Operation::Total,
            Operation::Write,
            Operation::Clear,
            Operation::Error,
        ];
        let eligible: Vec<_> = all.iter().filter(|op| op.is_dedup_eligible()).collect();
        assert_eq!(eligible, vec![&Operation::Summary]);
    }

    #[test]
    fn status_tolerates_missing_optional_sections() {
        let status: DisplayStatus = serde_json::from_str(r#"{ "connected": true }"#).unwrap();
        assert!(status.connected);
        assert!(status.display.is_none());
        assert!(status.session.is_none());
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::PortError).unwrap();
        assert_eq!(json, "\"port_error\"");
    }
}
