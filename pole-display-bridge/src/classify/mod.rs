//! Maps raw display-service failures onto operator-facing diagnostics.
//!
//! Rules are evaluated in order and the first match wins. The function is
//! total: every input produces a diagnostic, nothing here can fail.

use crate::client::DisplayServiceError;
use crate::model::{ErrorDiagnostic, ErrorKind};

const ABSENT_PHRASES: &[&str] = &[
    "not connected",
    "no display",
    "display not found",
    "device not found",
    "disconnected",
];

const PORT_WORDS: &[&str] = &["port", "ports", "serial", "channel"];

const NETWORK_CODES: &[&str] = &[
    "ECONNREFUSED",
    "ECONNRESET",
    "ETIMEDOUT",
    "ENOTFOUND",
    "EHOSTUNREACH",
    "ERR_NETWORK",
];

const NETWORK_PHRASES: &[&str] = &["network error", "connection refused", "timed out"];

pub const BAD_RESPONSE_CODE: &str = "BAD_RESPONSE";

/// A failure as observed at the transport boundary, before classification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFailure {
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: String,
}

impl RawFailure {
    pub fn service(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code: None,
            message: message.into(),
        }
    }

    pub fn transport(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: Some(code.into()),
            message: message.into(),
        }
    }
}

impl From<&DisplayServiceError> for RawFailure {
    fn from(err: &DisplayServiceError) -> Self {
        match err {
            DisplayServiceError::Api { status, body } => Self::service(status.as_u16(), body.clone()),
            DisplayServiceError::Network { code, message } => Self::transport(*code, message.clone()),
            DisplayServiceError::Json(err) => Self::transport(BAD_RESPONSE_CODE, err.to_string()),
            other => Self {
                status: None,
                code: None,
                message: other.to_string(),
            },
        }
    }
}

pub fn classify(raw: &RawFailure) -> ErrorDiagnostic {
    let lowered = raw.message.to_lowercase();
    let service_side = raw.status.map(|s| (500..600).contains(&s)).unwrap_or(false);

    if service_side && ABSENT_PHRASES.iter().any(|p| lowered.contains(p)) {
        return peripheral_absent(raw.status, raw.code.clone());
    }

    if service_side && mentions_port(&lowered) {
        return diagnostic(
            ErrorKind::PortError,
            with_detail("Display port error", &raw.message),
            "Check the port configuration",
            raw,
        );
    }

    if service_side {
        let status = raw.status.unwrap_or(500);
        return diagnostic(
            ErrorKind::ServerError,
            format!("Display service error ({status})"),
            "Restart the service or inspect logs",
            raw,
        );
    }

    if is_network_failure(raw, &lowered) {
        return diagnostic(
            ErrorKind::Network,
            "Display service unreachable".to_string(),
            "Verify the service is reachable",
            raw,
        );
    }

    if raw.code.as_deref() == Some(BAD_RESPONSE_CODE) {
        return diagnostic(
            ErrorKind::BadResponse,
            "Unexpected response from display service".to_string(),
            "The service is misbehaving",
            raw,
        );
    }

    diagnostic(
        ErrorKind::Unknown,
        with_detail("Unexpected display error", &raw.message),
        "Try again or reconnect the display",
        raw,
    )
}

/// Diagnostic for a status report in which the service answered but no
/// peripheral is attached.
pub fn peripheral_absent(status: Option<u16>, code: Option<String>) -> ErrorDiagnostic {
    ErrorDiagnostic {
        kind: ErrorKind::Disconnected,
        message: "Peripheral not connected".to_string(),
        suggestion: "Connect the display via settings".to_string(),
        status,
        code,
    }
}

fn diagnostic(kind: ErrorKind, message: String, suggestion: &str, raw: &RawFailure) -> ErrorDiagnostic {
    ErrorDiagnostic {
        kind,
        message,
        suggestion: suggestion.to_string(),
        status: raw.status,
        code: raw.code.clone(),
    }
}

fn with_detail(prefix: &str, detail: &str) -> String {
    let detail = detail.trim();
    if detail.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}: {detail}")
    }
}

/// Whole-word match, so "transport" or "report" never count as a port.
fn mentions_port(lowered: &str) -> bool {
    lowered
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|word| PORT_WORDS.contains(&word) || word.starts_with("tty") || is_com_port(word))
}

// Windows serial ports show up as COM1..COM256.
fn is_com_port(word: &str) -> bool {
    word.strip_prefix("com")
        .map(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

fn is_network_failure(raw: &RawFailure, lowered: &str) -> bool {
    if let Some(code) = raw.code.as_deref() {
        if NETWORK_CODES.iter().any(|c| c.eq_ignore_ascii_case(code)) {
            return true;
        }
    }
    raw.status.is_none() && NETWORK_PHRASES.iter().any(|p| lowered.contains(p))
}
