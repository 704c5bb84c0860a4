//! Suggests candidate display endpoints after repeated failed connection
//! attempts. It only ever lists endpoints; connecting stays a human action.

use crate::client::DisplayServiceError;
use crate::model::EndpointDescriptor;
use crate::state::ControllerCore;

pub const DEFAULT_ADVISOR_THRESHOLD: u32 = 3;

/// Failed-attempt bookkeeping. Unlike the breaker's consecutive count this
/// only resets on a successful status check or an explicit reconnect.
#[derive(Debug, Clone, Default)]
pub struct AdvisorState {
    failed_attempts: u32,
    advised: bool,
}

impl AdvisorState {
    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// Returns `true` when the caller should run endpoint discovery now.
    /// Fires once per failure streak.
    pub fn record_failure(&mut self, threshold: u32) -> bool {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        if !self.advised && self.failed_attempts >= threshold {
            self.advised = true;
            return true;
        }
        false
    }

    pub fn record_success(&mut self) {
        self.reset();
    }

    pub fn reset(&mut self) {
        self.failed_attempts = 0;
        self.advised = false;
    }
}

/// Queries the service for endpoints and records them as candidates.
pub async fn discover(core: &ControllerCore) -> Result<Vec<EndpointDescriptor>, DisplayServiceError> {
    let endpoints = core.transport().list_endpoints().await?;
    let suggestion = format_suggestion(&endpoints);
    let mut state = core.lock();
    let info = &mut state.connection.diagnostic_info;
    info.candidate_endpoints = Some(endpoints.clone());
    info.suggestion = suggestion;
    Ok(endpoints)
}

/// Discovery run from the failure path. Errors are logged and dropped; they
/// never count against the breaker.
pub async fn advise(core: &ControllerCore) -> Option<String> {
    match discover(core).await {
        Ok(endpoints) => {
            let suggestion = core.lock().connection.diagnostic_info.suggestion.clone();
            match &suggestion {
                Some(text) => tracing::info!(candidates = endpoints.len(), "{text}"),
                None => tracing::info!("no display endpoints available"),
            }
            suggestion
        }
        Err(err) => {
            tracing::warn!(error = %err, "display endpoint discovery failed");
            None
        }
    }
}

pub fn format_suggestion(endpoints: &[EndpointDescriptor]) -> Option<String> {
    if endpoints.is_empty() {
        return None;
    }
    let names: Vec<String> = endpoints
        .iter()
        .map(|e| match e.description.as_deref().map(str::trim) {
            Some(desc) if !desc.is_empty() => format!("{} ({})", e.path, desc),
            _ => e.path.clone(),
        })
        .collect();
    Some(format!(
        "Available displays: {}. Connect one via settings",
        names.join(", ")
    ))
}
