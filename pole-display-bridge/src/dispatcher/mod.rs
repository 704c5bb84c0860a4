//! Gatekeeper for every named display operation.
//!
//! Guards run in order and each one short-circuits to `false` without
//! touching the transport: breaker open, not connected, duplicate summary
//! inside the dedup window, same key already in flight. Failures are
//! classified and folded into controller state; nothing is returned to the
//! caller except the boolean. A failure reporting an absent peripheral also
//! lowers `connected`, so later operations stop at the second guard.

use crate::classify::{classify, RawFailure};
use crate::client::DisplayServiceError;
use crate::model::{ErrorKind, Operation, OperationRecord};
use crate::state::ControllerCore;
use std::future::Future;
use tokio::time::Instant;

/// Holds an operation key in the in-flight set. Dropping it releases the key,
/// including when the awaiting future is dropped mid-call.
struct InFlightGuard<'a> {
    core: &'a ControllerCore,
    op: Operation,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.core.lock().in_flight.remove(&self.op);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    BreakerOpen,
    NotConnected,
    Duplicate,
    InFlight,
}

pub async fn execute<F, Fut>(
    core: &ControllerCore,
    op: Operation,
    fingerprint: String,
    remote_call: F,
) -> bool
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), DisplayServiceError>>,
{
    let _guard = match admit(core, op, &fingerprint, Instant::now()) {
        Admission::Admitted => InFlightGuard { core, op },
        rejected => {
            tracing::debug!(operation = %op, reason = ?rejected, "display operation skipped");
            return false;
        }
    };

    let result = remote_call().await;

    let now = Instant::now();
    let mut state = core.lock();
    match result {
        Ok(()) => {
            state.apply_success(now);
            if op.is_dedup_eligible() {
                state.last_record = Some(OperationRecord {
                    key: op,
                    fingerprint,
                    at: now,
                });
            }
            true
        }
        Err(err) => {
            let diagnostic = classify(&RawFailure::from(&err));
            tracing::warn!(
                operation = %op,
                kind = %diagnostic.kind,
                error = %err,
                "display operation failed"
            );
            if diagnostic.kind == ErrorKind::Disconnected {
                state.set_connected(false);
            }
            state.apply_failure(diagnostic, now);
            false
        }
    }
}

/// Runs the guard sequence and, when admitted, claims the in-flight slot in
/// the same critical section.
fn admit(core: &ControllerCore, op: Operation, fingerprint: &str, now: Instant) -> Admission {
    let dedup_window = core.settings().dedup_window;
    let mut state = core.lock();

    if state.refresh_breaker(now) {
        return Admission::BreakerOpen;
    }
    if !state.connection.connected {
        return Admission::NotConnected;
    }
    if op.is_dedup_eligible() {
        if let Some(record) = &state.last_record {
            if record.key == op
                && record.fingerprint == fingerprint
                && now.duration_since(record.at) < dedup_window
            {
                return Admission::Duplicate;
            }
        }
    }
    if !state.in_flight.insert(op) {
        return Admission::InFlight;
    }
    Admission::Admitted
}
