use crate::advisor::AdvisorState;
use crate::breaker::CircuitBreaker;
use crate::client::DisplayTransport;
use crate::controller::ControllerSettings;
use crate::model::{
    ConnectionState, ControllerSnapshot, ErrorDiagnostic, Operation, OperationRecord,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;
use tokio::time::Instant;

/// Everything one controller owns: the transport, its tuning, and the
/// mutable state guarded by a single mutex. The mutex is never held across an
/// `.await`.
pub struct ControllerCore {
    state: Mutex<ControllerState>,
    transport: Arc<dyn DisplayTransport>,
    settings: ControllerSettings,
    check_finished: Notify,
}

impl ControllerCore {
    pub fn new(transport: Arc<dyn DisplayTransport>, settings: ControllerSettings) -> Self {
        Self {
            state: Mutex::new(ControllerState::new(&settings)),
            transport,
            settings,
            check_finished: Notify::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn transport(&self) -> &dyn DisplayTransport {
        self.transport.as_ref()
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Signalled every time a status check ends.
    pub fn check_finished(&self) -> &Notify {
        &self.check_finished
    }

    /// Returns once no status check is running.
    pub async fn wait_for_idle_check(&self) {
        loop {
            let finished = self.check_finished.notified();
            let running = self.lock().check_running;
            if !running {
                return;
            }
            finished.await;
        }
    }
}

#[derive(Debug)]
pub struct ControllerState {
    pub connection: ConnectionState,
    pub breaker: CircuitBreaker,
    pub current_error: Option<String>,
    error_from_breaker: bool,
    pub loading: bool,
    pub in_flight: HashSet<Operation>,
    pub last_record: Option<OperationRecord>,
    pub check_running: bool,
    pub last_effective_check: Option<Instant>,
    pub advisor: AdvisorState,
}

impl ControllerState {
    fn new(settings: &ControllerSettings) -> Self {
        Self {
            connection: ConnectionState::default(),
            breaker: CircuitBreaker::new(settings.failure_threshold, settings.cooldown),
            current_error: None,
            error_from_breaker: false,
            loading: false,
            in_flight: HashSet::new(),
            last_record: None,
            check_running: false,
            last_effective_check: None,
            advisor: AdvisorState::default(),
        }
    }

    /// Returns whether the breaker is open at `now`. When the cool-down has
    /// just expired, the breaker's own "temporarily disabled" error is cleared.
    pub fn refresh_breaker(&mut self, now: Instant) -> bool {
        let open = self.breaker.is_open_at(now);
        if !open && self.error_from_breaker {
            self.current_error = None;
            self.error_from_breaker = false;
        }
        open
    }

    pub fn apply_success(&mut self, now: Instant) {
        self.breaker.record_success();
        if !self.refresh_breaker(now) {
            self.clear_error();
        }
    }

    /// Folds a classified failure into breaker bookkeeping and diagnostics.
    /// Returns `true` when this failure opened the breaker.
    pub fn apply_failure(&mut self, diagnostic: ErrorDiagnostic, now: Instant) -> bool {
        let just_opened = self.breaker.record_failure_at(now);
        let user_message = diagnostic.user_message();
        self.connection.diagnostic_info.last_error = Some(diagnostic);
        if just_opened {
            self.current_error = Some(self.breaker.disabled_message());
            self.error_from_breaker = true;
        } else if !self.refresh_breaker(now) {
            self.current_error = Some(user_message);
            self.error_from_breaker = false;
        }
        just_opened
    }

    /// Publishes a diagnostic without touching the breaker, unless the
    /// breaker's own message currently owns the error slot.
    pub fn publish_diagnostic(&mut self, diagnostic: ErrorDiagnostic, now: Instant) {
        let user_message = diagnostic.user_message();
        self.connection.diagnostic_info.last_error = Some(diagnostic);
        if !self.refresh_breaker(now) {
            self.current_error = Some(user_message);
            self.error_from_breaker = false;
        }
    }

    pub fn clear_error(&mut self) {
        self.current_error = None;
        self.error_from_breaker = false;
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connection.connected = connected;
        self.connection.diagnostic_info.connected = connected;
    }

    pub fn mark_checked(&mut self) {
        let ts = now_unix_ms();
        self.connection.last_checked_unix_ms = Some(ts);
        self.connection.diagnostic_info.last_checked_unix_ms = Some(ts);
    }

    /// Full reset used by `reconnect()`. In-flight keys are left alone: their
    /// owners release them when the call lands.
    pub fn reset(&mut self) {
        self.connection = ConnectionState::default();
        self.breaker.reset();
        self.clear_error();
        self.last_record = None;
        self.last_effective_check = None;
        self.advisor.reset();
    }

    pub fn snapshot(&mut self, now: Instant) -> ControllerSnapshot {
        let disabled = self.refresh_breaker(now);
        let mut in_flight: Vec<Operation> = self.in_flight.iter().copied().collect();
        in_flight.sort_by_key(|op| op.as_str());
        let mut diagnostic_info = self.connection.diagnostic_info.clone();
        diagnostic_info.failed_attempts = self.advisor.failed_attempts();
        ControllerSnapshot {
            connected: self.connection.connected,
            current_error: self.current_error.clone(),
            loading: self.loading,
            is_temporarily_disabled: disabled,
            consecutive_error_count: self.breaker.consecutive_errors(),
            disabled_remaining_ms: self
                .breaker
                .remaining_at(now)
                .map(|d| d.as_millis() as u64),
            in_flight,
            diagnostic_info,
        }
    }
}

pub(crate) fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify, RawFailure};
    use crate::testing::FakeTransport;
    use tokio::time::Duration;

    fn core() -> ControllerCore {
        ControllerCore::new(Arc::new(FakeTransport::new()), ControllerSettings::default())
    }

    #[test]
    fn breaker_message_takes_precedence_over_classified_error() {
        let core = core();
        let mut state = core.lock();
        let now = Instant::now();
        let diag = classify(&RawFailure::service(500, "boom"));

        assert!(!state.apply_failure(diag.clone(), now));
        assert_eq!(state.current_error.as_deref(), Some(diag.user_message().as_str()));
        state.apply_failure(diag.clone(), now);
        assert!(state.apply_failure(diag.clone(), now));
        assert!(state
            .current_error
            .as_deref()
            .unwrap()
            .contains("temporarily disabled"));

        // A fourth failure inside the window keeps the breaker message.
        state.apply_failure(diag, now + Duration::from_secs(1));
        assert!(state
            .current_error
            .as_deref()
            .unwrap()
            .contains("temporarily disabled"));
    }

    #[test]
    fn breaker_message_clears_when_cool_down_expires() {
        let core = core();
        let mut state = core.lock();
        let now = Instant::now();
        for _ in 0..3 {
            state.apply_failure(classify(&RawFailure::default()), now);
        }
        assert!(state.refresh_breaker(now + Duration::from_secs(19)));
        assert!(state.current_error.is_some());
        assert!(!state.refresh_breaker(now + Duration::from_secs(20)));
        assert!(state.current_error.is_none());
    }

    #[test]
    fn success_while_open_keeps_breaker_message() {
        let core = core();
        let mut state = core.lock();
        let now = Instant::now();
        for _ in 0..3 {
            state.apply_failure(classify(&RawFailure::default()), now);
        }
        state.apply_success(now);
        assert_eq!(state.breaker.consecutive_errors(), 0);
        assert!(state.current_error.is_some());
        assert!(state.refresh_breaker(now));
    }

    #[test]
    fn reset_clears_everything_but_in_flight_keys() {
        let core = core();
        let mut state = core.lock();
        let now = Instant::now();
        state.set_connected(true);
        state.in_flight.insert(Operation::Welcome);
        for _ in 0..3 {
            state.apply_failure(classify(&RawFailure::default()), now);
        }
        state.reset();
        assert!(!state.connection.connected);
        assert!(state.current_error.is_none());
        assert!(!state.refresh_breaker(now));
        assert!(state.in_flight.contains(&Operation::Welcome));
    }
}
