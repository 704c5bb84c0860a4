//! Connection-status polling.
//!
//! `check_status` is safe to call from anywhere: concurrent callers become
//! no-ops while a check runs, effective checks are spaced by
//! `min_check_spacing`, and nothing is sent while the breaker is open.
//! `MonitorHandle` drives it on a timer.

use crate::advisor;
use crate::classify::{classify, peripheral_absent, RawFailure};
use crate::model::{DiagnosticInfo, DisplayStatus};
use crate::state::ControllerCore;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};

pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(90);
pub const DEFAULT_INITIAL_CHECK_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_MIN_CHECK_SPACING: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Connected,
    PeripheralAbsent,
    Failed,
    /// Another check was already running.
    Busy,
    /// Too soon after the previous effective check.
    Throttled,
    /// Breaker is open; the service was not contacted.
    Suspended,
}

/// Clears the running flag and the loading indicator however the check ends.
struct CheckGuard<'a> {
    core: &'a ControllerCore,
}

impl Drop for CheckGuard<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.core.lock();
            state.check_running = false;
            state.loading = false;
        }
        self.core.check_finished().notify_waiters();
    }
}

/// Queries remote status once. `force` bypasses the spacing rule and is only
/// used by an explicit reconnect.
pub async fn check_status(core: &ControllerCore, force: bool) -> CheckOutcome {
    let spacing = core.settings().min_check_spacing;
    {
        let now = Instant::now();
        let mut state = core.lock();
        if state.check_running {
            return CheckOutcome::Busy;
        }
        if state.refresh_breaker(now) {
            tracing::debug!("status check skipped: display temporarily disabled");
            return CheckOutcome::Suspended;
        }
        if !force {
            if let Some(last) = state.last_effective_check {
                if now.duration_since(last) < spacing {
                    return CheckOutcome::Throttled;
                }
            }
        }
        state.check_running = true;
        state.loading = true;
        state.last_effective_check = Some(now);
        let info = &mut state.connection.diagnostic_info;
        info.connection_attempts = info.connection_attempts.saturating_add(1);
    }
    let _running = CheckGuard { core };

    let result = core.transport().get_status().await;

    let (outcome, run_advisor) = {
        let now = Instant::now();
        let threshold = core.settings().advisor_threshold;
        let mut state = core.lock();
        state.mark_checked();
        match result {
            Ok(status) if status.connected => {
                record_status_details(&mut state.connection.diagnostic_info, &status);
                state.set_connected(true);
                state.apply_success(now);
                state.advisor.record_success();
                state.connection.diagnostic_info.suggestion = None;
                (CheckOutcome::Connected, false)
            }
            Ok(status) => {
                record_status_details(&mut state.connection.diagnostic_info, &status);
                state.apply_success(now);
                state.set_connected(false);
                state.publish_diagnostic(peripheral_absent(None, None), now);
                tracing::info!("display service reachable but no display attached");
                let advise = state.advisor.record_failure(threshold);
                (CheckOutcome::PeripheralAbsent, advise)
            }
            Err(err) => {
                let diagnostic = classify(&RawFailure::from(&err));
                tracing::warn!(kind = %diagnostic.kind, error = %err, "display status check failed");
                state.set_connected(false);
                state.apply_failure(diagnostic, now);
                let advise = state.advisor.record_failure(threshold);
                (CheckOutcome::Failed, advise)
            }
        }
    };

    if run_advisor {
        advisor::advise(core).await;
    }
    outcome
}

fn record_status_details(info: &mut DiagnosticInfo, status: &DisplayStatus) {
    if status.display.is_some() {
        info.display_info = status.display.clone();
    }
    info.session_owner = status.session.as_ref().and_then(|s| s.owner.clone());
}

/// Periodic status task: one delayed initial check, then a fixed interval.
/// Shutdown is signalled through a watch channel; a check that is already
/// running is allowed to finish.
pub struct MonitorHandle {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn spawn(core: Arc<ControllerCore>) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let initial_delay = core.settings().initial_check_delay;
        let period = core.settings().status_interval;

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(initial_delay) => {}
                _ = shutdown_rx.changed() => return,
            }
            check_status(&core, false).await;

            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        check_status(&core, false).await;
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            tracing::debug!("display status monitor stopped");
        });

        Self {
            shutdown_tx,
            task: Some(task),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Signals the task and waits for it to wind down.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "display status monitor ended abnormally");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControllerSettings;
    use crate::model::ErrorKind;
    use crate::testing::{Call, FakeTransport, Outcome};

    fn core_with(fake: Arc<FakeTransport>) -> Arc<ControllerCore> {
        Arc::new(ControllerCore::new(fake, ControllerSettings::default()))
    }

    fn status_calls(fake: &FakeTransport) -> usize {
        fake.count(|c| matches!(c, Call::GetStatus))
    }

    #[tokio::test(start_paused = true)]
    async fn success_marks_connected_and_records_owner() {
        let fake = Arc::new(FakeTransport::new());
        let core = core_with(fake.clone());

        assert_eq!(check_status(&core, false).await, CheckOutcome::Connected);
        let state = core.lock();
        assert!(state.connection.connected);
        assert!(state.connection.last_checked_unix_ms.is_some());
        assert_eq!(
            state.connection.diagnostic_info.session_owner.as_deref(),
            Some("register-1")
        );
        assert!(!state.loading);
        assert!(!state.check_running);
    }

    #[tokio::test(start_paused = true)]
    async fn effective_checks_are_spaced() {
        let fake = Arc::new(FakeTransport::new());
        let core = core_with(fake.clone());

        check_status(&core, false).await;
        assert_eq!(check_status(&core, false).await, CheckOutcome::Throttled);
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(check_status(&core, false).await, CheckOutcome::Throttled);
        assert_eq!(status_calls(&fake), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(check_status(&core, false).await, CheckOutcome::Connected);
        assert_eq!(status_calls(&fake), 2);

        assert_eq!(check_status(&core, true).await, CheckOutcome::Connected);
        assert_eq!(status_calls(&fake), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_checks_are_no_ops() {
        let fake = Arc::new(FakeTransport::new());
        let core = core_with(fake.clone());
        core.lock().check_running = true;

        assert_eq!(check_status(&core, true).await, CheckOutcome::Busy);
        assert_eq!(status_calls(&fake), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_publishes_classified_error() {
        let fake = Arc::new(FakeTransport::new());
        fake.set_status(Outcome::Service(500, "Serial port COM3 busy".to_string()));
        let core = core_with(fake.clone());

        assert_eq!(check_status(&core, false).await, CheckOutcome::Failed);
        let state = core.lock();
        assert!(!state.connection.connected);
        assert_eq!(state.breaker.consecutive_errors(), 1);
        let last = state.connection.diagnostic_info.last_error.as_ref().unwrap();
        assert_eq!(last.kind, ErrorKind::PortError);
        assert_eq!(state.current_error.as_deref(), Some(last.user_message().as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn reported_absent_peripheral_is_not_a_breaker_failure() {
        let fake = Arc::new(FakeTransport::new());
        fake.set_peripheral_connected(false);
        let core = core_with(fake.clone());

        assert_eq!(check_status(&core, false).await, CheckOutcome::PeripheralAbsent);
        let state = core.lock();
        assert!(!state.connection.connected);
        assert_eq!(state.breaker.consecutive_errors(), 0);
        assert_eq!(state.advisor.failed_attempts(), 1);
        assert_eq!(
            state.connection.diagnostic_info.last_error.as_ref().map(|d| d.kind),
            Some(ErrorKind::Disconnected)
        );
        assert!(state.current_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn three_failures_disable_then_recover_after_cool_down() {
        let fake = Arc::new(FakeTransport::new());
        fake.set_status(Outcome::Network);
        let core = core_with(fake.clone());

        for _ in 0..3 {
            assert_eq!(check_status(&core, false).await, CheckOutcome::Failed);
            tokio::time::advance(DEFAULT_MIN_CHECK_SPACING).await;
        }
        assert!(core
            .lock()
            .current_error
            .as_deref()
            .unwrap()
            .contains("temporarily disabled"));

        // Open breaker: no further status traffic.
        assert_eq!(check_status(&core, false).await, CheckOutcome::Suspended);
        assert_eq!(status_calls(&fake), 3);

        tokio::time::advance(Duration::from_secs(20)).await;
        {
            let mut state = core.lock();
            assert!(!state.refresh_breaker(Instant::now()));
            assert!(state.current_error.is_none());
            assert_eq!(state.breaker.consecutive_errors(), 0);
        }

        fake.set_status(Outcome::Ok);
        assert_eq!(check_status(&core, false).await, CheckOutcome::Connected);
        let state = core.lock();
        assert!(state.connection.connected);
        assert!(state.current_error.is_none());
        assert_eq!(state.advisor.failed_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn advisor_runs_on_third_failed_attempt() {
        let fake = Arc::new(FakeTransport::new());
        fake.set_status(Outcome::Service(500, "Display not connected".to_string()));
        fake.set_endpoints(vec![crate::model::EndpointDescriptor {
            path: "COM4".to_string(),
            ..Default::default()
        }]);
        let core = core_with(fake.clone());

        for _ in 0..2 {
            check_status(&core, false).await;
            tokio::time::advance(DEFAULT_MIN_CHECK_SPACING).await;
        }
        assert_eq!(fake.count(|c| matches!(c, Call::ListEndpoints)), 0);

        check_status(&core, false).await;
        assert_eq!(fake.count(|c| matches!(c, Call::ListEndpoints)), 1);
        assert!(!fake.calls().iter().any(|c| matches!(c, Call::Connect(_))));
        let state = core.lock();
        assert_eq!(
            state.connection.diagnostic_info.suggestion.as_deref(),
            Some("Available displays: COM4. Connect one via settings")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_task_checks_after_delay_and_on_interval() {
        let fake = Arc::new(FakeTransport::new());
        let core = core_with(fake.clone());
        let handle = MonitorHandle::spawn(core.clone());

        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert_eq!(status_calls(&fake), 0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(status_calls(&fake), 1);

        tokio::time::sleep(DEFAULT_STATUS_INTERVAL).await;
        assert_eq!(status_calls(&fake), 2);

        assert!(handle.is_running());
        handle.shutdown().await;
        tokio::time::sleep(DEFAULT_STATUS_INTERVAL * 2).await;
        assert_eq!(status_calls(&fake), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_before_initial_delay_skips_the_first_check() {
        let fake = Arc::new(FakeTransport::new());
        let core = core_with(fake.clone());
        let handle = MonitorHandle::spawn(core);

        handle.shutdown().await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(status_calls(&fake), 0);
    }
}
