use crate::advisor;
use crate::breaker::{DEFAULT_COOLDOWN, DEFAULT_FAILURE_THRESHOLD};
use crate::client::{DisplayServiceError, DisplayTransport};
use crate::config::Config;
use crate::dispatcher;
use crate::model::{ControllerSnapshot, DiagnosticInfo, EndpointDescriptor, Operation};
use crate::monitor::{
    self, CheckOutcome, MonitorHandle, DEFAULT_INITIAL_CHECK_DELAY, DEFAULT_MIN_CHECK_SPACING,
    DEFAULT_STATUS_INTERVAL,
};
use crate::state::ControllerCore;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::{Duration, Instant};

pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_millis(500);
pub const DEFAULT_LINE_WIDTH: usize = 20;

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub dedup_window: Duration,
    pub status_interval: Duration,
    pub initial_check_delay: Duration,
    pub min_check_spacing: Duration,
    pub advisor_threshold: u32,
    pub line_width: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
            dedup_window: DEFAULT_DEDUP_WINDOW,
            status_interval: DEFAULT_STATUS_INTERVAL,
            initial_check_delay: DEFAULT_INITIAL_CHECK_DELAY,
            min_check_spacing: DEFAULT_MIN_CHECK_SPACING,
            advisor_threshold: advisor::DEFAULT_ADVISOR_THRESHOLD,
            line_width: DEFAULT_LINE_WIDTH,
        }
    }
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        let r = &config.resilience;
        Self {
            failure_threshold: r.failure_threshold,
            cooldown: Duration::from_secs(r.cooldown_secs),
            dedup_window: Duration::from_millis(r.dedup_window_ms),
            status_interval: Duration::from_secs(r.status_interval_secs),
            initial_check_delay: Duration::from_secs(r.initial_check_delay_secs),
            min_check_spacing: Duration::from_secs(r.min_check_spacing_secs),
            advisor_threshold: r.advisor_threshold,
            line_width: config.display.line_width,
        }
    }
}

/// One controller per session/display pairing. Cloning is cheap and every
/// clone drives the same state, so fire-and-forget callers can
/// `tokio::spawn` a clone.
///
/// No action ever returns an error: failures land in `current_error()` and
/// `diagnostic_info()`, and the boolean reports whether the display was
/// actually updated.
#[derive(Clone)]
pub struct DisplayController {
    core: Arc<ControllerCore>,
    monitor: Arc<Mutex<Option<MonitorHandle>>>,
}

impl DisplayController {
    pub fn new(transport: Arc<dyn DisplayTransport>, settings: ControllerSettings) -> Self {
        Self {
            core: Arc::new(ControllerCore::new(transport, settings)),
            monitor: Arc::new(Mutex::new(None)),
        }
    }

    /// Starts periodic status polling. Calling it again is a no-op while the
    /// previous task is alive.
    pub fn start_monitor(&self) {
        let mut slot = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().map(MonitorHandle::is_running).unwrap_or(false) {
            return;
        }
        *slot = Some(MonitorHandle::spawn(self.core.clone()));
        tracing::debug!("display status monitor started");
    }

    /// Stops periodic polling. In-flight display operations are not cancelled.
    pub async fn shutdown(&self) {
        let handle = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }

    pub fn connected(&self) -> bool {
        self.core.lock().connection.connected
    }

    pub fn current_error(&self) -> Option<String> {
        let mut state = self.core.lock();
        state.refresh_breaker(Instant::now());
        state.current_error.clone()
    }

    pub fn loading(&self) -> bool {
        self.core.lock().loading
    }

    pub fn diagnostic_info(&self) -> DiagnosticInfo {
        self.snapshot().diagnostic_info
    }

    pub fn is_temporarily_disabled(&self) -> bool {
        self.core.lock().refresh_breaker(Instant::now())
    }

    pub fn consecutive_error_count(&self) -> u32 {
        let mut state = self.core.lock();
        state.refresh_breaker(Instant::now());
        state.breaker.consecutive_errors()
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        self.core.lock().snapshot(Instant::now())
    }

    pub async fn display_welcome(&self) -> bool {
        let transport = self.core.transport();
        dispatcher::execute(&self.core, Operation::Welcome, String::new(), || {
            transport.show_welcome()
        })
        .await
    }

    pub async fn display_thank_you(&self) -> bool {
        let transport = self.core.transport();
        dispatcher::execute(&self.core, Operation::ThankYou, String::new(), || {
            transport.show_thank_you()
        })
        .await
    }

    pub async fn display_item_added(&self, name: &str, quantity: u32, unit_price: f64) -> bool {
        let (line1, line2) = item_added_lines(name, quantity, unit_price, self.line_width());
        let fingerprint = format!("{}:{}:{:.2}", line1, quantity, unit_price);
        self.write(Operation::ItemAdded, fingerprint, line1, line2).await
    }

    /// Running cart summary. This is the only deduplicated operation: an
    /// identical count and rounded total inside the dedup window is dropped.
    pub async fn display_summary(&self, item_count: u32, total: f64) -> bool {
        let (line1, line2) = summary_lines(item_count, total, self.line_width());
        let fingerprint = format!("{}:{:.2}", item_count, total);
        self.write(Operation::Summary, fingerprint, line1, line2).await
    }

    pub async fn display_price(&self, item: &str, price: f64) -> bool {
        let item = truncate_chars(item.trim(), self.line_width());
        let fingerprint = format!("{}:{:.2}", item, price);
        let transport = self.core.transport();
        dispatcher::execute(&self.core, Operation::Price, fingerprint, || {
            transport.show_price(&item, price)
        })
        .await
    }

    pub async fn display_total(&self, total: f64) -> bool {
        let transport = self.core.transport();
        dispatcher::execute(&self.core, Operation::Total, format!("{:.2}", total), || {
            transport.show_total(total)
        })
        .await
    }

    pub async fn display_error(&self, message: &str) -> bool {
        let message = truncate_chars(message.trim(), self.line_width() * 2);
        let transport = self.core.transport();
        dispatcher::execute(&self.core, Operation::Error, message.clone(), || {
            transport.show_error(&message)
        })
        .await
    }

    /// Generic two-line write; each line is cut to the display width.
    pub async fn write_lines(&self, line1: &str, line2: &str) -> bool {
        let width = self.line_width();
        let line1 = truncate_chars(line1, width);
        let line2 = truncate_chars(line2, width);
        let fingerprint = format!("{}|{}", line1, line2);
        self.write(Operation::Write, fingerprint, line1, line2).await
    }

    pub async fn clear(&self) -> bool {
        let transport = self.core.transport();
        dispatcher::execute(&self.core, Operation::Clear, String::new(), || {
            transport.clear_display()
        })
        .await
    }

    pub async fn check_status(&self) -> CheckOutcome {
        monitor::check_status(&self.core, false).await
    }

    /// Full state reset followed by an immediate status check that ignores
    /// the spacing rule. A check already in flight is allowed to land first,
    /// so its result cannot overwrite the reset state.
    pub async fn reconnect(&self) -> CheckOutcome {
        loop {
            self.core.wait_for_idle_check().await;
            self.core.lock().reset();
            tracing::info!("display controller reset; reconnecting");
            match monitor::check_status(&self.core, true).await {
                // A periodic check slipped in between; wait it out and retry.
                CheckOutcome::Busy => continue,
                outcome => return outcome,
            }
        }
    }

    /// Operator override: closes the breaker regardless of the cool-down.
    pub fn reset_circuit_breaker(&self) {
        let mut state = self.core.lock();
        state.breaker.reset();
        state.refresh_breaker(Instant::now());
        tracing::info!("display circuit breaker reset by operator");
    }

    /// On-demand endpoint discovery. Never connects.
    pub async fn available_endpoints(&self) -> Result<Vec<EndpointDescriptor>, DisplayServiceError> {
        advisor::discover(&self.core).await
    }

    async fn write(&self, op: Operation, fingerprint: String, line1: String, line2: String) -> bool {
        let transport = self.core.transport();
        dispatcher::execute(&self.core, op, fingerprint, || {
            transport.write_message(&line1, &line2)
        })
        .await
    }

    fn line_width(&self) -> usize {
        self.core.settings().line_width
    }
}

pub fn truncate_chars(text: &str, width: usize) -> String {
    text.chars().take(width).collect()
}

pub fn item_added_lines(name: &str, quantity: u32, unit_price: f64, width: usize) -> (String, String) {
    let line1 = truncate_chars(name.trim(), width);
    let detail = truncate_chars(&format!("{}x {:.2}", quantity, unit_price), width);
    (line1, format!("{:>width$}", detail, width = width))
}

pub fn summary_lines(item_count: u32, total: f64, width: usize) -> (String, String) {
    (
        truncate_chars(&format!("Items: {}", item_count), width),
        truncate_chars(&format!("Total: {:.2}", total), width),
    )
}
