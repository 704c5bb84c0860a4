//! Consecutive-failure circuit breaker shared by every display operation.
//!
//! CLOSED -> OPEN after `threshold` consecutive failures. OPEN -> CLOSED only
//! when the cool-down elapses or on `reset()`. A success recorded while open
//! zeroes the counter but leaves the breaker open.

use tokio::time::{Duration, Instant};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    consecutive_errors: u32,
    disabled_until: Option<Instant>,
    threshold: u32,
    cooldown: Duration,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_COOLDOWN)
    }
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            consecutive_errors: 0,
            disabled_until: None,
            threshold: threshold.max(1),
            cooldown,
        }
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn disabled_until(&self) -> Option<Instant> {
        self.disabled_until
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
    }

    /// Returns `true` when this failure is the one that opened the breaker.
    pub fn record_failure(&mut self) -> bool {
        self.record_failure_at(Instant::now())
    }

    pub fn record_failure_at(&mut self, now: Instant) -> bool {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        if self.consecutive_errors >= self.threshold && self.disabled_until.is_none() {
            self.disabled_until = Some(now + self.cooldown);
            tracing::warn!(
                consecutive_errors = self.consecutive_errors,
                cooldown_secs = self.cooldown.as_secs(),
                "display temporarily disabled"
            );
            return true;
        }
        false
    }

    pub fn is_open(&mut self) -> bool {
        self.is_open_at(Instant::now())
    }

    /// Expired cool-downs close the breaker as a side effect.
    pub fn is_open_at(&mut self, now: Instant) -> bool {
        match self.disabled_until {
            Some(until) if now < until => true,
            Some(_) => {
                self.disabled_until = None;
                self.consecutive_errors = 0;
                tracing::info!("display circuit breaker closed after cool-down");
                false
            }
            None => false,
        }
    }

    pub fn remaining_at(&self, now: Instant) -> Option<Duration> {
        self.disabled_until
            .and_then(|until| until.checked_duration_since(now))
            .filter(|d| !d.is_zero())
    }

    pub fn reset(&mut self) {
        self.consecutive_errors = 0;
        self.disabled_until = None;
    }

    pub fn disabled_message(&self) -> String {
        format!(
            "Display temporarily disabled after {} consecutive errors. Retrying in {}s",
            self.threshold,
            self.cooldown.as_secs()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_exactly_on_third_consecutive_failure() {
        let mut breaker = CircuitBreaker::default();
        let now = Instant::now();

        assert!(!breaker.record_failure_at(now));
        assert!(!breaker.is_open_at(now));
        assert!(!breaker.record_failure_at(now));
        assert!(!breaker.is_open_at(now));
        assert!(breaker.record_failure_at(now));
        assert!(breaker.is_open_at(now));
        assert_eq!(breaker.disabled_until(), Some(now + DEFAULT_COOLDOWN));
    }

    #[test]
    fn further_failures_do_not_extend_the_window() {
        let mut breaker = CircuitBreaker::default();
        let start = Instant::now();
        for _ in 0..3 {
            breaker.record_failure_at(start);
        }
        let later = start + Duration::from_secs(5);
        assert!(!breaker.record_failure_at(later));
        assert_eq!(breaker.disabled_until(), Some(start + DEFAULT_COOLDOWN));
        assert_eq!(breaker.consecutive_errors(), 4);
    }

    #[test]
    fn success_resets_count_between_failures() {
        let mut breaker = CircuitBreaker::default();
        let now = Instant::now();
        breaker.record_failure_at(now);
        breaker.record_failure_at(now);
        breaker.record_success();
        assert_eq!(breaker.consecutive_errors(), 0);
        assert!(!breaker.record_failure_at(now));
        assert!(!breaker.record_failure_at(now));
        assert!(!breaker.is_open_at(now));
    }

    #[test]
    fn success_while_open_does_not_close_early() {
        let mut breaker = CircuitBreaker::default();
        let now = Instant::now();
        for _ in 0..3 {
            breaker.record_failure_at(now);
        }
        breaker.record_success();
        assert_eq!(breaker.consecutive_errors(), 0);
        assert!(breaker.is_open_at(now + Duration::from_secs(1)));
    }

    #[test]
    fn stays_open_for_whole_window_then_auto_closes() {
        let mut breaker = CircuitBreaker::default();
        let start = Instant::now();
        for _ in 0..3 {
            breaker.record_failure_at(start);
        }

        assert!(breaker.is_open_at(start + Duration::from_millis(19_999)));
        assert_eq!(breaker.consecutive_errors(), 3);

        assert!(!breaker.is_open_at(start + DEFAULT_COOLDOWN));
        assert_eq!(breaker.consecutive_errors(), 0);
        assert!(breaker.disabled_until().is_none());
    }

    #[test]
    fn reset_closes_immediately() {
        let mut breaker = CircuitBreaker::default();
        let now = Instant::now();
        for _ in 0..3 {
            breaker.record_failure_at(now);
        }
        breaker.reset();
        assert!(!breaker.is_open_at(now));
        assert_eq!(breaker.consecutive_errors(), 0);
    }

    #[test]
    fn remaining_reports_time_left_in_window() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(10));
        let now = Instant::now();
        assert!(breaker.remaining_at(now).is_none());
        breaker.record_failure_at(now);
        assert_eq!(
            breaker.remaining_at(now + Duration::from_secs(4)),
            Some(Duration::from_secs(6))
        );
        assert!(breaker.remaining_at(now + Duration::from_secs(10)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn wall_clock_methods_follow_tokio_time() {
        let mut breaker = CircuitBreaker::default();
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert!(breaker.is_open());
        tokio::time::advance(Duration::from_secs(19)).await;
        assert!(breaker.is_open());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!breaker.is_open());
        assert_eq!(breaker.consecutive_errors(), 0);
    }
}
