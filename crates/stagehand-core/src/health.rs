//! Health status and the pure state machine that turns probe results into it.
//!
//! [`ProbeTracker`] holds no clock of its own: callers pass the elapsed time
//! since the unit started, which keeps the start-period rules testable without
//! sleeping.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// No successful check yet, or the start period lapsed without one.
    #[default]
    Unknown,
    /// Inside the start period and not yet healthy.
    Starting,
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Starting => "starting",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
        }
    }

    pub fn is_healthy(&self) -> bool {
        *self == Self::Healthy
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResult {
    Pass,
    Fail(String),
}

impl CheckResult {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

#[derive(Debug, Clone)]
pub struct ProbeTracker {
    retries: u32,
    start_period: Duration,
    status: HealthStatus,
    consecutive_failures: u32,
    ever_healthy: bool,
    last_error: Option<String>,
}

impl ProbeTracker {
    pub fn new(retries: u32, start_period: Duration) -> Self {
        Self {
            retries: retries.max(1),
            start_period,
            status: HealthStatus::Unknown,
            consecutive_failures: 0,
            ever_healthy: false,
            last_error: None,
        }
    }

    /// The unit's process has started; the start period begins.
    pub fn begin(&mut self) -> HealthStatus {
        self.status = if self.start_period.is_zero() {
            HealthStatus::Unknown
        } else {
            HealthStatus::Starting
        };
        self.consecutive_failures = 0;
        self.ever_healthy = false;
        self.last_error = None;
        self.status
    }

    /// Fold one check result in. `elapsed` is the time since [`begin`](Self::begin).
    pub fn record(&mut self, result: CheckResult, elapsed: Duration) -> HealthStatus {
        let in_grace = elapsed < self.start_period && !self.ever_healthy;
        match result {
            CheckResult::Pass => {
                self.consecutive_failures = 0;
                self.ever_healthy = true;
                self.last_error = None;
                self.status = HealthStatus::Healthy;
            }
            CheckResult::Fail(reason) => {
                self.last_error = Some(reason);
                if in_grace {
                    return self.status;
                }
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.retries {
                    self.status = HealthStatus::Unhealthy;
                } else if self.status == HealthStatus::Starting {
                    // Start period over with no success yet.
                    self.status = HealthStatus::Unknown;
                }
            }
        }
        self.status
    }

    /// Re-evaluate without a new result, e.g. when the start period ends
    /// between checks.
    pub fn tick(&mut self, elapsed: Duration) -> HealthStatus {
        if self.status == HealthStatus::Starting && elapsed >= self.start_period {
            self.status = HealthStatus::Unknown;
        }
        self.status
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail() -> CheckResult {
        CheckResult::Fail("connection refused".into())
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn unknown_before_first_check() {
        let t = ProbeTracker::new(3, secs(0));
        assert_eq!(t.status(), HealthStatus::Unknown);
    }

    #[test]
    fn begin_enters_starting_during_grace() {
        let mut t = ProbeTracker::new(3, secs(30));
        assert_eq!(t.begin(), HealthStatus::Starting);
    }

    #[test]
    fn single_failure_does_not_flip_healthy() {
        let mut t = ProbeTracker::new(3, secs(0));
        t.begin();
        assert_eq!(t.record(CheckResult::Pass, secs(1)), HealthStatus::Healthy);
        assert_eq!(t.record(fail(), secs(2)), HealthStatus::Healthy);
        assert_eq!(t.record(fail(), secs(3)), HealthStatus::Healthy);
        assert_eq!(t.record(fail(), secs(4)), HealthStatus::Unhealthy);
        assert_eq!(t.consecutive_failures(), 3);
    }

    #[test]
    fn success_resets_failure_count() {
        let mut t = ProbeTracker::new(2, secs(0));
        t.begin();
        t.record(fail(), secs(1));
        t.record(CheckResult::Pass, secs(2));
        assert_eq!(t.record(fail(), secs(3)), HealthStatus::Healthy);
        assert_eq!(t.consecutive_failures(), 1);
    }

    #[test]
    fn failures_inside_start_period_do_not_count() {
        let mut t = ProbeTracker::new(1, secs(30));
        t.begin();
        for i in 0..10 {
            assert_eq!(t.record(fail(), secs(i)), HealthStatus::Starting);
        }
        assert_eq!(t.consecutive_failures(), 0);
        assert_eq!(t.last_error(), Some("connection refused"));
    }

    #[test]
    fn grace_expiry_without_success_is_unknown() {
        let mut t = ProbeTracker::new(3, secs(10));
        t.begin();
        assert_eq!(t.tick(secs(5)), HealthStatus::Starting);
        assert_eq!(t.tick(secs(10)), HealthStatus::Unknown);
    }

    #[test]
    fn first_failure_after_grace_is_unknown_then_unhealthy() {
        let mut t = ProbeTracker::new(2, secs(10));
        t.begin();
        assert_eq!(t.record(fail(), secs(11)), HealthStatus::Unknown);
        assert_eq!(t.record(fail(), secs(12)), HealthStatus::Unhealthy);
    }

    #[test]
    fn success_during_grace_ends_grace() {
        let mut t = ProbeTracker::new(1, secs(60));
        t.begin();
        t.record(CheckResult::Pass, secs(5));
        assert_eq!(t.record(fail(), secs(6)), HealthStatus::Unhealthy);
    }

    #[test]
    fn recovers_from_unhealthy() {
        let mut t = ProbeTracker::new(1, secs(0));
        t.begin();
        assert_eq!(t.record(fail(), secs(1)), HealthStatus::Unhealthy);
        assert_eq!(t.record(CheckResult::Pass, secs(2)), HealthStatus::Healthy);
    }

    #[test]
    fn zero_retries_is_treated_as_one() {
        let mut t = ProbeTracker::new(0, secs(0));
        t.begin();
        assert_eq!(t.record(fail(), secs(1)), HealthStatus::Unhealthy);
    }
}
