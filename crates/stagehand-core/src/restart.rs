//! Restart decisions for exited service processes.

use std::time::Duration;

use serde::Serialize;

use crate::config::RestartPolicy;

/// Exponential backoff between restarts, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl Backoff {
    /// Delay before restart `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exp);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }
}

/// What the supervisor does after its process exits.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RestartDecision {
    /// Wait `delay`, then re-enter the dependency gate.
    Restart { attempt: u32, delay: Duration },
    /// Exit was clean and the policy does not restart on success.
    Complete,
    /// Exit was a failure and no restart follows.
    Fail { reason: String },
}

/// Per-unit restart bookkeeping.
#[derive(Debug, Clone)]
pub struct RestartTracker {
    policy: RestartPolicy,
    max_restarts: Option<u32>,
    backoff: Backoff,
    /// A run lasting at least this long resets the backoff.
    min_uptime: Duration,
    restarts: u32,
    attempt: u32,
}

impl RestartTracker {
    pub fn new(policy: RestartPolicy, max_restarts: Option<u32>) -> Self {
        Self {
            policy,
            max_restarts,
            backoff: Backoff::default(),
            min_uptime: Duration::from_secs(30),
            restarts: 0,
            attempt: 0,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_min_uptime(mut self, min_uptime: Duration) -> Self {
        self.min_uptime = min_uptime;
        self
    }

    /// Total restarts granted so far.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Decide after an exit. `success` is a zero exit status; `uptime` is how
    /// long the process ran.
    pub fn on_exit(&mut self, success: bool, uptime: Duration) -> RestartDecision {
        if uptime >= self.min_uptime {
            self.attempt = 0;
        }

        let restart = match self.policy {
            RestartPolicy::Never => false,
            RestartPolicy::OnFailure => !success,
            RestartPolicy::Always => true,
        };

        if !restart {
            return if success {
                RestartDecision::Complete
            } else {
                RestartDecision::Fail {
                    reason: "process exited with failure".into(),
                }
            };
        }

        if self.policy == RestartPolicy::OnFailure {
            if let Some(max) = self.max_restarts {
                if self.restarts >= max {
                    return RestartDecision::Fail {
                        reason: format!("gave up after {max} restarts"),
                    };
                }
            }
        }

        self.restarts += 1;
        self.attempt += 1;
        RestartDecision::Restart {
            attempt: self.restarts,
            delay: self.backoff.delay_for_attempt(self.attempt),
        }
    }
}
