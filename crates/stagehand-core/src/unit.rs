//! Unit lifecycle phases and the events published on every transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::UnitKind;
use crate::health::HealthStatus;

/// Lifecycle of one unit. Written only by that unit's supervisor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitPhase {
    #[default]
    Queued,
    /// Blocked on the dependency gate.
    Waiting,
    Starting,
    Running,
    /// Init unit finished, or a service exited cleanly with no restart.
    Completed,
    Failed,
    /// Never started because a dependency failed or was skipped.
    Skipped,
    /// Stopped by shutdown.
    Stopped,
}

impl UnitPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Waiting => "waiting",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Stopped => "stopped",
        }
    }

    /// No further transitions follow.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Skipped | Self::Stopped
        )
    }

    /// Dependents waiting on a unit in this phase can never become ready.
    pub fn blocks_dependents(&self) -> bool {
        matches!(self, Self::Failed | Self::Skipped | Self::Stopped)
    }
}

impl fmt::Display for UnitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitEvent {
    pub unit: String,
    pub phase: UnitPhase,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl UnitEvent {
    pub fn new(unit: impl Into<String>, phase: UnitPhase, detail: Option<String>) -> Self {
        Self {
            unit: unit.into(),
            phase,
            at: Utc::now(),
            detail,
        }
    }
}

/// Point-in-time view of one unit, as served by the status API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSnapshot {
    pub name: String,
    pub kind: UnitKind,
    pub phase: UnitPhase,
    pub health: HealthStatus,
    pub restarts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub depends_on: Vec<String>,
    pub since: DateTime<Utc>,
}

impl UnitSnapshot {
    /// Counts toward overall deployment health.
    pub fn is_settled_ok(&self) -> bool {
        match self.phase {
            UnitPhase::Completed => true,
            UnitPhase::Running => self.health.is_healthy(),
            _ => false,
        }
    }
}
