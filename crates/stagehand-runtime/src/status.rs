//! Shared view of every unit's health and phase.
//!
//! Each unit gets one [`UnitWriter`] holding the only senders for its health
//! and phase channels; everyone else reads through the cloneable
//! [`StatusBoard`]. The single-writer rule is enforced by ownership.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use stagehand_core::config::{UnitConfig, UnitKind};
use stagehand_core::health::HealthStatus;
use stagehand_core::unit::{UnitEvent, UnitPhase, UnitSnapshot};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::events::EventBus;

/// Latest phase of one unit plus the bookkeeping shown in snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseState {
    pub phase: UnitPhase,
    pub detail: Option<String>,
    /// For Failed and Skipped: the unit whose failure caused this.
    pub root_cause: Option<String>,
    pub since: DateTime<Utc>,
    pub restarts: u32,
    pub pid: Option<u32>,
}

impl Default for PhaseState {
    fn default() -> Self {
        Self {
            phase: UnitPhase::Queued,
            detail: None,
            root_cause: None,
            since: Utc::now(),
            restarts: 0,
            pid: None,
        }
    }
}

// ---------------------------------------------------------------------------
// UnitWriter
// ---------------------------------------------------------------------------

pub struct UnitWriter {
    name: String,
    health: watch::Sender<HealthStatus>,
    phase: watch::Sender<PhaseState>,
    events: EventBus,
}

impl UnitWriter {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publish a health change. Returns whether the value changed.
    pub fn set_health(&self, status: HealthStatus) -> bool {
        let changed = self.health.send_if_modified(|h| {
            if *h == status {
                return false;
            }
            *h = status;
            true
        });
        if changed {
            match status {
                HealthStatus::Unhealthy => warn!(unit = %self.name, status = %status, "health changed"),
                _ => info!(unit = %self.name, status = %status, "health changed"),
            }
        }
        changed
    }

    /// Move to `phase` and publish a [`UnitEvent`].
    pub fn transition(&self, phase: UnitPhase, detail: Option<String>) {
        self.update(phase, detail, None);
    }

    pub fn fail(&self, detail: impl Into<String>) {
        let root = self.name.clone();
        self.update(UnitPhase::Failed, Some(detail.into()), Some(root));
    }

    /// Skip because `root_cause` failed somewhere upstream.
    pub fn skip(&self, root_cause: &str, detail: impl Into<String>) {
        self.update(
            UnitPhase::Skipped,
            Some(detail.into()),
            Some(root_cause.to_string()),
        );
    }

    pub fn set_pid(&self, pid: Option<u32>) {
        self.phase.send_modify(|p| p.pid = pid);
    }

    pub fn record_restart(&self) -> u32 {
        let mut count = 0;
        self.phase.send_modify(|p| {
            p.restarts += 1;
            count = p.restarts;
        });
        count
    }

    fn update(&self, phase: UnitPhase, detail: Option<String>, root_cause: Option<String>) {
        self.phase.send_modify(|p| {
            p.phase = phase;
            p.detail = detail.clone();
            p.root_cause = root_cause;
            p.since = Utc::now();
            if phase.is_terminal() {
                p.pid = None;
            }
        });
        self.events
            .publish(UnitEvent::new(self.name.clone(), phase, detail));
    }
}

// ---------------------------------------------------------------------------
// StatusBoard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct BoardEntry {
    name: String,
    kind: UnitKind,
    depends_on: Vec<String>,
    health: watch::Receiver<HealthStatus>,
    phase: watch::Receiver<PhaseState>,
}

/// Read side of every unit's channels, in declaration order.
#[derive(Debug, Clone)]
pub struct StatusBoard {
    entries: Arc<Vec<BoardEntry>>,
}

impl StatusBoard {
    /// Create channels for `units`, returning the board and one writer per unit.
    pub fn new<'a, I>(units: I, events: &EventBus) -> (Self, HashMap<String, UnitWriter>)
    where
        I: IntoIterator<Item = &'a UnitConfig>,
    {
        let mut entries = Vec::new();
        let mut writers = HashMap::new();
        for unit in units {
            let (health_tx, health_rx) = watch::channel(HealthStatus::Unknown);
            let (phase_tx, phase_rx) = watch::channel(PhaseState::default());
            entries.push(BoardEntry {
                name: unit.name.clone(),
                kind: unit.kind,
                depends_on: unit.depends_on.clone(),
                health: health_rx,
                phase: phase_rx,
            });
            writers.insert(
                unit.name.clone(),
                UnitWriter {
                    name: unit.name.clone(),
                    health: health_tx,
                    phase: phase_tx,
                    events: events.clone(),
                },
            );
        }
        (
            Self {
                entries: Arc::new(entries),
            },
            writers,
        )
    }

    fn entry(&self, name: &str) -> Option<&BoardEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn health(&self, name: &str) -> Option<watch::Receiver<HealthStatus>> {
        self.entry(name).map(|e| e.health.clone())
    }

    pub fn phase(&self, name: &str) -> Option<watch::Receiver<PhaseState>> {
        self.entry(name).map(|e| e.phase.clone())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn unit_snapshot(&self, name: &str) -> Option<UnitSnapshot> {
        self.entry(name).map(snapshot_of)
    }

    pub fn snapshot(&self) -> Vec<UnitSnapshot> {
        self.entries.iter().map(snapshot_of).collect()
    }

    /// Every unit is Completed, or Running and Healthy.
    pub fn all_settled_ok(&self) -> bool {
        self.snapshot().iter().all(|s| s.is_settled_ok())
    }

    pub fn all_terminal(&self) -> bool {
        self.entries
            .iter()
            .all(|e| e.phase.borrow().phase.is_terminal())
    }
}

fn snapshot_of(e: &BoardEntry) -> UnitSnapshot {
    let phase = e.phase.borrow().clone();
    UnitSnapshot {
        name: e.name.clone(),
        kind: e.kind,
        phase: phase.phase,
        health: *e.health.borrow(),
        restarts: phase.restarts,
        pid: phase.pid,
        detail: phase.detail,
        depends_on: e.depends_on.clone(),
        since: phase.since,
    }
}
