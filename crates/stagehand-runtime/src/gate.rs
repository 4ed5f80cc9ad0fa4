//! Blocks a unit's start until its dependencies are ready.

use std::time::Duration;

use futures::future::select_all;
use serde::Serialize;
use stagehand_core::health::HealthStatus;
use stagehand_core::unit::UnitPhase;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::status::{PhaseState, StatusBoard};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GateOutcome {
    /// Every dependency was ready at the same moment.
    Ready,
    /// The deadline passed; `pending` lists dependencies not yet ready.
    TimedOut { pending: Vec<String> },
    /// Shutdown was requested while waiting.
    Cancelled,
    /// `dependency` can never become ready; `root_cause` is the unit whose
    /// failure started the chain.
    DependencyFailed {
        dependency: String,
        root_cause: String,
    },
}

struct Watched {
    name: String,
    health: watch::Receiver<HealthStatus>,
    phase: watch::Receiver<PhaseState>,
    /// False once the unit's writer is gone; its values are then final.
    open: bool,
}

enum Verdict {
    Ready,
    Pending(Vec<String>),
    Failed { dependency: String, root_cause: String },
}

impl Watched {
    async fn changed(&mut self) -> bool {
        tokio::select! {
            r = self.health.changed() => r.is_ok(),
            r = self.phase.changed() => r.is_ok(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DependencyGate {
    board: StatusBoard,
}

impl DependencyGate {
    pub fn new(board: StatusBoard) -> Self {
        Self { board }
    }

    /// Wait until every unit in `dependencies` is ready, bounded by `timeout`.
    ///
    /// A dependency is ready when its health is Healthy or it has Completed.
    /// A dependency that Failed, was Skipped or Stopped resolves the wait at
    /// once with [`GateOutcome::DependencyFailed`].
    pub async fn await_ready(
        &self,
        dependencies: &[String],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> GateOutcome {
        let mut watched = Vec::with_capacity(dependencies.len());
        for name in dependencies {
            match (self.board.health(name), self.board.phase(name)) {
                (Some(health), Some(phase)) => watched.push(Watched {
                    name: name.clone(),
                    health,
                    phase,
                    open: true,
                }),
                _ => {
                    return GateOutcome::DependencyFailed {
                        dependency: name.clone(),
                        root_cause: name.clone(),
                    }
                }
            }
        }

        let deadline = Instant::now() + timeout;
        loop {
            if cancel.is_cancelled() {
                return GateOutcome::Cancelled;
            }
            let pending = match evaluate(&mut watched) {
                Verdict::Ready => return GateOutcome::Ready,
                Verdict::Failed {
                    dependency,
                    root_cause,
                } => {
                    return GateOutcome::DependencyFailed {
                        dependency,
                        root_cause,
                    }
                }
                Verdict::Pending(pending) => pending,
            };

            let closed = {
                let waits: Vec<_> = watched
                    .iter_mut()
                    .enumerate()
                    .filter(|(_, w)| w.open)
                    .map(|(i, w)| Box::pin(async move { (i, w.changed().await) }))
                    .collect();
                let any_change = async move {
                    if waits.is_empty() {
                        std::future::pending::<(usize, bool)>().await
                    } else {
                        select_all(waits).await.0
                    }
                };

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return GateOutcome::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => {
                        return GateOutcome::TimedOut { pending };
                    }
                    (i, open) = any_change => (!open).then_some(i),
                }
            };
            if let Some(i) = closed {
                watched[i].open = false;
            }
        }
    }
}

fn evaluate(watched: &mut [Watched]) -> Verdict {
    let mut pending = Vec::new();
    for w in watched.iter_mut() {
        let phase = w.phase.borrow_and_update().clone();
        if phase.phase.blocks_dependents() {
            return Verdict::Failed {
                dependency: w.name.clone(),
                root_cause: phase.root_cause.unwrap_or_else(|| w.name.clone()),
            };
        }
        let healthy = w.health.borrow_and_update().is_healthy();
        if !(healthy || phase.phase == UnitPhase::Completed) {
            pending.push(w.name.clone());
        }
    }
    if pending.is_empty() {
        Verdict::Ready
    } else {
        Verdict::Pending(pending)
    }
}
