//! Drives a resolved deployment: one supervisor per unit, started in
//! dependency order, stopped in reverse.
//!
//! ```text
//! Deployment ──► Orchestrator::start
//!                  │  StatusBoard + one UnitWriter per unit
//!                  │  spawn Supervisor tasks in topological order
//!                  ▼
//!              OrchestratorHandle ──► StatusHandle (status API, CLI)
//!                  │
//!                  └─ shutdown(): cancel gates, then stop units in reverse order
//! ```

use std::sync::Arc;
use std::time::Duration;

use stagehand_core::config::UnitKind;
use stagehand_core::deployment::Deployment;
use stagehand_core::marker::{marker_key, MarkerStore};
use stagehand_core::restart::Backoff;
use stagehand_core::toggles::FeatureToggleSet;
use stagehand_core::unit::UnitSnapshot;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::events::EventBus;
use crate::gate::DependencyGate;
use crate::initializer::OnceInitializer;
use crate::status::StatusBoard;
use crate::supervisor::{Supervisor, SupervisorTokens};

/// Extra time past a unit's stop grace before its supervisor is aborted.
const STOP_SLACK: Duration = Duration::from_secs(5);

/// Read-only view shared with the status API.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    pub deployment: String,
    pub instance: String,
    pub board: StatusBoard,
    pub events: EventBus,
    pub toggles: Arc<FeatureToggleSet>,
}

impl StatusHandle {
    pub fn snapshot(&self) -> Vec<UnitSnapshot> {
        self.board.snapshot()
    }

    pub fn is_healthy(&self) -> bool {
        self.board.all_settled_ok()
    }
}

pub struct Orchestrator {
    deployment: Deployment,
    store: Arc<dyn MarkerStore>,
    events: EventBus,
    backoff: Backoff,
    init_poll: Option<Duration>,
}

impl Orchestrator {
    pub fn new(deployment: Deployment, store: Arc<dyn MarkerStore>) -> Self {
        Self {
            deployment,
            store,
            events: EventBus::default(),
            backoff: Backoff::default(),
            init_poll: None,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// How often a waiting initializer re-checks a busy lease.
    pub fn with_init_poll(mut self, interval: Duration) -> Self {
        self.init_poll = Some(interval);
        self
    }

    /// Spawn every supervisor and return immediately.
    pub fn start(self) -> OrchestratorHandle {
        let Self {
            deployment,
            store,
            events,
            backoff,
            init_poll,
        } = self;

        let (board, mut writers) =
            StatusBoard::new(deployment.units.iter().map(|u| &u.config), &events);
        let gate = DependencyGate::new(board.clone());
        let shutdown = CancellationToken::new();

        info!(
            deployment = %deployment.name,
            instance = %deployment.instance,
            units = deployment.units.len(),
            toggles = ?deployment.toggles.enabled_names(),
            "starting deployment"
        );

        let mut units = Vec::with_capacity(deployment.units.len());
        for unit in deployment.ordered_units() {
            let name = unit.name().to_string();
            let Some(writer) = writers.remove(&name) else {
                continue;
            };
            let tokens = SupervisorTokens {
                shutdown: shutdown.clone(),
                stop: CancellationToken::new(),
            };
            let mut supervisor =
                Supervisor::new(unit.clone(), writer, gate.clone(), tokens.clone())
                    .with_backoff(backoff.clone());
            if unit.config.kind == UnitKind::Init {
                let mut init = OnceInitializer::new(
                    Arc::clone(&store),
                    marker_key(&deployment.instance, &name),
                    &deployment.marker,
                );
                if let Some(poll) = init_poll {
                    init = init.with_poll_interval(poll);
                }
                supervisor = supervisor.with_initializer(Arc::new(init));
            }
            units.push(RunningUnit {
                name,
                stop: tokens.stop,
                grace: unit.config.stop_grace,
                task: Some(tokio::spawn(supervisor.run())),
            });
        }

        OrchestratorHandle {
            status: StatusHandle {
                deployment: deployment.name.clone(),
                instance: deployment.instance.clone(),
                board,
                events,
                toggles: Arc::clone(&deployment.toggles),
            },
            shutdown,
            units,
        }
    }
}

struct RunningUnit {
    name: String,
    stop: CancellationToken,
    grace: Duration,
    task: Option<JoinHandle<()>>,
}

pub struct OrchestratorHandle {
    status: StatusHandle,
    shutdown: CancellationToken,
    /// In startup order.
    units: Vec<RunningUnit>,
}

impl OrchestratorHandle {
    pub fn status(&self) -> &StatusHandle {
        &self.status
    }

    pub fn board(&self) -> &StatusBoard {
        &self.status.board
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Resolve once `pred` holds for the board. Re-evaluated on every unit
    /// event and at least every `poll`, since health changes are not events.
    pub async fn wait_until<F>(&self, poll: Duration, pred: F)
    where
        F: Fn(&StatusBoard) -> bool,
    {
        let mut rx = self.status.events.subscribe();
        loop {
            if pred(&self.status.board) {
                return;
            }
            tokio::select! {
                r = rx.recv() => {
                    if let Err(RecvError::Closed) = r {
                        tokio::time::sleep(poll).await;
                    }
                }
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }

    /// Resolve once every unit reached a terminal phase.
    pub async fn finished(&self) {
        self.wait_until(Duration::from_millis(250), |b| b.all_terminal())
            .await;
    }

    /// Cancel gate waits and restart backoff, then stop running units in
    /// reverse startup order, each bounded by its stop grace.
    pub async fn shutdown(mut self) {
        info!(deployment = %self.status.deployment, "shutting down");
        self.shutdown.cancel();
        for unit in self.units.iter_mut().rev() {
            unit.stop.cancel();
            let Some(mut task) = unit.task.take() else {
                continue;
            };
            match tokio::time::timeout(unit.grace + STOP_SLACK, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(unit = %unit.name, error = %e, "supervisor task failed"),
                Err(_) => {
                    warn!(unit = %unit.name, "supervisor did not stop in time; aborting");
                    task.abort();
                }
            }
        }
        info!(deployment = %self.status.deployment, "shutdown complete");
    }
}
