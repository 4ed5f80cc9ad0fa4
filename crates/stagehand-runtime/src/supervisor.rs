//! One task per unit: gate, start, supervise, restart.

use std::sync::Arc;
use std::time::Duration;

use stagehand_core::config::UnitKind;
use stagehand_core::deployment::ResolvedUnit;
use stagehand_core::health::HealthStatus;
use stagehand_core::restart::{Backoff, RestartDecision, RestartTracker};
use stagehand_core::unit::UnitPhase;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::gate::{DependencyGate, GateOutcome};
use crate::initializer::{CommandStep, InitOutcome, InitStep, OnceInitializer};
use crate::probe::HealthProbe;
use crate::process::{describe_exit, LaunchSpec, UnitProcess};
use crate::status::UnitWriter;
use crate::RuntimeError;

/// Tokens a supervisor listens to.
///
/// `shutdown` is shared by the whole deployment and ends gate waits, restart
/// backoff and bootstrap steps. `stop` belongs to this unit alone and ends a
/// running process, so processes can be stopped in reverse startup order.
#[derive(Debug, Clone)]
pub struct SupervisorTokens {
    pub shutdown: CancellationToken,
    pub stop: CancellationToken,
}

pub struct Supervisor {
    unit: ResolvedUnit,
    writer: UnitWriter,
    gate: DependencyGate,
    tokens: SupervisorTokens,
    initializer: Option<Arc<OnceInitializer>>,
    backoff: Backoff,
}

/// How one run of a service process ended.
enum RunEnd {
    Exited { success: bool, detail: String, uptime: Duration },
    Stopped(String),
}

/// Whether the gate let the unit through.
enum Gated {
    Proceed,
    Done,
}

impl Supervisor {
    pub fn new(
        unit: ResolvedUnit,
        writer: UnitWriter,
        gate: DependencyGate,
        tokens: SupervisorTokens,
    ) -> Self {
        Self {
            unit,
            writer,
            gate,
            tokens,
            initializer: None,
            backoff: Backoff::default(),
        }
    }

    pub fn with_initializer(mut self, initializer: Arc<OnceInitializer>) -> Self {
        self.initializer = Some(initializer);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub async fn run(self) {
        match self.unit.config.kind {
            UnitKind::Service => self.run_service().await,
            UnitKind::Init => self.run_init().await,
        }
    }

    async fn await_gate(&self, detail: Option<String>) -> Gated {
        let deps = &self.unit.config.depends_on;
        self.writer.transition(UnitPhase::Waiting, detail);
        let timeout = self.unit.config.depends_timeout;
        match self
            .gate
            .await_ready(deps, timeout, &self.tokens.shutdown)
            .await
        {
            GateOutcome::Ready => Gated::Proceed,
            GateOutcome::TimedOut { pending } => {
                self.writer.fail(format!(
                    "dependencies not ready after {}: {}",
                    humanize(timeout),
                    pending.join(", ")
                ));
                Gated::Done
            }
            GateOutcome::Cancelled => {
                self.writer
                    .transition(UnitPhase::Stopped, Some("shutdown before start".into()));
                Gated::Done
            }
            GateOutcome::DependencyFailed {
                dependency,
                root_cause,
            } => {
                let detail = if dependency == root_cause {
                    format!("dependency '{dependency}' failed")
                } else {
                    format!("dependency '{dependency}' cannot start (root cause: '{root_cause}')")
                };
                self.writer.skip(&root_cause, detail);
                Gated::Done
            }
        }
    }

    async fn run_service(self) {
        let config = &self.unit.config;
        let mut restarts = RestartTracker::new(config.restart, config.max_restarts)
            .with_backoff(self.backoff.clone());
        let probe = config.healthcheck.clone().map(|hc| {
            HealthProbe::new(hc, self.unit.resolved_env.clone())
                .with_working_dir(config.working_dir.clone())
        });

        let mut detail = None;
        loop {
            if let Gated::Done = self.await_gate(detail.take()).await {
                return;
            }

            let end = self.run_once(probe.as_ref()).await;
            self.writer.set_health(HealthStatus::Unknown);
            self.writer.set_pid(None);

            let (success, exit_detail, uptime) = match end {
                RunEnd::Stopped(detail) => {
                    self.writer.transition(UnitPhase::Stopped, Some(detail));
                    return;
                }
                RunEnd::Exited {
                    success,
                    detail,
                    uptime,
                } => (success, detail, uptime),
            };

            match restarts.on_exit(success, uptime) {
                RestartDecision::Complete => {
                    self.writer
                        .transition(UnitPhase::Completed, Some(exit_detail));
                    return;
                }
                RestartDecision::Fail { reason } => {
                    self.writer.fail(format!("{exit_detail}; {reason}"));
                    return;
                }
                RestartDecision::Restart { attempt, delay } => {
                    self.writer.record_restart();
                    info!(
                        unit = %config.name,
                        attempt,
                        delay = ?delay,
                        exit = %exit_detail,
                        "restarting unit"
                    );
                    tokio::select! {
                        _ = self.tokens.shutdown.cancelled() => {
                            self.writer.transition(UnitPhase::Stopped, Some("shutdown during restart backoff".into()));
                            return;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    detail = Some(format!("restart #{attempt} after {exit_detail}"));
                }
            }
        }
    }

    /// Start the process and supervise it until it exits or is stopped.
    async fn run_once(&self, probe: Option<&HealthProbe>) -> RunEnd {
        let config = &self.unit.config;
        if self.tokens.stop.is_cancelled() {
            return RunEnd::Stopped("stopped before start".into());
        }
        self.writer.transition(UnitPhase::Starting, None);

        let mut process = match UnitProcess::spawn(LaunchSpec {
            unit: &config.name,
            argv: &config.command,
            env: &self.unit.resolved_env,
            working_dir: config.working_dir.as_deref(),
        }) {
            Ok(p) => p,
            Err(e) => {
                return RunEnd::Exited {
                    success: false,
                    detail: e.to_string(),
                    uptime: Duration::ZERO,
                }
            }
        };
        self.writer.set_pid(process.pid());
        self.writer.transition(UnitPhase::Running, None);

        let checks = async {
            match probe {
                Some(p) => p.run(&self.writer).await,
                None => {
                    // Without a healthcheck a started process counts as ready.
                    self.writer.set_health(HealthStatus::Healthy);
                    std::future::pending::<()>().await
                }
            }
        };

        let exited = tokio::select! {
            status = process.wait() => Some(status),
            _ = checks => None,
            _ = self.tokens.stop.cancelled() => None,
        };

        match exited {
            Some(Ok(status)) => RunEnd::Exited {
                success: status.success(),
                detail: describe_exit(&status),
                uptime: process.uptime(),
            },
            Some(Err(e)) => RunEnd::Exited {
                success: false,
                detail: format!("wait failed: {e}"),
                uptime: process.uptime(),
            },
            None => {
                let grace = config.stop_grace;
                match process.stop(grace).await {
                    Ok(status) => RunEnd::Stopped(format!("stopped ({})", describe_exit(&status))),
                    Err(e) => {
                        warn!(unit = %config.name, error = %e, "stop failed");
                        RunEnd::Stopped(format!("stop failed: {e}"))
                    }
                }
            }
        }
    }

    async fn run_init(self) {
        if let Gated::Done = self.await_gate(None).await {
            return;
        }
        let config = &self.unit.config;
        let Some(initializer) = self.initializer.clone() else {
            self.writer.fail("no initializer configured for init unit");
            return;
        };

        self.writer
            .transition(UnitPhase::Running, Some("bootstrap".into()));
        let steps: Vec<Arc<dyn InitStep>> = config
            .steps
            .iter()
            .map(|s| {
                Arc::new(CommandStep::from_config(
                    &config.name,
                    s,
                    &self.unit.resolved_env,
                    config.working_dir.clone(),
                )) as Arc<dyn InitStep>
            })
            .collect();

        match initializer
            .run_if_needed(&steps, &self.tokens.shutdown)
            .await
        {
            Ok(InitOutcome::Skipped) => {
                self.writer.set_health(HealthStatus::Healthy);
                self.writer.transition(
                    UnitPhase::Completed,
                    Some("already initialized; bootstrap skipped".into()),
                );
            }
            Ok(InitOutcome::Succeeded) => {
                self.writer.set_health(HealthStatus::Healthy);
                self.writer
                    .transition(UnitPhase::Completed, Some("bootstrap succeeded".into()));
            }
            Ok(InitOutcome::Failed { step, reason }) if self.tokens.shutdown.is_cancelled() => {
                self.writer.transition(
                    UnitPhase::Stopped,
                    Some(format!("interrupted at step '{step}': {reason}")),
                );
            }
            Ok(InitOutcome::Failed { step, reason }) => {
                self.writer
                    .fail(format!("step '{step}' failed: {reason}"));
            }
            Err(RuntimeError::Cancelled) => {
                self.writer.transition(
                    UnitPhase::Stopped,
                    Some("shutdown while waiting for init lease".into()),
                );
            }
            Err(e) => self.writer.fail(e.to_string()),
        }
    }
}

fn humanize(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}
