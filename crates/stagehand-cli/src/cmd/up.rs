use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use stagehand_core::config::WarnLevel;
use stagehand_core::deployment::{Deployment, ResolveContext};
use stagehand_core::marker::open_store;
use stagehand_core::toggles::parse_override;
use stagehand_core::unit::{UnitPhase, UnitSnapshot};
use stagehand_runtime::Orchestrator;
use tokio::signal;
use tracing::{error, info, warn};

use crate::output::{or_dash, print_json, print_table};

/// How long the status API may take to drain once units are stopped.
const SERVER_DRAIN: Duration = Duration::from_secs(5);

pub fn run(
    config: &Path,
    toggles: &[String],
    status_bind: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let file = super::load_anchored(config)?;
    for w in file.validate() {
        if w.level == WarnLevel::Warning {
            warn!("{}", w.message);
        }
    }

    let overrides = toggles.iter().map(|t| parse_override(t)).collect();
    let deployment = Deployment::resolve(file, &ResolveContext::from_process(overrides))
        .context("deployment is invalid; nothing was started")?;
    let store = open_store(&deployment.marker.store).context("failed to open marker store")?;
    let bind = status_bind.or_else(|| deployment.status.as_ref().map(|s| s.bind.clone()));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        // Bind before any unit starts so a busy port aborts with nothing running.
        let listener = match bind {
            Some(addr) => Some(
                tokio::net::TcpListener::bind(&addr)
                    .await
                    .with_context(|| {
                        format!("failed to bind status API on {addr}; nothing was started")
                    })?,
            ),
            None => None,
        };

        let handle = Orchestrator::new(deployment, store).start();
        let server = listener.map(|listener| {
            tokio::spawn(stagehand_server::serve_on(
                listener,
                handle.status().clone(),
                handle.shutdown_token(),
            ))
        });

        tokio::select! {
            () = shutdown_signal() => {}
            () = handle.finished() => info!("every unit has finished"),
        }

        let board = handle.board().clone();
        handle.shutdown().await;

        if let Some(server) = server {
            match tokio::time::timeout(SERVER_DRAIN, server).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => warn!(error = %e, "status API exited with an error"),
                Ok(Err(e)) => warn!(error = %e, "status API task failed"),
                Err(_) => warn!("status API did not drain in time"),
            }
        }

        let snapshot = board.snapshot();
        report(&snapshot, json)?;

        let failed: Vec<&str> = snapshot
            .iter()
            .filter(|s| s.phase == UnitPhase::Failed)
            .map(|s| s.name.as_str())
            .collect();
        if !failed.is_empty() {
            anyhow::bail!("{} unit(s) failed: {}", failed.len(), failed.join(", "));
        }
        Ok(())
    })
}

fn report(snapshot: &[UnitSnapshot], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&snapshot);
    }
    let rows = snapshot
        .iter()
        .map(|s| {
            vec![
                s.name.clone(),
                s.phase.to_string(),
                s.restarts.to_string(),
                or_dash(s.detail.as_deref()),
            ]
        })
        .collect();
    print_table(&["UNIT", "PHASE", "RESTARTS", "DETAIL"], rows);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, stopping units"),
        () = terminate => info!("received SIGTERM, stopping units"),
    }
}
