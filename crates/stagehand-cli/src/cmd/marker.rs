use std::path::Path;

use anyhow::Context;
use clap::Subcommand;
use stagehand_core::config::{DeploymentConfig, MarkerStoreConfig};
use stagehand_core::marker::{marker_key, open_store};

use crate::output::{or_dash, print_json, print_table};

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum MarkerSubcommand {
    /// Show each init unit's marker and lease
    Status,

    /// Clear markers so bootstrap runs again on the next start
    Clear {
        /// Init unit to clear (default: every init unit)
        unit: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(config: &Path, subcmd: MarkerSubcommand, json: bool) -> anyhow::Result<()> {
    let deployment = super::load_anchored(config)?;
    if deployment.marker.store == MarkerStoreConfig::Memory {
        anyhow::bail!("marker store is 'memory'; markers only exist inside a running `stagehand up`");
    }
    match subcmd {
        MarkerSubcommand::Status => status(&deployment, json),
        MarkerSubcommand::Clear { unit } => clear(&deployment, unit.as_deref(), json),
    }
}

fn init_units(deployment: &DeploymentConfig) -> Vec<&str> {
    deployment
        .units
        .iter()
        .filter(|u| u.is_init())
        .map(|u| u.name.as_str())
        .collect()
}

// ---------------------------------------------------------------------------
// status
// ---------------------------------------------------------------------------

fn status(deployment: &DeploymentConfig, json: bool) -> anyhow::Result<()> {
    let store = open_store(&deployment.marker.store).context("failed to open marker store")?;
    let instance = &deployment.deployment.instance;

    let mut entries = Vec::new();
    for unit in init_units(deployment) {
        let key = marker_key(instance, unit);
        let record = store.get(&key)?;
        let lease = store.lease(&key)?;
        entries.push(serde_json::json!({
            "unit": unit,
            "key": key,
            "set": record.is_some(),
            "completed_at": record.as_ref().map(|r| r.completed_at),
            "holder": record.as_ref().map(|r| r.holder.clone()),
            "lease": lease,
        }));
    }

    if json {
        return print_json(&serde_json::json!({
            "store": store.kind(),
            "markers": entries,
        }));
    }

    if entries.is_empty() {
        println!("No init units declared.");
        return Ok(());
    }
    let rows = entries
        .iter()
        .map(|e| {
            vec![
                e["unit"].as_str().unwrap_or_default().to_string(),
                if e["set"].as_bool().unwrap_or(false) { "set" } else { "unset" }.to_string(),
                or_dash(e["completed_at"].as_str()),
                or_dash(e["lease"]["holder"].as_str()),
            ]
        })
        .collect();
    print_table(&["UNIT", "MARKER", "COMPLETED", "LEASE HOLDER"], rows);
    Ok(())
}

// ---------------------------------------------------------------------------
// clear
// ---------------------------------------------------------------------------

fn clear(deployment: &DeploymentConfig, unit: Option<&str>, json: bool) -> anyhow::Result<()> {
    let inits = init_units(deployment);
    let targets: Vec<&str> = match unit {
        Some(name) => {
            if !inits.contains(&name) {
                anyhow::bail!("'{name}' is not an init unit of this deployment");
            }
            vec![name]
        }
        None => inits,
    };

    let store = open_store(&deployment.marker.store).context("failed to open marker store")?;
    let instance = &deployment.deployment.instance;
    let mut cleared = Vec::new();
    for name in targets {
        if store.clear(&marker_key(instance, name))? {
            cleared.push(name);
        }
    }

    if json {
        print_json(&serde_json::json!({ "cleared": cleared }))?;
    } else if cleared.is_empty() {
        println!("No markers were set.");
    } else {
        for name in &cleared {
            println!("Cleared marker for '{name}'; bootstrap runs on the next start.");
        }
    }
    Ok(())
}
