use std::path::Path;

use anyhow::Context;
use stagehand_core::graph::DependencyGraph;

use crate::output::{print_json, print_table};

/// Print the order supervisors are spawned in. Units whose dependencies are
/// disjoint still start concurrently.
pub fn run(config: &Path, json: bool) -> anyhow::Result<()> {
    let deployment = super::load(config)?;
    deployment.check().context("deployment is invalid")?;
    let graph = DependencyGraph::build(&deployment.units)?;

    let steps: Vec<serde_json::Value> = graph
        .order()
        .iter()
        .enumerate()
        .filter_map(|(i, name)| {
            let unit = deployment.unit(name)?;
            Some(serde_json::json!({
                "position": i + 1,
                "name": unit.name,
                "kind": unit.kind,
                "depends_on": graph.dependencies_of(name),
                "healthcheck": unit.healthcheck.as_ref().map(|hc| hc.probe.as_str()),
                "restart": unit.restart.as_str(),
            }))
        })
        .collect();

    if json {
        return print_json(&serde_json::json!({
            "deployment": deployment.deployment.name,
            "instance": deployment.deployment.instance,
            "order": steps,
        }));
    }

    println!(
        "Deployment: {} (instance {})\n",
        deployment.deployment.name, deployment.deployment.instance
    );
    let rows = graph
        .order()
        .iter()
        .enumerate()
        .filter_map(|(i, name)| {
            let unit = deployment.unit(name)?;
            let deps = graph.dependencies_of(name);
            Some(vec![
                (i + 1).to_string(),
                unit.name.clone(),
                if unit.is_init() { "init" } else { "service" }.to_string(),
                if deps.is_empty() {
                    "-".to_string()
                } else {
                    deps.join(", ")
                },
                unit.healthcheck
                    .as_ref()
                    .map(|hc| hc.probe.as_str().to_string())
                    .unwrap_or_else(|| "-".into()),
            ])
        })
        .collect();
    print_table(&["#", "UNIT", "KIND", "DEPENDS ON", "PROBE"], rows);
    Ok(())
}
