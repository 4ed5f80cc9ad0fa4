use std::path::Path;

use anyhow::Context;
use stagehand_core::toggles::{self, FeatureToggleSet};

use crate::output::{print_json, print_table};

/// Resolve toggles the same way `up` does: file, then `STAGEHAND_TOGGLE_*`
/// environment, then `--toggle` flags.
pub fn run(config: &Path, overrides: &[String], json: bool) -> anyhow::Result<()> {
    let deployment = super::load(config)?;
    let raw = deployment
        .toggle_entries()
        .into_iter()
        .chain(toggles::from_env_vars(std::env::vars()))
        .chain(overrides.iter().map(|o| toggles::parse_override(o)));
    let resolved = FeatureToggleSet::resolve_with(&deployment.toggle_catalog(), raw)
        .context("failed to resolve toggles")?;

    if json {
        return print_json(&resolved);
    }

    let rows = resolved
        .iter()
        .map(|(name, on)| vec![name.to_string(), on.to_string()])
        .collect();
    print_table(&["TOGGLE", "ENABLED"], rows);
    Ok(())
}
