use std::path::Path;

use stagehand_core::config::WarnLevel;

use crate::output::print_json;

pub fn run(config: &Path, json: bool) -> anyhow::Result<()> {
    let deployment = super::load(config)?;
    let warnings = deployment.validate();

    if json {
        let value = serde_json::json!({
            "config": config,
            "units": deployment.units.len(),
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    let errors = warnings
        .iter()
        .filter(|w| w.level == WarnLevel::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("config validation found {errors} error(s)");
    }

    Ok(())
}
