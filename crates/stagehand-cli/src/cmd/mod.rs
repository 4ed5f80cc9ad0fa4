pub mod marker;
pub mod plan;
pub mod toggles;
pub mod up;
pub mod validate;

use anyhow::Context;
use stagehand_core::config::{DeploymentConfig, MarkerStoreConfig};
use std::path::Path;

use crate::root::config_dir;

/// Load the deployment file, naming it in the error.
pub(crate) fn load(config: &Path) -> anyhow::Result<DeploymentConfig> {
    DeploymentConfig::load(config).with_context(|| format!("failed to load {}", config.display()))
}

/// Like [`load`], with relative paths (unit working dirs, marker store
/// locations) anchored at the deployment file's directory.
pub(crate) fn load_anchored(config: &Path) -> anyhow::Result<DeploymentConfig> {
    let mut deployment = load(config)?;
    let base = config_dir(config);
    for unit in &mut deployment.units {
        if let Some(dir) = unit.working_dir.as_mut() {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }
    match &mut deployment.marker.store {
        MarkerStoreConfig::File { dir } if dir.is_relative() => *dir = base.join(&*dir),
        MarkerStoreConfig::Redb { path } if path.is_relative() => *path = base.join(&*path),
        _ => {}
    }
    Ok(deployment)
}
