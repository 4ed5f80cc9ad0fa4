use std::path::{Path, PathBuf};

use stagehand_core::config::CONFIG_FILE;

/// Resolve the deployment file.
///
/// Priority:
/// 1. `--config` flag / `STAGEHAND_CONFIG` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `stagehand.yaml`
/// 3. Fall back to `cwd/stagehand.yaml`, which fails to load with a clear error
pub fn resolve_config(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_upward(&cwd).unwrap_or_else(|| cwd.join(CONFIG_FILE))
}

fn find_upward(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE))
        .find(|candidate| candidate.is_file())
}

/// Directory relative paths in the deployment file are resolved against.
pub fn config_dir(config: &Path) -> PathBuf {
    match config.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
