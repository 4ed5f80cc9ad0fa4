//! A validated deployment: configuration resolved against the process
//! environment and toggle overrides exactly once, then passed by reference.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::config::{DeploymentConfig, MarkerConfig, StatusConfig, UnitConfig};
use crate::env::{interpolate, interpolate_map};
use crate::error::{Result, StagehandError};
use crate::graph::DependencyGraph;
use crate::toggles::{self, FeatureToggleSet};

/// Inputs read from outside the config file.
#[derive(Debug, Clone, Default)]
pub struct ResolveContext {
    pub process_env: BTreeMap<String, String>,
    /// `--toggle` overrides in command-line order.
    pub toggle_overrides: Vec<(String, String)>,
}

impl ResolveContext {
    /// Snapshot the current process environment.
    pub fn from_process(toggle_overrides: Vec<(String, String)>) -> Self {
        Self {
            process_env: std::env::vars().collect(),
            toggle_overrides,
        }
    }
}

/// A unit with its final environment.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedUnit {
    #[serde(flatten)]
    pub config: UnitConfig,
    /// Shared env, unit env and toggles merged; toggles win.
    pub resolved_env: BTreeMap<String, String>,
}

impl ResolvedUnit {
    pub fn name(&self) -> &str {
        &self.config.name
    }
}

#[derive(Debug, Clone)]
pub struct Deployment {
    pub name: String,
    pub instance: String,
    pub units: Vec<ResolvedUnit>,
    pub graph: DependencyGraph,
    pub toggles: Arc<FeatureToggleSet>,
    pub marker: MarkerConfig,
    pub status: Option<StatusConfig>,
}

impl Deployment {
    /// Validate `config` and resolve it. Every configuration error is
    /// reported here, before any unit could start.
    pub fn resolve(config: DeploymentConfig, ctx: &ResolveContext) -> Result<Self> {
        config.check()?;

        let catalog = config.toggle_catalog();
        let raw_toggles = config
            .toggle_entries()
            .into_iter()
            .chain(toggles::from_env_vars(ctx.process_env.clone()))
            .chain(ctx.toggle_overrides.iter().cloned());
        let toggles = FeatureToggleSet::resolve_with(&catalog, raw_toggles)?;

        let process = |name: &str| ctx.process_env.get(name).cloned();
        let (shared, unresolved) = interpolate_map(&config.env, process);
        for name in unresolved {
            warn!(var = %name, "shared env references an unset variable");
        }

        let graph = DependencyGraph::build(&config.units)?;
        let mut units = Vec::with_capacity(config.units.len());
        for unit in config.units {
            let resolved_env = resolve_unit_env(&unit, &shared, ctx, &toggles)?;
            units.push(ResolvedUnit {
                config: unit,
                resolved_env,
            });
        }

        Ok(Self {
            name: config.deployment.name,
            instance: config.deployment.instance,
            units,
            graph,
            toggles: Arc::new(toggles),
            marker: config.marker,
            status: config.status,
        })
    }

    pub fn unit(&self, name: &str) -> Option<&ResolvedUnit> {
        self.units.iter().find(|u| u.name() == name)
    }

    /// Units in startup order.
    pub fn ordered_units(&self) -> impl Iterator<Item = &ResolvedUnit> {
        self.graph.order().iter().filter_map(|n| self.unit(n))
    }
}

fn resolve_unit_env(
    unit: &UnitConfig,
    shared: &BTreeMap<String, String>,
    ctx: &ResolveContext,
    toggles: &FeatureToggleSet,
) -> Result<BTreeMap<String, String>> {
    let mut env = shared.clone();
    for (key, raw) in &unit.env {
        let result = interpolate(raw, |name| {
            env.get(name)
                .cloned()
                .or_else(|| ctx.process_env.get(name).cloned())
        });
        for name in &result.unresolved {
            warn!(unit = %unit.name, var = %name, "env references an unset variable");
        }
        env.insert(key.clone(), result.value);
    }

    let missing: Vec<String> = unit
        .required_env
        .iter()
        .filter(|name| {
            env.get(name.as_str())
                .or_else(|| ctx.process_env.get(name.as_str()))
                .map(|v| v.trim().is_empty())
                .unwrap_or(true)
        })
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(StagehandError::MissingEnv {
            unit: unit.name.clone(),
            vars: missing,
        });
    }

    env.extend(toggles.env_pairs());
    Ok(env)
}
