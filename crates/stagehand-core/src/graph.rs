//! Dependency graph built from unit declarations.
//!
//! The graph is derived, never stored: it is rebuilt from `depends_on` on every
//! orchestrator start. Resolution is Kahn's algorithm with ties broken by
//! declaration order, so the same file always yields the same startup order.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::config::UnitConfig;
use crate::error::{Result, StagehandError};

// ---------------------------------------------------------------------------
// CycleError
// ---------------------------------------------------------------------------

/// The declarations contain a dependency cycle. `units` lists the cycle in
/// edge order: each unit depends on the next, and the last depends on the first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    pub units: Vec<String>,
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dependency cycle: {}", self.units.join(" -> "))?;
        if let Some(first) = self.units.first() {
            write!(f, " -> {first}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CycleError {}

// ---------------------------------------------------------------------------
// DependencyGraph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    order: Vec<String>,
    dependencies: BTreeMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Build the graph and its topological ordering.
    ///
    /// Fails with [`StagehandError::UnknownDependency`] when a unit names a
    /// dependency that is not declared, and with [`StagehandError::Cycle`] when
    /// no ordering exists.
    pub fn build(units: &[UnitConfig]) -> Result<Self> {
        let index: HashMap<&str, usize> = units
            .iter()
            .enumerate()
            .map(|(i, u)| (u.name.as_str(), i))
            .collect();

        // Deduplicated dependency indices per unit, in declaration order.
        let mut deps: Vec<Vec<usize>> = Vec::with_capacity(units.len());
        for unit in units {
            let mut seen = BTreeSet::new();
            let mut list = Vec::new();
            for dep in &unit.depends_on {
                let j = *index
                    .get(dep.as_str())
                    .ok_or_else(|| StagehandError::UnknownDependency {
                        unit: unit.name.clone(),
                        dependency: dep.clone(),
                    })?;
                if seen.insert(j) {
                    list.push(j);
                }
            }
            deps.push(list);
        }

        let order = topo_order(&deps).map_err(|cycle| CycleError {
            units: cycle.into_iter().map(|i| units[i].name.clone()).collect(),
        })?;

        let dependencies: BTreeMap<String, Vec<String>> = units
            .iter()
            .zip(&deps)
            .map(|(unit, list)| {
                let names = list.iter().map(|&j| units[j].name.clone()).collect();
                (unit.name.clone(), names)
            })
            .collect();

        Ok(Self {
            order: order.into_iter().map(|i| units[i].name.clone()).collect(),
            dependencies,
        })
    }

    /// Units in startup order: every unit appears after all its dependencies.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn dependencies_of(&self, unit: &str) -> &[String] {
        self.dependencies
            .get(unit)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

/// Convenience wrapper returning only the ordering.
pub fn resolve(units: &[UnitConfig]) -> Result<Vec<String>> {
    Ok(DependencyGraph::build(units)?.order)
}

/// Kahn's algorithm over dependency indices. On failure returns one cycle.
fn topo_order(deps: &[Vec<usize>]) -> std::result::Result<Vec<usize>, Vec<usize>> {
    let n = deps.len();
    let mut pending: Vec<usize> = deps.iter().map(|d| d.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, list) in deps.iter().enumerate() {
        for &j in list {
            dependents[j].push(i);
        }
    }

    // BTreeSet keyed by declaration index gives the deterministic tie-break.
    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| pending[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &d in &dependents[i] {
            pending[d] -= 1;
            if pending[d] == 0 {
                ready.insert(d);
            }
        }
    }

    if order.len() == n {
        return Ok(order);
    }

    // Every unresolved unit still waits on at least one unresolved dependency,
    // so following those edges from any of them must revisit a unit.
    let stuck: BTreeSet<usize> = (0..n).filter(|&i| pending[i] > 0).collect();
    let mut path: Vec<usize> = Vec::new();
    let mut position: HashMap<usize, usize> = HashMap::new();
    let mut current = *stuck.iter().next().unwrap_or(&0);
    loop {
        if let Some(&start) = position.get(&current) {
            return Err(path[start..].to_vec());
        }
        position.insert(current, path.len());
        path.push(current);
        match deps[current].iter().find(|j| stuck.contains(j)) {
            Some(&next) => current = next,
            None => return Err(path),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
