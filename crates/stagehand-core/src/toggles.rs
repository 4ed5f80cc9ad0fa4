//! Feature toggles: named skip switches resolved once at startup.
//!
//! Each toggle lets a pipeline stage skip optional work. The default for every
//! toggle is `false` ("do not skip"). Unknown names are rejected while
//! resolving so a typo in `stagehand.yaml` or the environment fails before any
//! unit starts.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{Result, StagehandError};

/// Skip external-data ingestion (expert enrichment from the bibliographic API).
pub const SKIP_OPENALEX: &str = "SKIP_OPENALEX";
/// Skip publication processing.
pub const SKIP_PUBLICATIONS: &str = "SKIP_PUBLICATIONS";
/// Skip graph construction.
pub const SKIP_GRAPH: &str = "SKIP_GRAPH";
/// Skip search-index construction.
pub const SKIP_SEARCH: &str = "SKIP_SEARCH";
/// Skip cache warmup.
pub const SKIP_REDIS: &str = "SKIP_REDIS";

/// Environment prefix for toggle overrides, e.g. `STAGEHAND_TOGGLE_SKIP_GRAPH=1`.
pub const ENV_PREFIX: &str = "STAGEHAND_TOGGLE_";

// ---------------------------------------------------------------------------
// ToggleCatalog
// ---------------------------------------------------------------------------

/// The set of toggle names a deployment recognises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleCatalog {
    names: Vec<String>,
}

impl Default for ToggleCatalog {
    fn default() -> Self {
        Self {
            names: [
                SKIP_OPENALEX,
                SKIP_PUBLICATIONS,
                SKIP_GRAPH,
                SKIP_SEARCH,
                SKIP_REDIS,
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl ToggleCatalog {
    /// Extend the built-in catalog with deployment-specific names.
    pub fn with_declared<I, S>(mut self, declared: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in declared {
            let name = name.into();
            if !self.names.contains(&name) {
                self.names.push(name);
            }
        }
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

// ---------------------------------------------------------------------------
// FeatureToggleSet
// ---------------------------------------------------------------------------

/// Resolved, immutable toggle values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FeatureToggleSet {
    values: BTreeMap<String, bool>,
}

impl FeatureToggleSet {
    /// Resolve raw `name -> value` input against the built-in catalog.
    pub fn resolve<I, K, V>(raw: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self::resolve_with(&ToggleCatalog::default(), raw)
    }

    /// Resolve raw input against `catalog`.
    ///
    /// Entries are applied in iteration order, so callers layer sources by
    /// chaining them (file, then environment, then command line).
    pub fn resolve_with<I, K, V>(catalog: &ToggleCatalog, raw: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut values: BTreeMap<String, bool> = catalog
            .names()
            .iter()
            .map(|n| (n.clone(), false))
            .collect();

        for (name, value) in raw {
            let name = name.as_ref().trim();
            if !catalog.contains(name) {
                return Err(StagehandError::UnknownToggle(name.to_string()));
            }
            let parsed =
                parse_bool(value.as_ref()).ok_or_else(|| StagehandError::InvalidToggleValue {
                    name: name.to_string(),
                    value: value.as_ref().to_string(),
                })?;
            values.insert(name.to_string(), parsed);
        }

        Ok(Self { values })
    }

    /// Whether the named toggle is on. Names outside the catalog were rejected
    /// at resolution time, so an unknown name here is simply `false`.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.values.get(name).copied().unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// `NAME=true|false` pairs injected into every unit's environment.
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect()
    }

    pub fn enabled_names(&self) -> Vec<&str> {
        self.values
            .iter()
            .filter(|(_, v)| **v)
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

/// Parse the common truthy / falsy spellings, case-insensitively.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "y" | "t" => Some(true),
        "0" | "false" | "no" | "off" | "n" | "f" | "" => Some(false),
        _ => None,
    }
}

/// Collect toggle overrides from environment variables carrying [`ENV_PREFIX`].
///
/// Takes the variables as an iterator so the caller decides when the process
/// environment is read.
pub fn from_env_vars<I>(vars: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut out: Vec<(String, String)> = vars
        .into_iter()
        .filter_map(|(k, v)| k.strip_prefix(ENV_PREFIX).map(|name| (name.to_string(), v)))
        .collect();
    out.sort();
    out
}

/// Split a `NAME=VALUE` command-line override. A bare `NAME` means `true`.
pub fn parse_override(raw: &str) -> (String, String) {
    match raw.split_once('=') {
        Some((k, v)) => (k.trim().to_string(), v.trim().to_string()),
        None => (raw.trim().to_string(), "true".to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
