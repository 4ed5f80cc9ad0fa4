//! `${NAME}` / `${NAME:-default}` interpolation and environment merging.

use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn var_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\$|\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("static regex")
    })
}

/// Result of interpolating one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpolated {
    pub value: String,
    /// Referenced names that had neither a value nor a default.
    pub unresolved: Vec<String>,
}

/// Replace `${NAME}` and `${NAME:-default}` in `raw` using `lookup`.
///
/// `$$` is a literal `$`. An unset name without a default becomes the empty
/// string and is reported in [`Interpolated::unresolved`]. `:-` also applies
/// the default when the variable is set but empty.
pub fn interpolate<F>(raw: &str, lookup: F) -> Interpolated
where
    F: Fn(&str) -> Option<String>,
{
    let mut unresolved = Vec::new();
    let value = var_re()
        .replace_all(raw, |caps: &Captures| {
            let Some(name) = caps.get(1) else {
                return "$".to_string();
            };
            let name = name.as_str();
            match (lookup(name), caps.get(2)) {
                (Some(v), Some(default)) if v.is_empty() => default.as_str().to_string(),
                (Some(v), _) => v,
                (None, Some(default)) => default.as_str().to_string(),
                (None, None) => {
                    unresolved.push(name.to_string());
                    String::new()
                }
            }
        })
        .into_owned();
    Interpolated { value, unresolved }
}

/// Interpolate a whole map in key order. Later entries may reference earlier
/// ones from the same map as well as anything `fallback` can see.
pub fn interpolate_map<F>(
    raw: &BTreeMap<String, String>,
    fallback: F,
) -> (BTreeMap<String, String>, Vec<String>)
where
    F: Fn(&str) -> Option<String>,
{
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    let mut unresolved = Vec::new();
    for (key, value) in raw {
        let result = interpolate(value, |name| {
            out.get(name).cloned().or_else(|| fallback(name))
        });
        unresolved.extend(result.unresolved);
        out.insert(key.clone(), result.value);
    }
    (out, unresolved)
}
