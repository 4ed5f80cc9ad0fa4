use crate::error::{Result, StagehandError};
use crate::graph::DependencyGraph;
use crate::toggles::{FeatureToggleSet, ToggleCatalog};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

pub const CONFIG_FILE: &str = "stagehand.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Error,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// HealthCheckConfig
// ---------------------------------------------------------------------------

/// How a unit's readiness is checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProbeKind {
    /// Run a command; exit code 0 means healthy.
    Exec {
        #[serde(deserialize_with = "deserialize_command")]
        command: Vec<String>,
    },
    /// Open a TCP connection to `address` (`host:port`).
    Tcp { address: String },
    /// GET `url`; any 2xx response means healthy.
    Http { url: String },
}

impl ProbeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exec { .. } => "exec",
            Self::Tcp { .. } => "tcp",
            Self::Http { .. } => "http",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthCheckConfig {
    pub probe: ProbeKind,
    #[serde(default = "default_interval", with = "duration_serde")]
    pub interval: Duration,
    #[serde(default = "default_probe_timeout", with = "duration_serde")]
    pub timeout: Duration,
    /// Consecutive failing checks before the unit is declared unhealthy.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Grace period after start during which failing checks do not count.
    #[serde(default, with = "duration_serde")]
    pub start_period: Duration,
}

fn default_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_retries() -> u32 {
    3
}

impl HealthCheckConfig {
    pub fn new(probe: ProbeKind) -> Self {
        Self {
            probe,
            interval: default_interval(),
            timeout: default_probe_timeout(),
            retries: default_retries(),
            start_period: Duration::ZERO,
        }
    }
}

// ---------------------------------------------------------------------------
// RestartPolicy / ResourceLimits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    #[default]
    Never,
    OnFailure,
    Always,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::OnFailure => "on-failure",
            Self::Always => "always",
        }
    }
}

/// Memory amount in bytes, written as `512M`, `2G` or a plain byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct MemorySize(pub u64);

impl MemorySize {
    pub fn parse(raw: &str) -> Result<Self> {
        let s = raw.trim();
        let s = s.strip_suffix(['b', 'B']).unwrap_or(s);
        let (digits, unit) = match s.char_indices().last() {
            Some((i, c)) if c.is_ascii_alphabetic() => (&s[..i], Some(c.to_ascii_uppercase())),
            _ => (s, None),
        };
        let n: u64 = digits
            .trim()
            .parse()
            .map_err(|_| StagehandError::InvalidMemorySize(raw.to_string()))?;
        let factor: u64 = match unit {
            None => 1,
            Some('K') => 1 << 10,
            Some('M') => 1 << 20,
            Some('G') => 1 << 30,
            Some('T') => 1 << 40,
            Some(_) => return Err(StagehandError::InvalidMemorySize(raw.to_string())),
        };
        n.checked_mul(factor)
            .map(Self)
            .ok_or_else(|| StagehandError::InvalidMemorySize(raw.to_string()))
    }

    pub fn bytes(&self) -> u64 {
        self.0
    }
}

impl<'de> Deserialize<'de> for MemorySize {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bytes(u64),
            Text(String),
        }
        match Raw::deserialize(d)? {
            Raw::Bytes(n) => Ok(Self(n)),
            Raw::Text(s) => Self::parse(&s).map_err(serde::de::Error::custom),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<MemorySize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_reservation: Option<MemorySize>,
}

// ---------------------------------------------------------------------------
// UnitConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// A long-lived process.
    #[default]
    Service,
    /// A one-shot bootstrap run at most once per deployment lifetime.
    Init,
}

/// One ordered step of an init unit's bootstrap procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InitStepConfig {
    pub name: String,
    #[serde(deserialize_with = "deserialize_command")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "duration_serde::option"
    )]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitConfig {
    pub name: String,
    #[serde(default)]
    pub kind: UnitKind,
    #[serde(
        default,
        deserialize_with = "deserialize_command",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Variables that must be non-empty once shared and unit env are merged.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_env: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Upper bound on waiting for `depends_on` to become healthy.
    #[serde(default = "default_depends_timeout", with = "duration_serde")]
    pub depends_timeout: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthCheckConfig>,
    #[serde(default)]
    pub restart: RestartPolicy,
    /// Only meaningful for `on-failure`; `None` means no limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_restarts: Option<u32>,
    #[serde(default)]
    pub resources: ResourceLimits,
    #[serde(default = "default_stop_grace", with = "duration_serde")]
    pub stop_grace: Duration,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<InitStepConfig>,
}

fn default_depends_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_stop_grace() -> Duration {
    Duration::from_secs(10)
}

impl UnitConfig {
    pub fn service<I, S>(name: impl Into<String>, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            kind: UnitKind::Service,
            command: command.into_iter().map(Into::into).collect(),
            working_dir: None,
            env: BTreeMap::new(),
            required_env: Vec::new(),
            depends_on: Vec::new(),
            depends_timeout: default_depends_timeout(),
            healthcheck: None,
            restart: RestartPolicy::Never,
            max_restarts: None,
            resources: ResourceLimits::default(),
            stop_grace: default_stop_grace(),
            steps: Vec::new(),
        }
    }

    pub fn init(name: impl Into<String>, steps: Vec<InitStepConfig>) -> Self {
        Self {
            kind: UnitKind::Init,
            steps,
            ..Self::service(name, Vec::<String>::new())
        }
    }

    pub fn is_init(&self) -> bool {
        self.kind == UnitKind::Init
    }
}

// ---------------------------------------------------------------------------
// MarkerConfig
// ---------------------------------------------------------------------------

/// Backing store for the initialization marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarkerStoreConfig {
    /// Lost when the orchestrator exits. Useful for tests and dry runs.
    Memory,
    /// Files under `dir`. Point it at a tmpfs so a full teardown clears it.
    File {
        #[serde(default = "default_marker_dir")]
        dir: PathBuf,
    },
    /// A single embedded key-value database file.
    Redb { path: PathBuf },
}

impl Default for MarkerStoreConfig {
    fn default() -> Self {
        Self::File {
            dir: default_marker_dir(),
        }
    }
}

/// `/dev/shm` survives process restarts but not a host teardown, which is
/// the lifetime an initialization marker needs.
fn default_marker_dir() -> PathBuf {
    let shm = Path::new("/dev/shm");
    if shm.is_dir() {
        shm.join("stagehand")
    } else {
        std::env::temp_dir().join("stagehand")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkerConfig {
    #[serde(default)]
    pub store: MarkerStoreConfig,
    /// How long an initializer's lease stays valid without renewal.
    #[serde(default = "default_lease_ttl", with = "duration_serde")]
    pub lease_ttl: Duration,
    /// Upper bound on waiting for another initializer's lease.
    #[serde(default = "default_lock_timeout", with = "duration_serde")]
    pub lock_timeout: Duration,
}

fn default_lease_ttl() -> Duration {
    Duration::from_secs(30)
}

fn default_lock_timeout() -> Duration {
    Duration::from_secs(120)
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            store: MarkerStoreConfig::default(),
            lease_ttl: default_lease_ttl(),
            lock_timeout: default_lock_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level DeploymentConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentMeta {
    pub name: String,
    /// Key for the initialization marker; one marker per instance.
    #[serde(default = "default_instance")]
    pub instance: String,
}

fn default_instance() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusConfig {
    /// Address for the status API, e.g. `127.0.0.1:7070`.
    pub bind: String,
}

/// A toggle value as written in YAML: `true`, `"yes"`, `1` are all accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawToggle {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl RawToggle {
    pub fn as_text(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    pub deployment: DeploymentMeta,
    /// Shared variables available to every unit and to `${NAME}` interpolation.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub toggles: BTreeMap<String, RawToggle>,
    /// Toggle names recognised in addition to the built-in skip switches.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub declare_toggles: Vec<String>,
    #[serde(default)]
    pub marker: MarkerConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusConfig>,
    #[serde(default)]
    pub units: Vec<UnitConfig>,
}

fn default_version() -> u32 {
    1
}

fn unit_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").expect("static regex"))
}

/// Instance names key marker files, so they must be usable as file names.
fn instance_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]*$").expect("static regex"))
}

impl DeploymentConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            version: 1,
            deployment: DeploymentMeta {
                name: name.into(),
                instance: default_instance(),
            },
            env: BTreeMap::new(),
            toggles: BTreeMap::new(),
            declare_toggles: Vec::new(),
            marker: MarkerConfig::default(),
            status: None,
            units: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(StagehandError::ConfigNotFound);
        }
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        let cfg: DeploymentConfig = serde_yaml::from_str(data)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    pub fn unit(&self, name: &str) -> Option<&UnitConfig> {
        self.units.iter().find(|u| u.name == name)
    }

    pub fn toggle_catalog(&self) -> ToggleCatalog {
        ToggleCatalog::default().with_declared(self.declare_toggles.iter().cloned())
    }

    /// Toggle input from the file, as `(name, text)` pairs.
    pub fn toggle_entries(&self) -> Vec<(String, String)> {
        self.toggles
            .iter()
            .map(|(k, v)| (k.clone(), v.as_text()))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Structural checks (hard errors)
    // -----------------------------------------------------------------------

    /// Every structural problem that must stop startup, in file order.
    pub fn structural_errors(&self) -> Vec<StagehandError> {
        let mut errors = Vec::new();

        if self.version != 1 {
            errors.push(StagehandError::InvalidConfig(format!(
                "unsupported config version {}",
                self.version
            )));
        }
        if !instance_re().is_match(&self.deployment.instance) {
            errors.push(StagehandError::InvalidConfig(format!(
                "deployment.instance '{}' must be letters, digits, '_', '-' or '.' and not start with '.'",
                self.deployment.instance
            )));
        }

        let mut seen = HashSet::new();
        for unit in &self.units {
            if !unit_name_re().is_match(&unit.name) {
                errors.push(StagehandError::InvalidUnitName(unit.name.clone()));
            }
            if !seen.insert(unit.name.as_str()) {
                errors.push(StagehandError::DuplicateUnit(unit.name.clone()));
            }
            errors.extend(unit_errors(unit).into_iter().map(StagehandError::InvalidConfig));
        }

        // Graph errors only make sense once names are unique.
        if errors.is_empty() {
            if let Err(e) = DependencyGraph::build(&self.units) {
                errors.push(e);
            }
        }

        if let Err(e) =
            FeatureToggleSet::resolve_with(&self.toggle_catalog(), self.toggle_entries())
        {
            errors.push(e);
        }

        errors
    }

    /// First structural error, if any.
    pub fn check(&self) -> Result<()> {
        match self.structural_errors().into_iter().next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Validation (errors + warnings, for `stagehand validate`)
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings: Vec<ConfigWarning> = self
            .structural_errors()
            .iter()
            .map(|e| ConfigWarning::error(e.to_string()))
            .collect();

        for unit in &self.units {
            if unit.max_restarts.is_some() && unit.restart != RestartPolicy::OnFailure {
                warnings.push(ConfigWarning::warning(format!(
                    "unit '{}' sets max_restarts but restart is '{}'; it only applies to on-failure",
                    unit.name,
                    unit.restart.as_str()
                )));
            }

            if let Some(hc) = &unit.healthcheck {
                if hc.retries > 10 {
                    warnings.push(ConfigWarning::warning(format!(
                        "unit '{}' healthcheck has retries={} (>10 is unusual)",
                        unit.name, hc.retries
                    )));
                }
                if hc.timeout > hc.interval {
                    warnings.push(ConfigWarning::warning(format!(
                        "unit '{}' healthcheck timeout exceeds its interval",
                        unit.name
                    )));
                }
                if let ProbeKind::Exec { command } = &hc.probe {
                    warn_missing_binary(&mut warnings, &unit.name, "healthcheck", command);
                }
            }

            if unit.kind == UnitKind::Service {
                warn_missing_binary(&mut warnings, &unit.name, "command", &unit.command);
                if unit.depends_on.is_empty() && unit.healthcheck.is_none() {
                    continue;
                }
                if unit.healthcheck.is_none() {
                    warnings.push(ConfigWarning::warning(format!(
                        "unit '{}' has no healthcheck; dependents treat it as ready once started",
                        unit.name
                    )));
                }
            }
        }

        for unit in &self.units {
            for dep in &unit.depends_on {
                if let Some(d) = self.unit(dep) {
                    if d.kind == UnitKind::Service && d.restart == RestartPolicy::Never && d.healthcheck.is_none() {
                        warnings.push(ConfigWarning::warning(format!(
                            "unit '{}' depends on '{}', which has neither a healthcheck nor a restart policy",
                            unit.name, dep
                        )));
                    }
                }
            }
        }

        warnings
    }
}

/// Per-unit structural problems as messages.
fn unit_errors(unit: &UnitConfig) -> Vec<String> {
    let mut errors = Vec::new();
    let name = &unit.name;
    match unit.kind {
        UnitKind::Service => {
            if unit.command.is_empty() || unit.command[0].trim().is_empty() {
                errors.push(format!("unit '{name}' has an empty command"));
            }
            if !unit.steps.is_empty() {
                errors.push(format!("unit '{name}' declares steps but is not kind: init"));
            }
        }
        UnitKind::Init => {
            if unit.steps.is_empty() {
                errors.push(format!("init unit '{name}' declares no steps"));
            }
            if !unit.command.is_empty() {
                errors.push(format!(
                    "init unit '{name}' must use steps instead of command"
                ));
            }
            let mut step_names = HashSet::new();
            for step in &unit.steps {
                if step.command.is_empty() || step.command[0].trim().is_empty() {
                    errors.push(format!(
                        "step '{}' of unit '{name}' has an empty command",
                        step.name
                    ));
                }
                if !step_names.insert(step.name.as_str()) {
                    errors.push(format!(
                        "step '{}' appears twice in unit '{name}'",
                        step.name
                    ));
                }
            }
        }
    }

    if let Some(hc) = &unit.healthcheck {
        if hc.retries == 0 {
            errors.push(format!("unit '{name}' healthcheck retries must be at least 1"));
        }
        if hc.interval.is_zero() {
            errors.push(format!("unit '{name}' healthcheck interval must be positive"));
        }
        if hc.timeout.is_zero() {
            errors.push(format!("unit '{name}' healthcheck timeout must be positive"));
        }
        match &hc.probe {
            ProbeKind::Exec { command } if command.is_empty() => {
                errors.push(format!("unit '{name}' exec probe has an empty command"));
            }
            ProbeKind::Tcp { address } if !address.contains(':') => {
                errors.push(format!(
                    "unit '{name}' tcp probe address '{address}' must be host:port"
                ));
            }
            ProbeKind::Http { url } if !(url.starts_with("http://") || url.starts_with("https://")) => {
                errors.push(format!("unit '{name}' http probe url '{url}' must be http(s)"));
            }
            _ => {}
        }
    }

    if let (Some(limit), Some(reservation)) =
        (unit.resources.memory_limit, unit.resources.memory_reservation)
    {
        if reservation > limit {
            errors.push(format!(
                "unit '{name}' memory_reservation exceeds memory_limit"
            ));
        }
    }

    errors
}

fn warn_missing_binary(
    warnings: &mut Vec<ConfigWarning>,
    unit: &str,
    field: &str,
    command: &[String],
) {
    let Some(program) = command.first() else {
        return;
    };
    // Interpolated or path-qualified programs are resolved at start time.
    if program.contains('$') || program.contains('/') {
        return;
    }
    if which::which(program).is_err() {
        warnings.push(ConfigWarning::warning(format!(
            "unit '{unit}' {field} program '{program}' was not found on PATH"
        )));
    }
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

/// Accept either an argv list or a shell string (run through `sh -c`).
fn deserialize_command<'de, D>(d: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Shell(String),
        Argv(Vec<String>),
    }
    Ok(match Raw::deserialize(d)? {
        Raw::Shell(s) if s.trim().is_empty() => Vec::new(),
        Raw::Shell(s) => vec!["sh".to_string(), "-c".to_string(), s],
        Raw::Argv(v) => v,
    })
}

/// Durations as humantime strings (`15s`, `2m`, `1h 30m`).
pub mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(s.trim()).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s: Option<String> = Option::deserialize(deserializer)?;
            s.map(|s| humantime::parse_duration(s.trim()).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
