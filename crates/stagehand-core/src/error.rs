use thiserror::Error;

use crate::graph::CycleError;

#[derive(Debug, Error)]
pub enum StagehandError {
    #[error("config not found: create stagehand.yaml or pass --config")]
    ConfigNotFound,

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid unit name '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidUnitName(String),

    #[error("unit declared more than once: {0}")]
    DuplicateUnit(String),

    #[error("unit '{unit}' depends on unknown unit '{dependency}'")]
    UnknownDependency { unit: String, dependency: String },

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("unknown feature toggle: {0}")]
    UnknownToggle(String),

    #[error("invalid value '{value}' for toggle {name}: expected true/false, yes/no, on/off or 1/0")]
    InvalidToggleValue { name: String, value: String },

    #[error("unit '{unit}' is missing required environment: {}", vars.join(", "))]
    MissingEnv { unit: String, vars: Vec<String> },

    #[error("invalid duration '{0}'")]
    InvalidDuration(String),

    #[error("invalid memory size '{0}': expected a number with an optional K/M/G/T suffix")]
    InvalidMemorySize(String),

    #[error("marker store error: {0}")]
    Marker(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StagehandError {
    /// True for the errors that must abort startup before any unit runs.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound
                | Self::InvalidConfig(_)
                | Self::InvalidUnitName(_)
                | Self::DuplicateUnit(_)
                | Self::UnknownDependency { .. }
                | Self::Cycle(_)
                | Self::UnknownToggle(_)
                | Self::InvalidToggleValue { .. }
                | Self::MissingEnv { .. }
                | Self::InvalidDuration(_)
                | Self::InvalidMemorySize(_)
                | Self::Yaml(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StagehandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_env_lists_every_variable() {
        let err = StagehandError::MissingEnv {
            unit: "api".into(),
            vars: vec!["DATABASE_URL".into(), "REDIS_URL".into()],
        };
        assert_eq!(
            err.to_string(),
            "unit 'api' is missing required environment: DATABASE_URL, REDIS_URL"
        );
    }

    #[test]
    fn configuration_errors_are_classified() {
        assert!(StagehandError::UnknownToggle("SKIP_GRAPHH".into()).is_configuration());
        assert!(!StagehandError::Marker("disk full".into()).is_configuration());
    }
}
