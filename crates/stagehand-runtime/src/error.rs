use std::time::Duration;

use stagehand_core::StagehandError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Core(#[from] StagehandError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to spawn '{program}' for unit '{unit}': {source}")]
    Spawn {
        unit: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unit '{0}' has an empty command")]
    EmptyCommand(String),

    #[error("timed out after {waited:?} waiting for the init lease on instance '{instance}'")]
    LeaseTimeout { instance: String, waited: Duration },

    #[error("init lease on instance '{0}' was lost while steps were running")]
    LeaseLost(String),

    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
