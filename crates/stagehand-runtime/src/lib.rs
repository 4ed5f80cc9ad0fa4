//! `stagehand-runtime`: the async half of stagehand.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator
//!     │  one task per unit, spawned in dependency order
//!     ▼
//! Supervisor ──► DependencyGate::await_ready   (watch channels on StatusBoard)
//!     │
//!     ├─ service ──► UnitProcess + HealthProbe  ──► RestartTracker
//!     └─ init    ──► OnceInitializer            ──► MarkerStore lease + marker
//!     │
//!     ▼
//! UnitWriter ──► EventBus (broadcast + tracing)
//! ```

pub mod error;
pub mod events;
pub mod gate;
pub mod initializer;
pub mod orchestrator;
pub mod probe;
pub mod process;
pub mod status;
pub mod supervisor;

pub use error::{Result, RuntimeError};
pub use events::EventBus;
pub use gate::{DependencyGate, GateOutcome};
pub use initializer::{CommandStep, InitOutcome, InitStep, OnceInitializer};
pub use orchestrator::{Orchestrator, OrchestratorHandle, StatusHandle};
pub use status::StatusBoard;
