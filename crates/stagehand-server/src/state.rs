use chrono::{DateTime, Utc};
use stagehand_runtime::StatusHandle;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub status: StatusHandle,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(status: StatusHandle) -> Self {
        Self {
            status,
            started_at: Utc::now(),
        }
    }
}
