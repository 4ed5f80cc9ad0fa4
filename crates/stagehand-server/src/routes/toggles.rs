use axum::extract::State;
use axum::Json;

use crate::state::AppState;

/// GET /api/toggles: resolved toggle values, fixed for the process lifetime.
pub async fn list_toggles(State(app): State<AppState>) -> Json<serde_json::Value> {
    let toggles = &app.status.toggles;
    Json(serde_json::json!({
        "toggles": toggles.as_ref(),
        "enabled": toggles.enabled_names(),
    }))
}
