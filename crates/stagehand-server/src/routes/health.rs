use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::state::AppState;

/// GET /health: 200 once every unit is Running and Healthy or Completed,
/// 503 otherwise. The body lists the units holding the deployment back.
pub async fn health(State(app): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let snapshot = app.status.snapshot();
    let pending: Vec<serde_json::Value> = snapshot
        .iter()
        .filter(|s| !s.is_settled_ok())
        .map(|s| {
            serde_json::json!({
                "name": s.name,
                "phase": s.phase,
                "health": s.health,
            })
        })
        .collect();

    let healthy = pending.is_empty();
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = serde_json::json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "deployment": app.status.deployment,
        "instance": app.status.instance,
        "units": snapshot.len(),
        "pending": pending,
        "started_at": app.started_at,
    });
    (code, Json(body))
}
