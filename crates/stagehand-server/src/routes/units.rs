use axum::extract::{Path, State};
use axum::Json;
use stagehand_core::unit::UnitSnapshot;

use crate::error::AppError;
use crate::state::AppState;

/// GET /api/units: every unit in declaration order.
pub async fn list_units(State(app): State<AppState>) -> Json<Vec<UnitSnapshot>> {
    Json(app.status.snapshot())
}

/// GET /api/units/{name}
pub async fn get_unit(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<UnitSnapshot>, AppError> {
    app.status
        .board
        .unit_snapshot(&name)
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("unit '{name}' not found")))
}
