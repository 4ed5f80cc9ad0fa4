//! Read-only HTTP view of a running deployment.
//!
//! Every handler reads from the [`StatusHandle`] the orchestrator hands out;
//! nothing here can change unit state.

pub mod error;
pub mod routes;
pub mod state;

use axum::routing::get;
use axum::Router;
use stagehand_runtime::StatusHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the axum Router with all status routes and middleware.
/// Used by `serve_on()` and available for integration testing.
pub fn build_router(status: StatusHandle) -> Router {
    let app_state = state::AppState::new(status);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health::health))
        .route("/api/units", get(routes::units::list_units))
        .route("/api/units/{name}", get(routes::units::get_unit))
        .route("/api/toggles", get(routes::toggles::list_toggles))
        .route("/api/events", get(routes::events::sse_events))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Serve the status API on a pre-bound listener until `shutdown` fires.
///
/// Taking a bound listener lets the caller bind port 0 and read the actual
/// address before serving.
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    status: StatusHandle,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    let app = build_router(status);

    tracing::info!(%addr, "status API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
