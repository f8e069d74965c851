//! Admin HTTP surface
//!
//! Read-only health and stats endpoints. The upgrade host serves them on the
//! gateway's own listener, next to the upgrade path.

use super::gateway::{Gateway, GatewayStats};
use axum::{extract::State, routing::get, Json, Router};

/// Build the admin router
pub fn create_admin_router(gateway: Gateway) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .with_state(gateway)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Gateway counters
async fn stats(State(gateway): State<Gateway>) -> Json<GatewayStats> {
    Json(gateway.stats())
}
