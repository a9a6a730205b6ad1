//! Health check endpoint.
//!
//! Always 200 while the server is serving; auth service reachability is
//! reported for information only, since the gate fails closed without it.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    auth: bool,
    timestamp: String,
}

/// Health check handler.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let auth = state.sessions().healthy().await;

    Json(HealthResponse {
        status: "healthy",
        auth,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Create the health check router.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
