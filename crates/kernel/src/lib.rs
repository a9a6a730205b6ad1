//! Haneul edge kernel library.
//!
//! Locale resolution, admin-only route protection and per-client rate
//! limiting in front of a page-rendering upstream. The main entry point for
//! running the server is the `haneul` binary; the router is exposed here so
//! integration tests can drive it directly.

pub mod config;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod session;
pub mod state;
pub mod validation;

use axum::Router;

pub use config::Config;
pub use state::AppState;

/// Build the application router.
///
/// The gate may rewrite the request path, so it runs outside the router
/// that does the matching. Middleware order on the request path:
/// canonicalize → rate limit → gate → routes (or upstream fallback).
pub fn build_app(state: AppState) -> Router {
    let routes = Router::new()
        .merge(routes::health::router())
        .merge(routes::metrics::router())
        .merge(routes::admin_check::router())
        .fallback(routes::upstream::forward)
        .with_state(state.clone());

    Router::new()
        .fallback_service(routes)
        // Last added = first executed.
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::gate_request,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state,
            middleware::enforce_rate_limit,
        ))
        .layer(axum::middleware::from_fn(middleware::canonicalize_request))
}
