//! Administrator verification endpoints.
//!
//! - `POST /api/auth/admin-check` tells whether a submitted address is the
//!   administrator's. Guessing it is worth automating, so it sits behind
//!   the strict rate limiter.
//! - `GET /api/admin/check` tells whether the current session belongs to the
//!   administrator.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::session::lookup_session;
use crate::state::AppState;
use crate::validation::validate_email;

#[derive(Debug, Deserialize)]
struct AdminCheckRequest {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AdminCheckResponse {
    is_admin: bool,
}

/// Create the admin check router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/admin-check", post(verify_admin_email))
        .route("/api/admin/check", get(current_user_is_admin))
}

/// Check a submitted email against the configured administrator.
async fn verify_admin_email(
    State(state): State<AppState>,
    payload: Result<Json<AdminCheckRequest>, JsonRejection>,
) -> AppResult<Json<AdminCheckResponse>> {
    let email = payload
        .ok()
        .and_then(|Json(body)| body.email)
        .ok_or_else(|| AppError::BadRequest("Email is required".to_string()))?;

    let email = validate_email(&email)?;

    let admin_email = state
        .gate()
        .admin_email()
        .ok_or(AppError::Configuration("ADMIN_EMAIL environment variable not set"))?;

    Ok(Json(AdminCheckResponse {
        is_admin: email == admin_email,
    }))
}

/// Report whether the caller's session is the administrator's.
///
/// Lookup failures answer `false` rather than an error.
async fn current_user_is_admin(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<AdminCheckResponse> {
    let identity = match lookup_session(state.sessions(), &headers, state.auth_timeout()).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!(error = %e, "admin check session lookup failed");
            state.metrics().session_lookup_failures.inc();
            None
        }
    };

    let is_admin = identity
        .as_ref()
        .is_some_and(|identity| state.gate().is_admin(identity));

    Json(AdminCheckResponse { is_admin })
}
