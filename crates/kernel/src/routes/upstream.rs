//! Pass-through to the page-rendering upstream.
//!
//! Requests that survive the gate and match no kernel route are forwarded
//! to `UPSTREAM_URL` with their (possibly locale-rewritten) path, query,
//! headers and body. Without an upstream, or for unknown API paths, the
//! answer is a JSON 404.

use axum::body::{Body, to_bytes};
use axum::extract::State;
use axum::http::header::{CONTENT_LENGTH, HOST};
use axum::http::{HeaderMap, HeaderName, Request};
use axum::response::Response;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Largest request body forwarded upstream (10 MiB).
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Connection-scoped headers that must not be forwarded in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Copy end-to-end headers, dropping hop-by-hop ones and those in `also_skip`.
fn forwardable_headers(headers: &HeaderMap, also_skip: &[HeaderName]) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name) && !also_skip.contains(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Fallback handler forwarding to the rendering upstream.
pub async fn forward(State(state): State<AppState>, request: Request<Body>) -> AppResult<Response> {
    let path = request.uri().path();
    if path == "/api" || path.starts_with("/api/") {
        return Err(AppError::NotFound);
    }

    let Some(base) = state.upstream_url() else {
        return Err(AppError::NotFound);
    };

    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{base}{path_and_query}");

    let body = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| AppError::BadRequest(format!("unreadable request body: {e}")))?;

    debug!(method = %parts.method, url = %url, "forwarding to upstream");
    state.metrics().upstream_requests.inc();

    let upstream = state
        .http()
        .request(parts.method, &url)
        .headers(forwardable_headers(&parts.headers, &[HOST, CONTENT_LENGTH]))
        .body(body)
        .send()
        .await
        .map_err(|e| AppError::Upstream(e.to_string()))?;

    let status = upstream.status();
    let headers = forwardable_headers(upstream.headers(), &[CONTENT_LENGTH]);
    let bytes = upstream
        .bytes()
        .await
        .map_err(|e| AppError::Upstream(e.to_string()))?;

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}
