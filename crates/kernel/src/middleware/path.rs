//! Request path canonicalization.
//!
//! Routing, rate limiting and route protection all look at one canonical
//! form of the path, and that same form is what the rendering upstream
//! receives:
//!
//! - each segment is percent-decoded and re-encoded, so `%64ashboard` and
//!   `dashboard` are the same segment;
//! - empty segments (`//`) and `.` are dropped;
//! - `..` pops the previous segment and never climbs above the root;
//! - a trailing slash is kept.
//!
//! Paths whose segments decode to a separator (`%2F`, `%5C`) or to invalid
//! UTF-8 have no canonical form and are rejected.

use std::borrow::Cow;

use axum::body::Body;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use crate::error::AppError;
use crate::middleware::locale::rewrite_uri_path;

/// Canonical form of `path`, borrowed when it is already canonical.
///
/// Returns None when the path cannot be canonicalized.
pub fn canonicalize_path(path: &str) -> Option<Cow<'_, str>> {
    let mut segments: Vec<String> = Vec::new();

    for raw in path.split('/') {
        let decoded = urlencoding::decode(raw).ok()?;
        if decoded.contains(['/', '\\']) {
            return None;
        }
        match decoded.as_ref() {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(urlencoding::encode(segment).into_owned()),
        }
    }

    let mut canonical = String::with_capacity(path.len().max(1));
    for segment in &segments {
        canonical.push('/');
        canonical.push_str(segment);
    }
    if canonical.is_empty() || path.ends_with('/') {
        canonical.push('/');
    }

    if canonical == path {
        Some(Cow::Borrowed(path))
    } else {
        Some(Cow::Owned(canonical))
    }
}

/// Middleware rewriting the request URI to its canonical path.
///
/// Runs before everything else so the rate limiter, the gate and the
/// upstream all see the same path. Paths with no canonical form get a 400.
pub async fn canonicalize_request(mut request: Request<Body>, next: Next) -> Response {
    let canonical = match canonicalize_path(request.uri().path()) {
        Some(Cow::Borrowed(_)) => None,
        Some(Cow::Owned(canonical)) => Some(canonical),
        None => {
            warn!(path = %request.uri().path(), "rejecting path with no canonical form");
            return invalid_path();
        }
    };

    if let Some(canonical) = canonical {
        match rewrite_uri_path(request.uri(), &canonical) {
            Ok(uri) => {
                debug!(from = %request.uri().path(), to = %canonical, "canonicalized request path");
                *request.uri_mut() = uri;
            }
            Err(e) => {
                warn!(error = %e, path = %canonical, "failed to canonicalize request path");
                return invalid_path();
            }
        }
    }

    next.run(request).await
}

fn invalid_path() -> Response {
    AppError::BadRequest("Invalid request path".to_string()).into_response()
}
