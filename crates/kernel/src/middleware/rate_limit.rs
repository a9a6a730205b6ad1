//! In-process rate limiting with fixed-window counters.
//!
//! Each identifier gets a window that opens on its first request and lasts
//! `window`. Requests inside the window are counted until `max_requests` is
//! reached; once the window has lapsed the entry is treated as absent and
//! the next request opens a fresh one. Adjacent windows can therefore admit
//! up to twice the limit around a boundary.
//!
//! Counters live in process memory, so every instance of the server keeps
//! its own tally.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RateLimitProfile;
use crate::state::AppState;

/// Counter state for one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RateLimitEntry {
    count: u32,
    window_reset_at: DateTime<Utc>,
}

/// Fixed-window rate limiter.
///
/// Cloning is cheap and clones share counters.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<RateLimiterInner>,
}

struct RateLimiterInner {
    max_requests: u32,
    window: Duration,
    entries: DashMap<String, RateLimitEntry>,
}

impl RateLimiter {
    /// Create a limiter admitting `max_requests` per `window`.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            inner: Arc::new(RateLimiterInner {
                max_requests,
                window,
                entries: DashMap::new(),
            }),
        }
    }

    pub fn from_profile(profile: RateLimitProfile) -> Self {
        Self::new(profile.max_requests, profile.window)
    }

    pub fn max_requests(&self) -> u32 {
        self.inner.max_requests
    }

    pub fn window(&self) -> Duration {
        self.inner.window
    }

    fn window_delta(&self) -> TimeDelta {
        TimeDelta::from_std(self.inner.window).unwrap_or(TimeDelta::MAX)
    }

    /// Record one request for `identifier` if it is under its limit.
    ///
    /// Returns false, recording nothing, once the limit is reached.
    pub fn is_allowed(&self, identifier: &str) -> bool {
        self.is_allowed_at(identifier, Utc::now())
    }

    /// [`is_allowed`](Self::is_allowed) against an explicit clock reading.
    pub fn is_allowed_at(&self, identifier: &str, now: DateTime<Utc>) -> bool {
        let window_reset_at = now.checked_add_signed(self.window_delta()).unwrap_or(now);

        // The entry guard holds the shard lock, so check-and-increment is
        // atomic per identifier.
        let mut entry = self
            .inner
            .entries
            .entry(identifier.to_string())
            .or_insert(RateLimitEntry {
                count: 0,
                window_reset_at,
            });

        if now >= entry.window_reset_at {
            *entry = RateLimitEntry {
                count: 0,
                window_reset_at,
            };
        }

        if entry.count >= self.inner.max_requests {
            return false;
        }

        entry.count += 1;
        true
    }

    /// Requests left in the current window, or the full budget when no
    /// window is active.
    pub fn remaining(&self, identifier: &str) -> u32 {
        self.remaining_at(identifier, Utc::now())
    }

    pub fn remaining_at(&self, identifier: &str, now: DateTime<Utc>) -> u32 {
        match self.inner.entries.get(identifier) {
            Some(entry) if now < entry.window_reset_at => {
                self.inner.max_requests.saturating_sub(entry.count)
            }
            _ => self.inner.max_requests,
        }
    }

    /// When the identifier's window expires; now if it has no entry.
    pub fn reset_time(&self, identifier: &str) -> DateTime<Utc> {
        self.reset_time_at(identifier, Utc::now())
    }

    pub fn reset_time_at(&self, identifier: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        self.inner
            .entries
            .get(identifier)
            .map(|entry| entry.window_reset_at)
            .unwrap_or(now)
    }

    /// Number of identifiers currently tracked.
    pub fn tracked(&self) -> usize {
        self.inner.entries.len()
    }

    /// Remove every entry whose window has expired.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.inner.entries.len();
        self.inner
            .entries
            .retain(|_, entry| now < entry.window_reset_at);
        before.saturating_sub(self.inner.entries.len())
    }

    /// Sweep expired entries every `window` until `shutdown` is cancelled.
    pub fn spawn_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(limiter.window().max(Duration::from_millis(1)));
            // The first tick completes immediately; nothing to sweep yet.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = limiter.sweep();
                        if removed > 0 {
                            debug!(removed, remaining = limiter.tracked(), "swept expired rate limit entries");
                        }
                    }
                    _ = shutdown.cancelled() => {
                        debug!("rate limit sweeper stopping");
                        break;
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_requests", &self.inner.max_requests)
            .field("window", &self.inner.window)
            .field("tracked", &self.inner.entries.len())
            .finish()
    }
}

/// Which limiter guards an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitCategory {
    /// Admin verification endpoints.
    Strict,
    /// All other API endpoints.
    Normal,
}

impl RateLimitCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Normal => "normal",
        }
    }
}

/// The two limiter profiles the server runs with.
#[derive(Debug, Clone)]
pub struct RateLimiters {
    pub strict: RateLimiter,
    pub normal: RateLimiter,
}

impl RateLimiters {
    pub fn new(strict: RateLimitProfile, normal: RateLimitProfile) -> Self {
        Self {
            strict: RateLimiter::from_profile(strict),
            normal: RateLimiter::from_profile(normal),
        }
    }

    pub fn get(&self, category: RateLimitCategory) -> &RateLimiter {
        match category {
            RateLimitCategory::Strict => &self.strict,
            RateLimitCategory::Normal => &self.normal,
        }
    }

    /// Start one sweeper per limiter.
    pub fn spawn_sweepers(&self, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
        vec![
            self.strict.spawn_sweeper(shutdown.child_token()),
            self.normal.spawn_sweeper(shutdown.child_token()),
        ]
    }
}

/// Categorize a request path for rate limiting.
///
/// Returns None for paths that are not rate limited.
pub fn categorize_path(path: &str, method: &Method) -> Option<RateLimitCategory> {
    if (path == "/api/auth/admin-check" && method == Method::POST) || path == "/api/admin/check" {
        Some(RateLimitCategory::Strict)
    } else if path == "/api" || path.starts_with("/api/") {
        Some(RateLimitCategory::Normal)
    } else {
        None
    }
}

/// Get the client identifier (IP address) for rate limiting.
pub fn get_client_id(addr: Option<SocketAddr>, headers: &HeaderMap) -> String {
    // Check X-Forwarded-For header first (for proxied requests)
    if let Some(forwarded) = headers.get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(ip) = value.split(',').next()
        && !ip.trim().is_empty()
    {
        return ip.trim().to_string();
    }

    // Check X-Real-IP header
    if let Some(real_ip) = headers.get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
        && !value.trim().is_empty()
    {
        return value.trim().to_string();
    }

    addr.map(|a| a.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Headers advertising the limiter state to the client.
fn rate_limit_headers(limit: u32, remaining: u32, reset: DateTime<Utc>) -> [(&'static str, HeaderValue); 3] {
    [
        ("x-ratelimit-limit", HeaderValue::from(limit)),
        ("x-ratelimit-remaining", HeaderValue::from(remaining)),
        ("x-ratelimit-reset", HeaderValue::from(reset.timestamp())),
    ]
}

/// Rate limit exceeded response.
pub fn rate_limit_response(limit: u32, reset: DateTime<Utc>, now: DateTime<Utc>) -> Response {
    // Round up so clients never retry a fraction of a second too early
    let retry_after = u64::try_from((reset - now).num_milliseconds())
        .unwrap_or(0)
        .div_ceil(1000);

    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        [("retry-after", HeaderValue::from(retry_after))],
        Json(json!({
            "error": "Too many requests. Please try again later.",
            "resetTime": reset.to_rfc3339(),
        })),
    )
        .into_response();

    for (name, value) in rate_limit_headers(limit, 0, reset) {
        response.headers_mut().insert(name, value);
    }
    response
}

/// Middleware enforcing the strict and normal limiters on API routes.
pub async fn enforce_rate_limit(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(category) = categorize_path(request.uri().path(), request.method()) else {
        return next.run(request).await;
    };

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = get_client_id(peer, request.headers());
    let identifier = format!("{}:{client}", category.as_str());
    let limiter = state.rate_limiters().get(category);
    let now = Utc::now();

    if !limiter.is_allowed_at(&identifier, now) {
        warn!(
            category = category.as_str(),
            client = %client,
            path = %request.uri().path(),
            "rate limit exceeded"
        );
        state.metrics().record_rate_limit_rejection(category.as_str());
        return rate_limit_response(
            limiter.max_requests(),
            limiter.reset_time_at(&identifier, now),
            now,
        );
    }

    let remaining = limiter.remaining_at(&identifier, now);
    let reset = limiter.reset_time_at(&identifier, now);

    let mut response = next.run(request).await;
    for (name, value) in rate_limit_headers(limiter.max_requests(), remaining, reset) {
        response.headers_mut().insert(name, value);
    }
    response
}
