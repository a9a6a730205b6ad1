//! Application state shared across all handlers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::Config;
use crate::metrics::Metrics;
use crate::middleware::{GateConfig, RateLimiters, RequestGate};
use crate::session::{AnonymousSessionProvider, RemoteSessionProvider, SessionProvider};

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Locale resolution and route protection.
    gate: RequestGate,

    /// Source of caller identities.
    sessions: Arc<dyn SessionProvider>,

    /// Upper bound on one session lookup.
    auth_timeout: Duration,

    /// Strict and normal rate limiters.
    rate_limiters: RateLimiters,

    /// HTTP client for the rendering upstream.
    http: reqwest::Client,

    /// Rendering upstream base URL, if pages are proxied.
    upstream_url: Option<String>,

    /// Prometheus metrics.
    metrics: Arc<Metrics>,
}

impl AppState {
    /// Create application state from configuration.
    ///
    /// Talks to the hosted auth service when `AUTH_URL` is set; otherwise
    /// every caller is anonymous.
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;

        let sessions: Arc<dyn SessionProvider> = match &config.auth_url {
            Some(url) => {
                info!(auth_url = %url, "using remote auth service for sessions");
                Arc::new(RemoteSessionProvider::new(
                    http.clone(),
                    url.clone(),
                    config.auth_anon_key.clone(),
                    config.auth_cookie_name.clone(),
                ))
            }
            None => {
                warn!("AUTH_URL not set; all visitors are anonymous");
                Arc::new(AnonymousSessionProvider)
            }
        };

        Self::with_sessions(config, sessions, http)
    }

    /// Create application state with an explicit session provider.
    pub fn with_sessions(
        config: &Config,
        sessions: Arc<dyn SessionProvider>,
        http: reqwest::Client,
    ) -> Result<Self> {
        let gate_config = GateConfig::from_config(config).context("invalid gate configuration")?;

        if gate_config.admin_email.is_none() {
            warn!("ADMIN_EMAIL not set; protected areas are unreachable");
        }

        Ok(Self {
            inner: Arc::new(AppStateInner {
                gate: RequestGate::new(gate_config),
                sessions,
                auth_timeout: config.auth_timeout,
                rate_limiters: RateLimiters::new(config.strict_rate_limit, config.normal_rate_limit),
                http,
                upstream_url: config.upstream_url.clone(),
                metrics: Arc::new(Metrics::new()),
            }),
        })
    }

    /// Get the request gate.
    pub fn gate(&self) -> &RequestGate {
        &self.inner.gate
    }

    /// Get the session provider.
    pub fn sessions(&self) -> &Arc<dyn SessionProvider> {
        &self.inner.sessions
    }

    pub fn auth_timeout(&self) -> Duration {
        self.inner.auth_timeout
    }

    /// Get the rate limiters.
    pub fn rate_limiters(&self) -> &RateLimiters {
        &self.inner.rate_limiters
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    pub fn upstream_url(&self) -> Option<&str> {
        self.inner.upstream_url.as_deref()
    }

    /// Get the metrics registry.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("gate", &self.inner.gate)
            .field("rate_limiters", &self.inner.rate_limiters)
            .field("upstream_url", &self.inner.upstream_url)
            .finish_non_exhaustive()
    }
}
