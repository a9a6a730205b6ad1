//! Prometheus metrics collection.
//!
//! Provides gate and rate limiter metrics in Prometheus format.

use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

/// Gate outcome labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct GateLabels {
    pub outcome: String,
}

/// Rate limiter profile labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ProfileLabels {
    pub profile: String,
}

/// Application metrics.
pub struct Metrics {
    registry: Registry,

    /// Gate decisions by outcome.
    pub gate_decisions: Family<GateLabels, Counter>,

    /// Rate limit rejections by limiter profile.
    pub rate_limit_rejections: Family<ProfileLabels, Counter>,

    /// Session lookups that failed and were treated as anonymous.
    pub session_lookup_failures: Counter,

    /// Requests forwarded to the rendering upstream.
    pub upstream_requests: Counter,
}

impl Metrics {
    /// Create a new metrics registry.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let gate_decisions = Family::<GateLabels, Counter>::default();
        registry.register(
            "gate_decisions",
            "Request gate decisions by outcome",
            gate_decisions.clone(),
        );

        let rate_limit_rejections = Family::<ProfileLabels, Counter>::default();
        registry.register(
            "rate_limit_rejections",
            "Rate limit rejections by profile",
            rate_limit_rejections.clone(),
        );

        let session_lookup_failures = Counter::default();
        registry.register(
            "session_lookup_failures",
            "Session lookups treated as anonymous after a failure",
            session_lookup_failures.clone(),
        );

        let upstream_requests = Counter::default();
        registry.register(
            "upstream_requests",
            "Requests forwarded to the rendering upstream",
            upstream_requests.clone(),
        );

        Self {
            registry,
            gate_decisions,
            rate_limit_rejections,
            session_lookup_failures,
            upstream_requests,
        }
    }

    pub fn record_gate_decision(&self, outcome: &str) {
        self.gate_decisions
            .get_or_create(&GateLabels {
                outcome: outcome.to_string(),
            })
            .inc();
    }

    pub fn record_rate_limit_rejection(&self, profile: &str) {
        self.rate_limit_rejections
            .get_or_create(&ProfileLabels {
                profile: profile.to_string(),
            })
            .inc();
    }

    /// Encode all metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!(error = %e, "failed to encode metrics");
        }
        buffer
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}
