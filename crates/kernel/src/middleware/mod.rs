//! HTTP middleware components.
//!
//! Provides path canonicalization, the request gate (locale resolution and
//! route protection) and per-client rate limiting for API endpoints.

pub mod gate;
pub mod locale;
pub mod path;
pub mod rate_limit;

pub use gate::{GateConfig, GateDecision, RequestGate, gate_request};
pub use locale::{LocaleConfig, LocalePrefix, ResolvedLocale};
pub use path::{canonicalize_path, canonicalize_request};
pub use rate_limit::{
    RateLimitCategory, RateLimiter, RateLimiters, categorize_path, enforce_rate_limit,
    get_client_id, rate_limit_response,
};
