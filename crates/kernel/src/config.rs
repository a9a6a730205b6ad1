//! Configuration loaded from environment variables.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::middleware::locale::LocalePrefix;
use crate::validation::normalize_email;

/// Paths that bypass the request gate entirely: the renderer's build
/// artifacts and image optimizer, the favicon, and common image extensions.
pub const DEFAULT_STATIC_EXCLUDE_PATTERN: &str =
    r"^/(?:_next/static/|_next/image|favicon\.ico$)|\.(?:svg|png|jpg|jpeg|gif|webp)$";

/// Request budget for one rate limit profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitProfile {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitProfile {
    /// Security-sensitive endpoints: 5 requests per 15 minutes.
    pub const STRICT: Self = Self {
        max_requests: 5,
        window: Duration::from_secs(15 * 60),
    };

    /// General API traffic: 100 requests per 15 minutes.
    pub const NORMAL: Self = Self {
        max_requests: 100,
        window: Duration::from_secs(15 * 60),
    };

    /// Parse a profile written as `max/window_secs`, e.g. `5/900`.
    pub fn parse(value: &str) -> Result<Self> {
        let (max, secs) = value
            .split_once('/')
            .context("rate limit must be written as `max/window_secs`")?;

        let max_requests = max
            .trim()
            .parse::<u32>()
            .context("rate limit max must be a valid u32")?;

        let secs = secs
            .trim()
            .parse::<u64>()
            .context("rate limit window must be a whole number of seconds")?;

        if secs == 0 {
            bail!("rate limit window must be at least one second");
        }

        Ok(Self {
            max_requests,
            window: Duration::from_secs(secs),
        })
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port (default: 3000).
    pub port: u16,

    /// The single administrator address, trimmed and lowercased.
    /// When None, nobody can reach protected areas.
    pub admin_email: Option<String>,

    /// Base URL of the hosted auth service. When None, every session
    /// lookup yields an anonymous visitor.
    pub auth_url: Option<String>,

    /// Public API key sent as the `apikey` header to the auth service.
    pub auth_anon_key: String,

    /// Cookie carrying the access token (default: `sb-access-token`).
    pub auth_cookie_name: String,

    /// Upper bound on a single session lookup (default: 5s).
    pub auth_timeout: Duration,

    /// Supported locales (default: `ko,en`).
    pub supported_locales: Vec<String>,

    /// Fallback locale (default: `ko`).
    pub default_locale: String,

    /// Whether page paths are normalized to carry a locale prefix.
    pub locale_prefix: LocalePrefix,

    /// Route prefixes reserved for the administrator.
    pub protected_prefixes: Vec<String>,

    /// Regex of paths excluded from the gate.
    pub static_exclude_pattern: String,

    /// Profile for admin verification endpoints.
    pub strict_rate_limit: RateLimitProfile,

    /// Profile for all other API endpoints.
    pub normal_rate_limit: RateLimitProfile,

    /// Page-rendering upstream that receives requests surviving the gate.
    pub upstream_url: Option<String>,

    /// CORS allowed origins (comma-separated, default: "*").
    pub cors_allowed_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            admin_email: None,
            auth_url: None,
            auth_anon_key: String::new(),
            auth_cookie_name: "sb-access-token".to_string(),
            auth_timeout: Duration::from_secs(5),
            supported_locales: vec!["ko".to_string(), "en".to_string()],
            default_locale: "ko".to_string(),
            locale_prefix: LocalePrefix::Always,
            protected_prefixes: vec!["/dashboard".to_string(), "/profile".to_string()],
            static_exclude_pattern: DEFAULT_STATIC_EXCLUDE_PATTERN.to_string(),
            strict_rate_limit: RateLimitProfile::STRICT,
            normal_rate_limit: RateLimitProfile::NORMAL,
            upstream_url: None,
            cors_allowed_origins: vec!["*".to_string()],
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let port = env::var("PORT")
            .unwrap_or_else(|_| defaults.port.to_string())
            .parse::<u16>()
            .context("PORT must be a valid u16")?;

        let admin_email = non_empty_var("ADMIN_EMAIL").map(|e| normalize_email(&e));

        let auth_url = non_empty_var("AUTH_URL").map(|u| u.trim_end_matches('/').to_string());

        let auth_anon_key = env::var("AUTH_ANON_KEY").unwrap_or_default();

        let auth_cookie_name =
            non_empty_var("AUTH_COOKIE_NAME").unwrap_or(defaults.auth_cookie_name);

        let auth_timeout = env::var("AUTH_TIMEOUT_SECS")
            .ok()
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("AUTH_TIMEOUT_SECS must be a whole number of seconds")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.auth_timeout);

        let supported_locales = env::var("SUPPORTED_LOCALES")
            .map(|v| comma_list(&v))
            .unwrap_or(defaults.supported_locales);

        let default_locale = non_empty_var("DEFAULT_LOCALE").unwrap_or(defaults.default_locale);

        if !supported_locales.contains(&default_locale) {
            bail!("DEFAULT_LOCALE `{default_locale}` is not listed in SUPPORTED_LOCALES");
        }

        let locale_prefix = match env::var("LOCALE_PREFIX") {
            Ok(v) => v.parse::<LocalePrefix>().context("LOCALE_PREFIX must be `always` or `never`")?,
            Err(_) => defaults.locale_prefix,
        };

        let protected_prefixes = env::var("PROTECTED_PREFIXES")
            .map(|v| comma_list(&v))
            .unwrap_or(defaults.protected_prefixes);

        let static_exclude_pattern =
            non_empty_var("STATIC_EXCLUDE_PATTERN").unwrap_or(defaults.static_exclude_pattern);

        let strict_rate_limit = match env::var("RATE_LIMIT_STRICT") {
            Ok(v) => RateLimitProfile::parse(&v).context("invalid RATE_LIMIT_STRICT")?,
            Err(_) => defaults.strict_rate_limit,
        };

        let normal_rate_limit = match env::var("RATE_LIMIT_NORMAL") {
            Ok(v) => RateLimitProfile::parse(&v).context("invalid RATE_LIMIT_NORMAL")?,
            Err(_) => defaults.normal_rate_limit,
        };

        let upstream_url =
            non_empty_var("UPSTREAM_URL").map(|u| u.trim_end_matches('/').to_string());

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .map(|v| comma_list(&v))
            .unwrap_or(defaults.cors_allowed_origins);

        Ok(Self {
            port,
            admin_email,
            auth_url,
            auth_anon_key,
            auth_cookie_name,
            auth_timeout,
            supported_locales,
            default_locale,
            locale_prefix,
            protected_prefixes,
            static_exclude_pattern,
            strict_rate_limit,
            normal_rate_limit,
            upstream_url,
            cors_allowed_origins,
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn comma_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
