//! Request gate middleware.
//!
//! Every request outside the static exclusion set is classified here before
//! it reaches a handler:
//!
//! 1. Resolve the locale from the first path segment (default if absent).
//! 2. Strip it to get the locale-independent path.
//! 3. On protected prefixes, require a session whose email matches the
//!    administrator; otherwise redirect to `/{locale}/login` or `/{locale}/`.
//! 4. Rewrite unprefixed page paths to `/{locale}{path}` when locale-prefix
//!    routing is on.
//! 5. Pass everything else through, annotated with the resolved locale.
//!
//! The auth decision is always made before any rewrite, so a redirect can
//! never be masked by locale normalization. Decisions are made on the
//! canonical path (see [`canonicalize_path`]); a path without one is
//! rejected.

use std::borrow::Cow;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use regex::Regex;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::middleware::locale::{LocaleConfig, LocalePrefix, ResolvedLocale, rewrite_uri_path};
use crate::middleware::path::canonicalize_path;
use crate::session::{Identity, lookup_session};
use crate::state::AppState;
use crate::validation::normalize_email;

/// Header carrying the resolved locale to the rendering upstream.
pub const LOCALE_HEADER: &str = "x-locale";

/// Paths served by the kernel itself; never locale-rewritten.
const SYSTEM_PREFIXES: &[&str] = &["/api", "/health", "/metrics"];

/// Terminal outcome of the gate for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// No session on a protected path.
    RedirectLogin { locale: String },
    /// Session present but not the administrator.
    RedirectHome { locale: String },
    /// Continue with the URI rewritten to the locale-qualified `path`.
    RewriteLocale { locale: String, path: String },
    /// Continue unchanged.
    PassThrough { locale: String },
    /// The path has no canonical form.
    Reject { locale: String },
}

impl GateDecision {
    pub fn locale(&self) -> &str {
        match self {
            Self::RedirectLogin { locale }
            | Self::RedirectHome { locale }
            | Self::RewriteLocale { locale, .. }
            | Self::PassThrough { locale }
            | Self::Reject { locale } => locale,
        }
    }

    /// Label used in logs and metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::RedirectLogin { .. } => "redirect_login",
            Self::RedirectHome { .. } => "redirect_home",
            Self::RewriteLocale { .. } => "rewrite_locale",
            Self::PassThrough { .. } => "passthrough",
            Self::Reject { .. } => "reject",
        }
    }

    /// Redirect target, for the two redirect outcomes.
    pub fn location(&self) -> Option<String> {
        match self {
            Self::RedirectLogin { locale } => Some(format!("/{locale}/login")),
            Self::RedirectHome { locale } => Some(format!("/{locale}/")),
            _ => None,
        }
    }
}

/// Everything the gate needs, passed in explicitly.
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub locales: LocaleConfig,
    /// Locale-independent prefixes, without trailing slash.
    pub protected_prefixes: Vec<String>,
    /// Normalized administrator email.
    pub admin_email: Option<String>,
    pub static_exclude: Regex,
}

impl GateConfig {
    pub fn from_config(config: &Config) -> Result<Self> {
        let locales = LocaleConfig::new(
            config.supported_locales.clone(),
            config.default_locale.clone(),
            config.locale_prefix,
        )?;

        let static_exclude = Regex::new(&config.static_exclude_pattern)
            .context("STATIC_EXCLUDE_PATTERN is not a valid regex")?;

        let protected_prefixes = config
            .protected_prefixes
            .iter()
            .map(|p| normalize_prefix(p))
            .filter(|p| p != "/")
            .collect();

        Ok(Self {
            locales,
            protected_prefixes,
            admin_email: config
                .admin_email
                .as_deref()
                .map(normalize_email)
                .filter(|e| !e.is_empty()),
            static_exclude,
        })
    }
}

/// Locale resolution and route protection.
#[derive(Debug, Clone)]
pub struct RequestGate {
    config: GateConfig,
}

impl RequestGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn locales(&self) -> &LocaleConfig {
        &self.config.locales
    }

    pub fn admin_email(&self) -> Option<&str> {
        self.config.admin_email.as_deref()
    }

    /// Static assets and framework internals bypass the gate entirely.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.config.static_exclude.is_match(path)
    }

    /// Whether a locale-independent path falls under a protected prefix.
    pub fn is_protected(&self, path: &str) -> bool {
        self.config
            .protected_prefixes
            .iter()
            .any(|prefix| has_path_prefix(path, prefix))
    }

    /// Whether deciding on `path` needs the caller's session.
    pub fn requires_session(&self, path: &str) -> bool {
        canonicalize_path(path).is_some_and(|path| {
            !self.is_excluded(&path) && self.is_protected(self.config.locales.resolve(&path).path)
        })
    }

    /// Whether an identity is the configured administrator.
    ///
    /// Both sides are trimmed and lowercased. With no administrator
    /// configured nobody qualifies.
    pub fn is_admin(&self, identity: &Identity) -> bool {
        match &self.config.admin_email {
            Some(admin) => !identity.email.trim().is_empty() && normalize_email(&identity.email) == *admin,
            None => false,
        }
    }

    /// Decide what happens to a request for `path` by `identity`.
    ///
    /// Pure and synchronous: equal inputs always give equal decisions, and
    /// every spelling of a path decides like its canonical form.
    pub fn decide(&self, path: &str, identity: Option<&Identity>) -> GateDecision {
        let locales = &self.config.locales;

        let Some(canonical) = canonicalize_path(path) else {
            return GateDecision::Reject {
                locale: locales.default_locale().to_string(),
            };
        };
        let path = canonical.as_ref();

        if self.is_excluded(path) {
            return GateDecision::PassThrough {
                locale: locales.default_locale().to_string(),
            };
        }

        let resolved = locales.resolve(path);
        let locale = resolved.locale.to_string();

        if self.is_protected(resolved.path) {
            let Some(identity) = identity else {
                return GateDecision::RedirectLogin { locale };
            };
            if !self.is_admin(identity) {
                return GateDecision::RedirectHome { locale };
            }
        }

        if locales.prefix_mode() == LocalePrefix::Always
            && !resolved.prefixed
            && !is_system_path(resolved.path)
        {
            let path = locales.localized(&locale, resolved.path);
            return GateDecision::RewriteLocale { locale, path };
        }

        GateDecision::PassThrough { locale }
    }
}

/// Middleware applying the [`RequestGate`] to every request.
///
/// Expects the path already canonicalized by
/// [`canonicalize_request`](crate::middleware::canonicalize_request); any
/// other path is rejected. The session is only looked up for protected
/// paths; a failed or timed-out lookup counts as no session.
pub async fn gate_request(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let gate = state.gate();
    let path = request.uri().path().to_string();

    if !matches!(canonicalize_path(&path), Some(Cow::Borrowed(_))) {
        warn!(path = %path, "non-canonical path reached the gate");
        state.metrics().record_gate_decision("reject");
        return invalid_path();
    }

    if gate.is_excluded(&path) {
        return next.run(request).await;
    }

    let identity = if gate.requires_session(&path) {
        match lookup_session(state.sessions(), request.headers(), state.auth_timeout()).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(error = %e, path = %path, "session lookup failed; treating request as anonymous");
                state.metrics().session_lookup_failures.inc();
                None
            }
        }
    } else {
        None
    };

    let decision = gate.decide(&path, identity.as_ref());
    state.metrics().record_gate_decision(decision.outcome());
    debug!(
        path = %path,
        outcome = decision.outcome(),
        locale = decision.locale(),
        "gate decision"
    );

    if let Some(location) = decision.location() {
        return Redirect::temporary(&location).into_response();
    }

    if let GateDecision::Reject { .. } = decision {
        return invalid_path();
    }

    if let GateDecision::RewriteLocale { path: rewritten, .. } = &decision {
        match rewrite_uri_path(request.uri(), rewritten) {
            Ok(uri) => *request.uri_mut() = uri,
            Err(e) => warn!(error = %e, path = %rewritten, "failed to rewrite locale path"),
        }
    }

    annotate_locale(&mut request, decision.locale());
    next.run(request).await
}

fn invalid_path() -> Response {
    AppError::BadRequest("Invalid request path".to_string()).into_response()
}

/// Attach the resolved locale to the request for downstream consumers.
fn annotate_locale(request: &mut Request<Body>, locale: &str) {
    request
        .extensions_mut()
        .insert(ResolvedLocale(locale.to_string()));
    if let Ok(value) = HeaderValue::from_str(locale) {
        request.headers_mut().insert(LOCALE_HEADER, value);
    }
}

/// True when `path` is `prefix` itself or lies beneath it.
fn has_path_prefix(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

fn is_system_path(path: &str) -> bool {
    SYSTEM_PREFIXES
        .iter()
        .any(|prefix| has_path_prefix(path, prefix))
}

/// Normalize a configured prefix to `/segment[/segment...]`.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    format!("/{trimmed}")
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const ADMIN: &str = "admin@haneul.blog";

    fn gate_with(prefix: LocalePrefix, admin: Option<&str>) -> RequestGate {
        let config = Config {
            locale_prefix: prefix,
            admin_email: admin.map(str::to_string),
            ..Config::default()
        };
        RequestGate::new(GateConfig::from_config(&config).unwrap())
    }

    fn gate() -> RequestGate {
        gate_with(LocalePrefix::Always, Some(ADMIN))
    }

    fn identity(email: &str) -> Identity {
        Identity {
            user_id: "00000000-0000-0000-0000-000000000001".to_string(),
            email: email.to_string(),
        }
    }

    fn login(locale: &str) -> GateDecision {
        GateDecision::RedirectLogin {
            locale: locale.to_string(),
        }
    }

    fn home(locale: &str) -> GateDecision {
        GateDecision::RedirectHome {
            locale: locale.to_string(),
        }
    }

    fn pass(locale: &str) -> GateDecision {
        GateDecision::PassThrough {
            locale: locale.to_string(),
        }
    }

    #[test]
    fn static_paths_pass_regardless_of_auth() {
        let gate = gate();
        let visitor = identity("someone@else.com");
        for path in [
            "/_next/static/chunks/main.js",
            "/_next/static/css/app.css",
            "/_next/image",
            "/favicon.ico",
            "/dashboard/logo.png",
            "/en/profile/avatar.JPG.jpg",
            "/images/hero.svg",
        ] {
            assert!(gate.is_excluded(path), "{path} should be excluded");
            assert_eq!(gate.decide(path, None), pass("ko"), "{path}");
            assert_eq!(gate.decide(path, Some(&visitor)), pass("ko"), "{path}");
            assert!(!gate.requires_session(path));
        }
    }

    #[test]
    fn non_static_lookalikes_are_gated() {
        let gate = gate();
        assert!(!gate.is_excluded("/favicon.ico.html"));
        assert!(!gate.is_excluded("/_next/staticky"));
        assert!(!gate.is_excluded("/static/app.js"));
        assert!(!gate.is_excluded("/posts/png-tips"));
    }

    #[test]
    fn protected_without_session_redirects_to_login() {
        let gate = gate();
        assert_eq!(gate.decide("/dashboard", None), login("ko"));
        assert_eq!(gate.decide("/en/dashboard", None), login("en"));
        assert_eq!(gate.decide("/ko/profile", None), login("ko"));
        assert_eq!(gate.decide("/en/dashboard/posts/new", None), login("en"));
        assert_eq!(
            gate.decide("/dashboard", None).location().as_deref(),
            Some("/ko/login")
        );
    }

    #[test]
    fn non_canonical_protected_paths_redirect() {
        let gate = gate();
        for path in [
            "/en//dashboard",
            "/en/./dashboard",
            "/en/%64ashboard",
            "/en/posts/../dashboard",
            "/en/dashboard/./",
        ] {
            assert_eq!(gate.decide(path, None), login("en"), "{path}");
            assert!(gate.requires_session(path), "{path}");
        }
        for path in ["//dashboard", "/%64ashboard", "/./profile", "/_next/static/../../dashboard"] {
            assert_eq!(gate.decide(path, None), login("ko"), "{path}");
        }
        let visitor = identity("reader@example.com");
        assert_eq!(gate.decide("/en//profile", Some(&visitor)), home("en"));
    }

    #[test]
    fn rewrites_use_the_canonical_path() {
        let gate = gate();
        assert_eq!(
            gate.decide("//posts/./hello", None),
            GateDecision::RewriteLocale {
                locale: "ko".to_string(),
                path: "/ko/posts/hello".to_string(),
            }
        );
    }

    #[test]
    fn paths_without_canonical_form_are_rejected() {
        let gate = gate();
        let decision = gate.decide("/en/%2Fdashboard", None);
        assert_eq!(
            decision,
            GateDecision::Reject {
                locale: "ko".to_string()
            }
        );
        assert_eq!(decision.outcome(), "reject");
        assert_eq!(decision.location(), None);
        assert!(!gate.requires_session("/en/%2Fdashboard"));
    }

    #[test]
    fn invalid_locale_segment_uses_default() {
        let gate = gate();
        // "/fr" is not a locale, so the path is not under /dashboard
        assert_eq!(
            gate.decide("/fr/dashboard", None),
            GateDecision::RewriteLocale {
                locale: "ko".to_string(),
                path: "/ko/fr/dashboard".to_string(),
            }
        );
        assert_eq!(gate.decide("/EN/profile", None).locale(), "ko");
    }

    #[test]
    fn non_admin_session_redirects_home() {
        let gate = gate();
        let visitor = identity("reader@example.com");
        assert_eq!(gate.decide("/dashboard", Some(&visitor)), home("ko"));
        assert_eq!(gate.decide("/en/profile", Some(&visitor)), home("en"));
        assert_eq!(
            gate.decide("/en/profile", Some(&visitor)).location().as_deref(),
            Some("/en/")
        );
    }

    #[test]
    fn admin_session_passes() {
        let gate = gate();
        let admin = identity(ADMIN);
        assert_eq!(gate.decide("/en/dashboard", Some(&admin)), pass("en"));
        assert_eq!(gate.decide("/ko/profile", Some(&admin)), pass("ko"));
    }

    #[test]
    fn admin_unprefixed_protected_path_is_rewritten() {
        let gate = gate();
        let admin = identity(ADMIN);
        assert_eq!(
            gate.decide("/dashboard", Some(&admin)),
            GateDecision::RewriteLocale {
                locale: "ko".to_string(),
                path: "/ko/dashboard".to_string(),
            }
        );
    }

    #[test]
    fn admin_email_comparison_is_normalized() {
        let gate = gate_with(LocalePrefix::Always, Some("  Admin@Haneul.Blog "));
        assert!(gate.is_admin(&identity("admin@haneul.blog")));
        assert!(gate.is_admin(&identity("ADMIN@HANEUL.BLOG\n")));
        assert!(!gate.is_admin(&identity("admin@haneul.blog.evil")));
    }

    #[test]
    fn no_admin_configured_means_nobody_is_admin() {
        let gate = gate_with(LocalePrefix::Always, None);
        assert!(!gate.is_admin(&identity(ADMIN)));
        assert!(!gate.is_admin(&identity("")));
        assert_eq!(gate.decide("/en/dashboard", Some(&identity(ADMIN))), home("en"));
    }

    #[test]
    fn empty_email_is_never_admin() {
        let gate = gate();
        assert!(!gate.is_admin(&identity("   ")));
    }

    #[test]
    fn prefix_match_respects_segments() {
        let gate = gate();
        assert!(gate.is_protected("/dashboard"));
        assert!(gate.is_protected("/dashboard/"));
        assert!(gate.is_protected("/profile/edit"));
        assert!(!gate.is_protected("/dashboards"));
        assert!(!gate.is_protected("/posts/dashboard"));
        assert!(!gate.is_protected("/"));
    }

    #[test]
    fn unprefixed_page_is_rewritten() {
        let gate = gate();
        assert_eq!(
            gate.decide("/posts/hello-world", None),
            GateDecision::RewriteLocale {
                locale: "ko".to_string(),
                path: "/ko/posts/hello-world".to_string(),
            }
        );
        assert_eq!(
            gate.decide("/", None),
            GateDecision::RewriteLocale {
                locale: "ko".to_string(),
                path: "/ko/".to_string(),
            }
        );
    }

    #[test]
    fn prefixed_page_passes() {
        let gate = gate();
        assert_eq!(gate.decide("/en/posts/hello-world", None), pass("en"));
        assert_eq!(gate.decide("/ko", None), pass("ko"));
        assert_eq!(gate.decide("/en/login", None), pass("en"));
    }

    #[test]
    fn system_paths_are_not_rewritten() {
        let gate = gate();
        assert_eq!(gate.decide("/api/admin/check", None), pass("ko"));
        assert_eq!(gate.decide("/health", None), pass("ko"));
        assert_eq!(gate.decide("/metrics", None), pass("ko"));
        // Only whole segments count as system paths
        assert!(matches!(
            gate.decide("/apiary", None),
            GateDecision::RewriteLocale { .. }
        ));
    }

    #[test]
    fn never_mode_skips_rewrite() {
        let gate = gate_with(LocalePrefix::Never, Some(ADMIN));
        assert_eq!(gate.decide("/posts", None), pass("ko"));
        assert_eq!(gate.decide("/dashboard", None), login("ko"));
        assert_eq!(gate.decide("/dashboard", Some(&identity(ADMIN))), pass("ko"));
    }

    #[test]
    fn decisions_are_idempotent() {
        let gate = gate();
        let visitor = identity("reader@example.com");
        let admin = identity(ADMIN);
        for path in ["/dashboard", "/en/profile", "/posts", "/en", "/favicon.ico"] {
            for who in [None, Some(&visitor), Some(&admin)] {
                assert_eq!(gate.decide(path, who), gate.decide(path, who), "{path}");
            }
        }
    }

    #[test]
    fn requires_session_only_for_protected_paths() {
        let gate = gate();
        assert!(gate.requires_session("/dashboard"));
        assert!(gate.requires_session("/en/profile/settings"));
        assert!(!gate.requires_session("/en/posts"));
        assert!(!gate.requires_session("/api/admin/check"));
    }

    #[test]
    fn configured_prefixes_are_normalized() {
        let config = Config {
            protected_prefixes: vec!["admin/".to_string(), " /drafts ".to_string(), "/".to_string()],
            ..Config::default()
        };
        let gate = RequestGate::new(GateConfig::from_config(&config).unwrap());
        assert!(gate.is_protected("/admin/users"));
        assert!(gate.is_protected("/drafts"));
        assert!(!gate.is_protected("/"));
        assert!(!gate.is_protected("/dashboard"));
    }

    #[test]
    fn invalid_exclude_pattern_is_rejected() {
        let config = Config {
            static_exclude_pattern: "(".to_string(),
            ..Config::default()
        };
        assert!(GateConfig::from_config(&config).is_err());
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(login("ko").outcome(), "redirect_login");
        assert_eq!(home("ko").outcome(), "redirect_home");
        assert_eq!(pass("ko").outcome(), "passthrough");
        assert_eq!(pass("en").location(), None);
    }
}
