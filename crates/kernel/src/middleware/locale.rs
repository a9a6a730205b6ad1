//! Locale resolution.
//!
//! The first path segment selects the locale when it names a supported
//! locale; anything else resolves to the default locale. Matching is exact
//! and case-sensitive on whole segments, so `/en` and `/en/posts` carry a
//! prefix while `/enterprise` and `/EN/posts` do not.

use std::collections::HashSet;
use std::str::FromStr;

use anyhow::{Result, anyhow, bail};
use axum::http::Uri;

/// Whether page paths must carry a locale prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocalePrefix {
    /// Unprefixed page paths are rewritten to `/{locale}{path}`.
    #[default]
    Always,
    /// Paths are left as they are; the locale travels only as an annotation.
    Never,
}

impl FromStr for LocalePrefix {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            other => Err(anyhow!("unknown locale prefix mode `{other}`")),
        }
    }
}

/// The resolved locale for the current request.
///
/// Stored in request extensions for per-request access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLocale(pub String);

/// A request path split into its locale and the locale-independent rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalizedPath<'a> {
    pub locale: &'a str,
    /// Path with the locale segment removed; always starts with `/`.
    pub path: &'a str,
    /// True when the original path carried a supported locale segment.
    pub prefixed: bool,
}

/// Supported locales with one designated default.
#[derive(Debug, Clone)]
pub struct LocaleConfig {
    supported: HashSet<String>,
    default_locale: String,
    prefix: LocalePrefix,
}

impl LocaleConfig {
    pub fn new(
        supported: Vec<String>,
        default_locale: String,
        prefix: LocalePrefix,
    ) -> Result<Self> {
        let supported: HashSet<String> = supported.into_iter().collect();
        if !supported.contains(&default_locale) {
            bail!("default locale `{default_locale}` is not a supported locale");
        }
        Ok(Self {
            supported,
            default_locale,
            prefix,
        })
    }

    pub fn default_locale(&self) -> &str {
        &self.default_locale
    }

    pub fn prefix_mode(&self) -> LocalePrefix {
        self.prefix
    }

    /// Extract the locale code from a URL prefix.
    ///
    /// Returns `Some((locale, remaining_path))` if the first segment is a
    /// supported locale. A bare prefix like `/en` yields the path `/`.
    pub fn extract_prefix<'a>(&'a self, path: &'a str) -> Option<(&'a str, &'a str)> {
        let trimmed = path.strip_prefix('/')?;

        let (candidate, rest) = match trimmed.find('/') {
            Some(pos) => (&trimmed[..pos], &trimmed[pos..]),
            None => (trimmed, ""),
        };

        let locale = self.supported.get(candidate)?.as_str();

        if rest.is_empty() {
            Some((locale, "/"))
        } else {
            Some((locale, rest))
        }
    }

    /// Resolve the locale for `path`, falling back to the default locale.
    pub fn resolve<'a>(&'a self, path: &'a str) -> LocalizedPath<'a> {
        match self.extract_prefix(path) {
            Some((locale, rest)) => LocalizedPath {
                locale,
                path: rest,
                prefixed: true,
            },
            None => LocalizedPath {
                locale: self.default_locale.as_str(),
                path: if path.is_empty() { "/" } else { path },
                prefixed: false,
            },
        }
    }

    /// Build the locale-qualified form of a locale-independent path.
    pub fn localized(&self, locale: &str, path: &str) -> String {
        let path = path.strip_prefix('/').unwrap_or(path);
        format!("/{locale}/{path}")
    }
}

/// Rewrite a URI to a new path while preserving query string.
pub fn rewrite_uri_path(original: &Uri, new_path: &str) -> Result<Uri, axum::http::uri::InvalidUri> {
    if let Some(query) = original.query() {
        format!("{new_path}?{query}").parse()
    } else {
        new_path.parse()
    }
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn locales() -> LocaleConfig {
        LocaleConfig::new(
            vec!["ko".to_string(), "en".to_string()],
            "ko".to_string(),
            LocalePrefix::Always,
        )
        .unwrap()
    }

    #[test]
    fn default_must_be_supported() {
        let result = LocaleConfig::new(
            vec!["ko".to_string(), "en".to_string()],
            "fr".to_string(),
            LocalePrefix::Always,
        );
        assert!(result.is_err());
    }

    #[test]
    fn prefix_with_path() {
        assert_eq!(
            locales().extract_prefix("/en/posts/hello"),
            Some(("en", "/posts/hello"))
        );
    }

    #[test]
    fn default_locale_prefix_is_recognized() {
        assert_eq!(locales().extract_prefix("/ko/dashboard"), Some(("ko", "/dashboard")));
    }

    #[test]
    fn bare_prefix() {
        assert_eq!(locales().extract_prefix("/en"), Some(("en", "/")));
        assert_eq!(locales().extract_prefix("/en/"), Some(("en", "/")));
    }

    #[test]
    fn no_partial_segment_match() {
        assert_eq!(locales().extract_prefix("/enterprise"), None);
        assert_eq!(locales().extract_prefix("/kor/posts"), None);
    }

    #[test]
    fn case_sensitive() {
        assert_eq!(locales().extract_prefix("/EN/posts"), None);
        assert_eq!(locales().extract_prefix("/Ko"), None);
    }

    #[test]
    fn unknown_locale_no_match() {
        assert_eq!(locales().extract_prefix("/fr/posts"), None);
        assert_eq!(locales().extract_prefix("/"), None);
    }

    #[test]
    fn resolve_falls_back_to_default() {
        let config = locales();

        let resolved = config.resolve("/fr/dashboard");
        assert_eq!(resolved.locale, "ko");
        assert_eq!(resolved.path, "/fr/dashboard");
        assert!(!resolved.prefixed);

        let resolved = config.resolve("");
        assert_eq!(resolved.locale, "ko");
        assert_eq!(resolved.path, "/");
    }

    #[test]
    fn resolve_strips_prefix() {
        let config = locales();
        let resolved = config.resolve("/en/profile");
        assert_eq!(
            resolved,
            LocalizedPath {
                locale: "en",
                path: "/profile",
                prefixed: true,
            }
        );
    }

    #[test]
    fn localized_paths() {
        let config = locales();
        assert_eq!(config.localized("ko", "/login"), "/ko/login");
        assert_eq!(config.localized("en", "/"), "/en/");
        assert_eq!(config.localized("en", "/posts/a-b"), "/en/posts/a-b");
    }

    #[test]
    fn prefix_mode_parses() {
        assert_eq!("always".parse::<LocalePrefix>().unwrap(), LocalePrefix::Always);
        assert_eq!(" Never ".parse::<LocalePrefix>().unwrap(), LocalePrefix::Never);
        assert!("sometimes".parse::<LocalePrefix>().is_err());
    }

    #[test]
    fn rewrite_uri_preserves_query() {
        let original: Uri = "/posts?page=2".parse().unwrap();
        let result = rewrite_uri_path(&original, "/ko/posts").unwrap();
        assert_eq!(result.path(), "/ko/posts");
        assert_eq!(result.query(), Some("page=2"));
    }

    #[test]
    fn rewrite_uri_no_query() {
        let original: Uri = "/posts".parse().unwrap();
        let result = rewrite_uri_path(&original, "/ko/posts").unwrap();
        assert_eq!(result.path(), "/ko/posts");
        assert_eq!(result.query(), None);
    }
}
