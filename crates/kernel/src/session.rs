//! Session lookup against the hosted auth service.
//!
//! The auth service owns identities; the kernel only asks "who is making
//! this request?" once per gated request and never mutates anything.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, COOKIE};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Prefix the auth service's SSR helpers put on base64-encoded cookie values.
const BASE64_COOKIE_PREFIX: &str = "base64-";

/// An authenticated caller, as reported by the auth service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    /// Empty when the account has no email (e.g. phone sign-in).
    pub email: String,
}

/// Session lookup failures.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("auth service request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("auth service returned unexpected status {0}")]
    UnexpectedStatus(u16),

    #[error("session lookup timed out after {0:?}")]
    Timeout(Duration),
}

/// Source of the current caller's identity.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Look up the session carried by the request headers.
    ///
    /// `Ok(None)` means the caller is anonymous; `Err` means the lookup
    /// itself could not be completed.
    async fn current_session(&self, headers: &HeaderMap) -> Result<Option<Identity>, SessionError>;

    /// Whether the auth service is reachable.
    async fn healthy(&self) -> bool {
        true
    }
}

/// Run a session lookup bounded by `timeout`.
pub async fn lookup_session(
    provider: &Arc<dyn SessionProvider>,
    headers: &HeaderMap,
    timeout: Duration,
) -> Result<Option<Identity>, SessionError> {
    tokio::time::timeout(timeout, provider.current_session(headers))
        .await
        .map_err(|_| SessionError::Timeout(timeout))?
}

/// Provider used when no auth service is configured: everyone is anonymous.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnonymousSessionProvider;

#[async_trait]
impl SessionProvider for AnonymousSessionProvider {
    async fn current_session(&self, _headers: &HeaderMap) -> Result<Option<Identity>, SessionError> {
        Ok(None)
    }

    async fn healthy(&self) -> bool {
        false
    }
}

/// User record returned by `GET /auth/v1/user`.
#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

/// Token pair some cookie encodings wrap the access token in.
#[derive(Debug, Deserialize)]
struct CookieSession {
    access_token: String,
}

/// Session provider backed by the hosted auth service's REST API.
#[derive(Clone)]
pub struct RemoteSessionProvider {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    cookie_name: String,
}

impl RemoteSessionProvider {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        anon_key: impl Into<String>,
        cookie_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            anon_key: anon_key.into(),
            cookie_name: cookie_name.into(),
        }
    }

    /// Find the caller's access token: the auth cookie first, then an
    /// `Authorization: Bearer` header.
    pub fn access_token(&self, headers: &HeaderMap) -> Option<String> {
        if let Some(raw) = cookie_value(headers, &self.cookie_name) {
            match decode_cookie_token(raw) {
                Some(token) => return Some(token),
                None => debug!(cookie = %self.cookie_name, "ignoring undecodable auth cookie"),
            }
        }

        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }
}

#[async_trait]
impl SessionProvider for RemoteSessionProvider {
    async fn current_session(&self, headers: &HeaderMap) -> Result<Option<Identity>, SessionError> {
        let Some(token) = self.access_token(headers) else {
            return Ok(None);
        };

        let response = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            debug!(status = status.as_u16(), "auth service rejected access token");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(SessionError::UnexpectedStatus(status.as_u16()));
        }

        let user: AuthUser = response.json().await?;
        Ok(Some(Identity {
            user_id: user.id,
            email: user.email.unwrap_or_default(),
        }))
    }

    async fn healthy(&self) -> bool {
        self.client
            .get(format!("{}/auth/v1/health", self.base_url))
            .header("apikey", &self.anon_key)
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }
}

impl std::fmt::Debug for RemoteSessionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSessionProvider")
            .field("base_url", &self.base_url)
            .field("cookie_name", &self.cookie_name)
            .finish()
    }
}

/// Find a cookie value by name across all `Cookie` headers.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

/// Decode an auth cookie into an access token.
///
/// Accepts a raw JWT, a JSON session object or array (optionally
/// percent-encoded), or either JSON form behind the `base64-` prefix.
fn decode_cookie_token(raw: &str) -> Option<String> {
    let decoded = urlencoding::decode(raw).ok()?;

    let json = match decoded.strip_prefix(BASE64_COOKIE_PREFIX) {
        Some(encoded) => {
            let bytes = URL_SAFE_NO_PAD
                .decode(encoded.trim_end_matches('='))
                .or_else(|_| STANDARD.decode(encoded))
                .ok()?;
            String::from_utf8(bytes).ok()?
        }
        None => decoded.into_owned(),
    };

    let trimmed = json.trim();
    if trimmed.starts_with('{') {
        let session: CookieSession = serde_json::from_str(trimmed).ok()?;
        return Some(session.access_token).filter(|t| !t.is_empty());
    }
    if trimmed.starts_with('[') {
        // Legacy encoding: [access_token, refresh_token, ...]
        let parts: Vec<serde_json::Value> = serde_json::from_str(trimmed).ok()?;
        return parts
            .first()
            .and_then(|v| v.as_str())
            .filter(|t| !t.is_empty())
            .map(str::to_string);
    }

    Some(trimmed.to_string()).filter(|t| !t.is_empty())
}
