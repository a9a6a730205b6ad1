//! Haneul test utilities.
//!
//! Fixtures and fake session providers for driving the kernel router
//! without a live auth service.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::http::HeaderMap;
use haneul_kernel::Config;
use haneul_kernel::session::{Identity, SessionError, SessionProvider};

/// Administrator address used by [`test_config`].
pub const ADMIN_EMAIL: &str = "admin@haneul.test";

/// Configuration with an administrator, no auth service and no upstream.
pub fn test_config() -> Config {
    Config {
        admin_email: Some(ADMIN_EMAIL.to_string()),
        ..Config::default()
    }
}

/// The administrator's identity, with the address in mixed case.
pub fn admin_identity() -> Identity {
    Identity {
        user_id: "admin-1".to_string(),
        email: "Admin@Haneul.Test".to_string(),
    }
}

/// An authenticated visitor who is not the administrator.
pub fn visitor_identity() -> Identity {
    Identity {
        user_id: "visitor-1".to_string(),
        email: "visitor@haneul.test".to_string(),
    }
}

/// Provider returning the same session for every request.
///
/// Counts lookups so tests can assert when the gate consults it.
#[derive(Debug, Default)]
pub struct StaticSessionProvider {
    identity: Option<Identity>,
    lookups: AtomicUsize,
}

impl StaticSessionProvider {
    pub fn new(identity: Option<Identity>) -> Self {
        Self {
            identity,
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn anonymous() -> Self {
        Self::new(None)
    }

    /// Wrap in the trait object the kernel expects.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Number of lookups served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionProvider for StaticSessionProvider {
    async fn current_session(&self, _headers: &HeaderMap) -> Result<Option<Identity>, SessionError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.identity.clone())
    }
}

/// Provider whose every lookup fails, as when the auth service is down.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingSessionProvider;

#[async_trait]
impl SessionProvider for FailingSessionProvider {
    async fn current_session(&self, _headers: &HeaderMap) -> Result<Option<Identity>, SessionError> {
        Err(SessionError::UnexpectedStatus(503))
    }

    async fn healthy(&self) -> bool {
        false
    }
}
