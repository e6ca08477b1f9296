//! Credential storage.
//!
//! The renewal coordinator and the request interceptor are written against
//! [`CredentialStore`] only. Two modes exist:
//!
//! - [`MemoryCredentialStore`]: explicit mode, the client holds the tokens.
//! - [`AmbientSessionStore`]: ambient mode, the transport's cookie jar holds
//!   the session and the store has nothing to read or write.

use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CredentialMode;

/// Access and refresh credentials issued at login or by a renewal.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
    /// Expected access token expiry (if the server told us).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether the access token is known to have expired.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Holder of the current session credentials.
///
/// Reads never block on I/O; `set` is visible to every later read; `clear`
/// is idempotent.
pub trait CredentialStore: Send + Sync {
    fn mode(&self) -> CredentialMode;

    fn get(&self) -> Option<Credentials>;

    fn set(&self, credentials: Credentials);

    fn clear(&self);

    fn access_token(&self) -> Option<String> {
        self.get().map(|c| c.access_token)
    }

    fn refresh_token(&self) -> Option<String> {
        self.get().map(|c| c.refresh_token)
    }
}

/// Explicit-mode store kept in memory.
#[derive(Default)]
pub struct MemoryCredentialStore {
    credentials: RwLock<Option<Credentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            credentials: RwLock::new(Some(credentials)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn mode(&self) -> CredentialMode {
        CredentialMode::Explicit
    }

    fn get(&self) -> Option<Credentials> {
        self.credentials.read().clone()
    }

    fn set(&self, credentials: Credentials) {
        *self.credentials.write() = Some(credentials);
    }

    fn clear(&self) {
        if self.credentials.write().take().is_some() {
            debug!("Credentials cleared");
        }
    }
}

/// Ambient-mode store: the server-managed session cookie is not readable.
#[derive(Debug, Default)]
pub struct AmbientSessionStore;

impl AmbientSessionStore {
    pub fn new() -> Self {
        Self
    }
}

impl CredentialStore for AmbientSessionStore {
    fn mode(&self) -> CredentialMode {
        CredentialMode::Ambient
    }

    fn get(&self) -> Option<Credentials> {
        None
    }

    fn set(&self, _credentials: Credentials) {}

    fn clear(&self) {
        // The server expires the cookie; nothing local to drop.
        debug!("Ambient session torn down");
    }
}
