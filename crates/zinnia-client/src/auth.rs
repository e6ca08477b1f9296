//! Account endpoints on top of the interceptor.

use serde_json::json;
use tracing::{debug, info, instrument};

use crate::client::{ApiClient, decode_envelope};
use crate::config::CredentialMode;
use crate::coordinator::RenewalOutcome;
use crate::error::{ApiError, Result};
use crate::events::SessionEvent;
use crate::transport::HttpRequest;
use crate::types::{LoginRequest, LoginResponse, LogoutAllResponse, RegisterRequest, User};

impl ApiClient {
    /// Log in and, in explicit mode, store the issued token pair.
    #[instrument(skip(self, request), fields(login = %request.login))]
    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse> {
        let body = serde_json::to_value(request)?;
        let path = self.inner.config.paths.login.clone();
        let response = self.send(HttpRequest::post(path).with_json(body)).await?;
        let login: LoginResponse = decode_envelope(&response)?;

        let credentials = match self.inner.store.mode() {
            CredentialMode::Explicit => Some(
                login
                    .tokens()
                    .ok_or_else(|| ApiError::decode("login response carries no tokens"))?
                    .into_credentials(),
            ),
            CredentialMode::Ambient => None,
        };
        self.inner.coordinator.begin_session(credentials);

        info!(user_id = %login.user.id, "Logged in");
        self.inner.events.publish(SessionEvent::LoggedIn {
            user_id: login.user.id.clone(),
        });
        Ok(login)
    }

    #[instrument(skip(self, request), fields(username = %request.username))]
    pub async fn register(&self, request: &RegisterRequest) -> Result<User> {
        let path = self.inner.config.paths.register.clone();
        self.post_json(&path, request).await
    }

    /// Renew the session now, sharing any renewal already in flight.
    pub async fn refresh(&self) -> Result<()> {
        match self.inner.coordinator.renew_now().await {
            RenewalOutcome::Renewed => Ok(()),
            RenewalOutcome::Failed => Err(ApiError::SessionExpired),
            RenewalOutcome::Cancelled => Err(ApiError::Cancelled),
        }
    }

    /// End the session. The local session is cleared even if the server call fails.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        let path = self.inner.config.paths.logout.clone();
        if let Err(e) = self.send(HttpRequest::post(path).with_json(json!({}))).await {
            debug!(error = %e, "Logout request failed; clearing local session anyway");
        }
        self.end_session();
    }

    /// Revoke every session of the current user.
    #[instrument(skip(self))]
    pub async fn logout_all(&self) -> Result<LogoutAllResponse> {
        let path = self.inner.config.paths.logout_all.clone();
        let revoked: LogoutAllResponse = self.post_json(&path, &json!({})).await?;
        info!(sessions_revoked = revoked.sessions_revoked, "Revoked all sessions");
        self.end_session();
        Ok(revoked)
    }

    pub async fn current_user(&self) -> Result<User> {
        let path = self.inner.config.paths.me.clone();
        self.get_json(&path).await
    }

    fn end_session(&self) {
        self.inner.coordinator.end_session();
        self.inner.events.publish(SessionEvent::LoggedOut);
        info!("Logged out");
    }
}
