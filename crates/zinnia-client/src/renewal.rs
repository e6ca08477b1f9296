//! The renewal procedure: exchange the refresh credential for a new one.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::config::CredentialMode;
use crate::error::RenewalError;
use crate::store::{CredentialStore, Credentials};
use crate::transport::{HttpRequest, Transport};
use crate::types::TokenResponse;

/// Performs one renewal attempt.
///
/// Returns the credentials to install, or `None` when the server keeps the
/// session itself (ambient mode). Implementations never write the credential
/// store: the coordinator installs the result, or tears the session down on
/// failure, and skips both if the session was replaced in the meantime.
#[async_trait]
pub trait Renewer: Send + Sync {
    async fn renew(&self) -> Result<Option<Credentials>, RenewalError>;
}

/// Renewal against `POST <refresh path>` through the raw transport.
pub struct HttpRenewer {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    refresh_path: String,
}

impl HttpRenewer {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        refresh_path: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            store,
            refresh_path: refresh_path.into(),
        }
    }

    fn request_body(&self) -> Result<Value, RenewalError> {
        match self.store.mode() {
            CredentialMode::Explicit => {
                let refresh_token = self
                    .store
                    .refresh_token()
                    .filter(|t| !t.is_empty())
                    .ok_or(RenewalError::MissingRefreshToken)?;
                Ok(json!({ "refresh_token": refresh_token }))
            }
            // The refresh cookie travels with the transport.
            CredentialMode::Ambient => Ok(json!({})),
        }
    }
}

/// Tokens may arrive wrapped in the API envelope or bare.
fn parse_tokens(body: &[u8]) -> Result<TokenResponse, RenewalError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| RenewalError::malformed(format!("invalid JSON: {e}")))?;

    let payload = match value.get("data") {
        Some(Value::Null) => {
            return Err(RenewalError::malformed("response carries no data"));
        }
        Some(data) => data,
        None => &value,
    };

    let tokens: TokenResponse = serde_json::from_value(payload.clone())
        .map_err(|e| RenewalError::malformed(e.to_string()))?;

    if tokens.access_token.trim().is_empty() {
        return Err(RenewalError::malformed("empty access_token"));
    }
    Ok(tokens)
}

#[async_trait]
impl Renewer for HttpRenewer {
    #[instrument(skip(self), fields(path = %self.refresh_path))]
    async fn renew(&self) -> Result<Option<Credentials>, RenewalError> {
        let body = self.request_body()?;
        let request = HttpRequest::post(self.refresh_path.clone()).with_json(body);

        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            return Err(RenewalError::Rejected {
                status: response.status,
            });
        }

        match self.store.mode() {
            CredentialMode::Explicit => {
                let tokens = parse_tokens(&response.body)?;
                debug!(expires_in = ?tokens.expires_in, "Received renewed tokens");
                Ok(Some(tokens.into_credentials()))
            }
            CredentialMode::Ambient => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::*;
    use crate::error::TransportError;
    use crate::store::{AmbientSessionStore, Credentials, MemoryCredentialStore};
    use crate::test_support::ScriptedTransport;
    use crate::transport::HttpResponse;

    fn ok(body: Value) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse::json_value(StatusCode::OK, &body))
    }

    #[tokio::test]
    async fn explicit_mode_returns_new_tokens() {
        let transport = Arc::new(ScriptedTransport::new(vec![ok(json!({
            "code": 0,
            "message": "ok",
            "data": {"access_token": "a-2", "refresh_token": "r-2", "expires_in": 900}
        }))]));
        let store = Arc::new(MemoryCredentialStore::with_credentials(Credentials::new(
            "a-1", "r-1",
        )));
        let renewer = HttpRenewer::new(transport.clone(), store.clone(), "/users/refresh");

        let renewed = renewer.renew().await.unwrap().unwrap();

        assert_eq!(renewed.access_token, "a-2");
        assert_eq!(renewed.refresh_token, "r-2");
        assert!(renewed.expires_at.is_some());
        // Installing the pair is the coordinator's job.
        assert_eq!(store.access_token().as_deref(), Some("a-1"));

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].path, "/users/refresh");
        assert_eq!(sent[0].body, Some(json!({"refresh_token": "r-1"})));
    }

    #[tokio::test]
    async fn missing_refresh_token_skips_network() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let store = Arc::new(MemoryCredentialStore::new());
        let renewer = HttpRenewer::new(transport.clone(), store, "/users/refresh");

        let err = renewer.renew().await.unwrap_err();
        assert!(matches!(err, RenewalError::MissingRefreshToken));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn failure_leaves_store_untouched() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(HttpResponse::new(StatusCode::UNAUTHORIZED, "{}")),
            ok(json!({"data": {"refresh_token": "r-3"}})),
            Err(TransportError::Timeout),
        ]));
        let store = Arc::new(MemoryCredentialStore::with_credentials(Credentials::new(
            "a-1", "r-1",
        )));
        let renewer = HttpRenewer::new(transport, store.clone(), "/users/refresh");

        let rejected = renewer.renew().await.unwrap_err();
        assert!(matches!(
            rejected,
            RenewalError::Rejected {
                status: StatusCode::UNAUTHORIZED
            }
        ));
        assert!(matches!(
            renewer.renew().await.unwrap_err(),
            RenewalError::MalformedResponse { .. }
        ));
        assert!(matches!(
            renewer.renew().await.unwrap_err(),
            RenewalError::Transport(TransportError::Timeout)
        ));

        assert_eq!(store.access_token().as_deref(), Some("a-1"));
    }

    #[tokio::test]
    async fn ambient_mode_sends_empty_body_and_accepts_empty_response() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(HttpResponse::new(
            StatusCode::NO_CONTENT,
            "",
        ))]));
        let renewer = HttpRenewer::new(
            transport.clone(),
            Arc::new(AmbientSessionStore::new()),
            "/users/refresh",
        );

        assert!(renewer.renew().await.unwrap().is_none());
        assert_eq!(transport.requests()[0].body, Some(json!({})));
    }

    #[tokio::test]
    async fn huge_expires_in_does_not_panic() {
        let transport = Arc::new(ScriptedTransport::new(vec![ok(json!({
            "data": {"access_token": "a-2", "refresh_token": "r-2", "expires_in": 10_000_000_000_000u64}
        }))]));
        let store = Arc::new(MemoryCredentialStore::with_credentials(Credentials::new(
            "a-1", "r-1",
        )));
        let renewer = HttpRenewer::new(transport, store, "/users/refresh");

        let renewed = renewer.renew().await.unwrap().unwrap();
        assert_eq!(renewed.access_token, "a-2");
        assert!(renewed.expires_at.is_none());
    }

    #[test]
    fn bare_token_payload_is_accepted() {
        let tokens = parse_tokens(br#"{"access_token":"a","refresh_token":"r"}"#).unwrap();
        assert_eq!(tokens.access_token, "a");
        assert!(parse_tokens(br#"{"data":null}"#).is_err());
        assert!(parse_tokens(b"<html>").is_err());
    }
}
