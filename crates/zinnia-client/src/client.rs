//! The request interceptor.
//!
//! [`ApiClient::send`] attaches the current credential, and on a 401 from a
//! non-excluded path waits for the single-flight renewal and replays the
//! request at most once.

use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::{ClientConfig, CredentialMode};
use crate::coordinator::{RenewalCoordinator, RenewalOutcome};
use crate::error::{ApiError, ConfigError, Result, TransportError};
use crate::events::{SessionEvent, SessionEvents};
use crate::keepalive::KeepaliveHandle;
use crate::renewal::{HttpRenewer, Renewer};
use crate::store::{AmbientSessionStore, CredentialStore, MemoryCredentialStore};
use crate::transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
use crate::types::ApiEnvelope;

pub(crate) struct ClientInner {
    pub(crate) config: ClientConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) store: Arc<dyn CredentialStore>,
    pub(crate) coordinator: RenewalCoordinator,
    pub(crate) events: SessionEvents,
    keepalive: Mutex<Option<KeepaliveHandle>>,
}

/// Authenticated API client. Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct ApiClient {
    pub(crate) inner: Arc<ClientInner>,
}

/// Builder for [`ApiClient`], mainly for swapping collaborators.
pub struct ApiClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn CredentialStore>>,
    renewer: Option<Arc<dyn Renewer>>,
}

impl ApiClientBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn renewer(mut self, renewer: Arc<dyn Renewer>) -> Self {
        self.renewer = Some(renewer);
        self
    }

    pub fn build(self) -> std::result::Result<ApiClient, ConfigError> {
        self.config.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&self.config)?),
        };

        let store: Arc<dyn CredentialStore> = match self.store {
            Some(store) => store,
            None => match self.config.credential_mode {
                CredentialMode::Explicit => Arc::new(MemoryCredentialStore::new()),
                CredentialMode::Ambient => Arc::new(AmbientSessionStore::new()),
            },
        };

        let renewer = match self.renewer {
            Some(renewer) => renewer,
            None => Arc::new(HttpRenewer::new(
                transport.clone(),
                store.clone(),
                self.config.paths.refresh.clone(),
            )),
        };

        let events = SessionEvents::new(self.config.event_capacity);
        let coordinator = RenewalCoordinator::new(renewer, store.clone(), events.clone());

        debug!(
            mode = ?store.mode(),
            keepalive = ?self.config.keepalive_interval,
            "API client created"
        );

        Ok(ApiClient {
            inner: Arc::new(ClientInner {
                config: self.config,
                transport,
                store,
                coordinator,
                events,
                keepalive: Mutex::new(None),
            }),
        })
    }
}

impl ApiClient {
    /// Client over HTTP with the default store for the configured mode.
    pub fn new(config: ClientConfig) -> std::result::Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    pub fn builder(config: ClientConfig) -> ApiClientBuilder {
        ApiClientBuilder {
            config,
            transport: None,
            store: None,
            renewer: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.store
    }

    pub fn coordinator(&self) -> &RenewalCoordinator {
        &self.inner.coordinator
    }

    pub fn events(&self) -> &SessionEvents {
        &self.inner.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Run `callback` for every session invalidation until shutdown.
    pub fn on_invalidated<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(&SessionEvent) + Send + 'static,
    {
        let mut rx = self.inner.events.subscribe();
        let shutdown = self.inner.coordinator.shutdown_token();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(event) if event.is_invalidated() => callback(&event),
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Invalidation listener lagged behind");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    fn is_excluded(&self, request: &HttpRequest) -> bool {
        let route = request.route();
        self.inner
            .config
            .paths
            .excluded_from_renewal()
            .iter()
            .any(|excluded| route.ends_with(excluded))
    }

    /// Attach the current credential and hand the request to the transport.
    async fn dispatch(
        &self,
        mut request: HttpRequest,
    ) -> std::result::Result<HttpResponse, TransportError> {
        if self.inner.store.mode() == CredentialMode::Explicit {
            if let Some(token) = self.inner.store.access_token() {
                let value = HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|_| TransportError::InvalidHeader {
                        name: "authorization",
                    })?;
                request.headers.insert(AUTHORIZATION, value);
            }
        }
        self.inner.transport.execute(request).await
    }

    /// Send a request through the interceptor.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let observed = self.inner.coordinator.current_cycle();
        let response = self.dispatch(request.clone()).await?;

        if !response.is_unauthorized() || self.is_excluded(&request) {
            return into_result(response);
        }

        debug!(observed, "Unauthorized response; waiting for credential renewal");
        let ticket = self.inner.coordinator.request_renewal(observed);
        let cycle = ticket.cycle();

        match ticket.outcome().await {
            RenewalOutcome::Renewed => {
                debug!(cycle, "Replaying request with renewed credential");
                let retried = self.dispatch(request).await?;
                if retried.is_unauthorized() {
                    warn!(cycle, "Request rejected again after renewal");
                    self.inner.coordinator.reject_renewed(cycle);
                    return Err(ApiError::SessionExpired);
                }
                into_result(retried)
            }
            RenewalOutcome::Failed => Err(ApiError::SessionExpired),
            RenewalOutcome::Cancelled => Err(ApiError::Cancelled),
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(HttpRequest::get(path)).await?;
        decode_envelope(&response)
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = HttpRequest::post(path).with_json(serde_json::to_value(body)?);
        let response = self.send(request).await?;
        decode_envelope(&response)
    }

    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = HttpRequest::put(path).with_json(serde_json::to_value(body)?);
        let response = self.send(request).await?;
        decode_envelope(&response)
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.send(HttpRequest::delete(path)).await?;
        Ok(())
    }

    /// Start the background renewal loop. Returns false when disabled or already running.
    pub fn start_keepalive(&self) -> bool {
        let Some(interval) = self.inner.config.keepalive_interval else {
            debug!("Keepalive disabled by configuration");
            return false;
        };

        let mut slot = self.inner.keepalive.lock();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }

        *slot = Some(KeepaliveHandle::spawn(
            self.inner.coordinator.clone(),
            self.inner.store.clone(),
            interval,
        ));
        true
    }

    pub fn stop_keepalive(&self) {
        if let Some(handle) = self.inner.keepalive.lock().take() {
            handle.stop();
        }
    }

    /// Stop the keepalive and cancel any in-flight renewal.
    pub fn shutdown(&self) {
        info!("Shutting down API client");
        self.stop_keepalive();
        self.inner.coordinator.shutdown();
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.config.base_url)
            .field("mode", &self.inner.store.mode())
            .field("coordinator", &self.inner.coordinator)
            .finish()
    }
}

fn into_result(response: HttpResponse) -> Result<HttpResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(ApiError::server(response.status, response.body))
    }
}

pub(crate) fn decode_envelope<T: DeserializeOwned>(response: &HttpResponse) -> Result<T> {
    let envelope: ApiEnvelope<T> = response
        .json()
        .map_err(|e| ApiError::decode(e.to_string()))?;
    envelope
        .data
        .ok_or_else(|| ApiError::decode("response carries no data"))
}
