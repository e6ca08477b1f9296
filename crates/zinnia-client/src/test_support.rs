//! In-memory transports for unit tests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use serde_json::{Value, json};
use tokio::sync::Semaphore;

use crate::error::TransportError;
use crate::transport::{HttpRequest, HttpResponse, Transport};

/// Replays a fixed list of results, one per request.
pub(crate) struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new(replies: Vec<Result<HttpResponse, TransportError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(request);
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::connection("script exhausted")))
    }
}

struct FakeApiState {
    access_token: Option<String>,
    refresh_token: Option<String>,
    issued: u32,
    refresh_succeeds: bool,
    reject_all: bool,
    forced_unauthorized: HashSet<String>,
}

/// A stateful stand-in for the Zinnia API.
///
/// - `/users/login` accepts password `secret` and issues a token pair.
/// - `/users/refresh` rotates the pair; it can be gated so a renewal stays
///   in flight until the test releases it.
/// - `/boom` answers 500.
/// - Every other route requires `Authorization: Bearer <current access token>`.
pub(crate) struct FakeApi {
    state: Mutex<FakeApiState>,
    refresh_gate: Option<Semaphore>,
    refresh_calls: AtomicUsize,
    protected_calls: AtomicUsize,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeApi {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(FakeApiState {
                access_token: None,
                refresh_token: None,
                issued: 0,
                refresh_succeeds: true,
                reject_all: false,
                forced_unauthorized: HashSet::new(),
            }),
            refresh_gate: None,
            refresh_calls: AtomicUsize::new(0),
            protected_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Refresh requests block until [`FakeApi::release_refresh`] is called.
    pub(crate) fn gated() -> Self {
        Self {
            refresh_gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    /// Issue a session directly, as if the user had logged in earlier.
    pub(crate) fn issue(&self) -> (String, String) {
        let mut state = self.state.lock();
        Self::issue_locked(&mut state)
    }

    fn issue_locked(state: &mut FakeApiState) -> (String, String) {
        state.issued += 1;
        let access = format!("access-{}", state.issued);
        let refresh = format!("refresh-{}", state.issued);
        state.access_token = Some(access.clone());
        state.refresh_token = Some(refresh.clone());
        (access, refresh)
    }

    /// The access token stops being accepted; the refresh token stays valid.
    pub(crate) fn expire_access_token(&self) {
        self.state.lock().access_token = None;
    }

    pub(crate) fn set_refresh_succeeds(&self, succeeds: bool) {
        self.state.lock().refresh_succeeds = succeeds;
    }

    /// Reject every protected request, even with a fresh token.
    pub(crate) fn set_reject_all(&self, reject: bool) {
        self.state.lock().reject_all = reject;
    }

    pub(crate) fn force_unauthorized(&self, route: &str) {
        self.state.lock().forced_unauthorized.insert(route.to_owned());
    }

    pub(crate) fn release_refresh(&self, count: usize) {
        if let Some(gate) = &self.refresh_gate {
            gate.add_permits(count);
        }
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn protected_calls(&self) -> usize {
        self.protected_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    fn unauthorized(message: &str) -> HttpResponse {
        HttpResponse::json_value(
            StatusCode::UNAUTHORIZED,
            &json!({"code": 40100, "message": message, "data": null}),
        )
    }

    fn envelope(data: Value) -> HttpResponse {
        HttpResponse::json_value(
            StatusCode::OK,
            &json!({"code": 0, "message": "success", "data": data, "timestamp": "2026-10-19T08:00:00Z"}),
        )
    }

    fn user() -> Value {
        json!({
            "id": "u-1",
            "email": "ops@example.com",
            "username": "ops",
            "role": "admin",
            "email_verified": true,
            "created_at": "2025-06-01T08:00:00Z",
            "last_login_at": null
        })
    }

    fn bearer(request: &HttpRequest) -> Option<String> {
        request
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_owned)
    }

    async fn handle_refresh(&self, request: &HttpRequest) -> HttpResponse {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.refresh_gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let presented = request
            .body
            .as_ref()
            .and_then(|b| b.get("refresh_token"))
            .and_then(Value::as_str)
            .map(str::to_owned);

        let mut state = self.state.lock();
        let valid = state.refresh_succeeds
            && presented.is_some()
            && presented == state.refresh_token;
        if !valid {
            return Self::unauthorized("refresh token expired");
        }

        let (access, refresh) = Self::issue_locked(&mut state);
        Self::envelope(json!({
            "access_token": access,
            "refresh_token": refresh,
            "token_type": "Bearer",
            "expires_in": 900
        }))
    }
}

#[async_trait]
impl Transport for FakeApi {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(request.clone());
        let route = request.route().to_owned();

        if self.state.lock().forced_unauthorized.contains(&route) {
            return Ok(Self::unauthorized("authentication failed"));
        }

        let response = match route.as_str() {
            "/users/refresh" => self.handle_refresh(&request).await,
            "/users/login" => {
                let password = request
                    .body
                    .as_ref()
                    .and_then(|b| b.get("password"))
                    .and_then(Value::as_str);
                if password == Some("secret") {
                    let (access, refresh) = self.issue();
                    Self::envelope(json!({
                        "user": Self::user(),
                        "access_token": access,
                        "refresh_token": refresh,
                        "token_type": "Bearer",
                        "expires_in": 900
                    }))
                } else {
                    Self::unauthorized("invalid username or password")
                }
            }
            "/users/logout" => {
                let mut state = self.state.lock();
                state.access_token = None;
                state.refresh_token = None;
                Self::envelope(Value::Null)
            }
            "/boom" => HttpResponse::json_value(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({"code": 50000, "message": "internal", "error": {"code": "DB", "message": "database unavailable"}}),
            ),
            _ => {
                self.protected_calls.fetch_add(1, Ordering::SeqCst);
                let state = self.state.lock();
                let token = Self::bearer(&request);
                if !state.reject_all && token.is_some() && token == state.access_token {
                    if route == "/users/me" {
                        Self::envelope(Self::user())
                    } else {
                        Self::envelope(json!({ "route": route, "token": token }))
                    }
                } else {
                    Self::unauthorized("access token expired")
                }
            }
        };

        Ok(response)
    }
}

/// Poll `condition` until it holds; panics after five seconds.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
