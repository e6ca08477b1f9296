//! End-to-end tests against an in-process HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{AppendHeaders, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use zinnia_client::{
    ApiClient, ApiError, ClientConfig, CredentialMode, CredentialStore, LoginRequest, ProxyConfig,
    SessionEvent,
};

#[derive(Default)]
struct Tokens {
    access: Option<String>,
    refresh: Option<String>,
    issued: u32,
}

/// Minimal Zinnia API: login, refresh, one protected route.
#[derive(Default)]
struct Backend {
    tokens: Mutex<Tokens>,
    refresh_calls: AtomicUsize,
    bearer_requests: AtomicUsize,
}

impl Backend {
    fn issue(&self) -> (String, String) {
        let mut tokens = self.tokens.lock();
        tokens.issued += 1;
        let access = format!("access-{}", tokens.issued);
        let refresh = format!("refresh-{}", tokens.issued);
        tokens.access = Some(access.clone());
        tokens.refresh = Some(refresh.clone());
        (access, refresh)
    }

    fn expire_access(&self) {
        self.tokens.lock().access = None;
    }

    fn revoke(&self) {
        let mut tokens = self.tokens.lock();
        tokens.access = None;
        tokens.refresh = None;
    }

    fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

fn cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_owned())
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned)
}

fn envelope(data: Value) -> Json<Value> {
    Json(json!({"code": 0, "message": "success", "data": data, "timestamp": "2026-10-19T08:00:00Z"}))
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"code": 40100, "message": message, "data": null})),
    )
        .into_response()
}

fn session_response(access: &str, refresh: &str, data: Value) -> Response {
    (
        AppendHeaders([
            (
                header::SET_COOKIE,
                format!("access_token={access}; Path=/; HttpOnly"),
            ),
            (
                header::SET_COOKIE,
                format!("refresh_token={refresh}; Path=/; HttpOnly"),
            ),
        ]),
        envelope(data),
    )
        .into_response()
}

async fn login(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> Response {
    if body["password"] != "secret" {
        return unauthorized("invalid username or password");
    }
    let (access, refresh) = backend.issue();
    let data = json!({
        "user": {
            "id": "u-1",
            "email": "ops@example.com",
            "username": "ops",
            "role": "admin",
            "email_verified": true,
            "created_at": "2025-06-01T08:00:00Z"
        },
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "Bearer",
        "expires_in": 900
    });
    session_response(&access, &refresh, data)
}

async fn refresh(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    backend.refresh_calls.fetch_add(1, Ordering::SeqCst);
    // Keep the renewal in flight long enough for concurrent 401s to queue.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let presented = body["refresh_token"]
        .as_str()
        .map(str::to_owned)
        .or_else(|| cookie(&headers, "refresh_token"));
    let valid = {
        let tokens = backend.tokens.lock();
        presented.is_some() && presented == tokens.refresh
    };
    if !valid {
        return unauthorized("refresh token expired");
    }

    let (access, refresh) = backend.issue();
    let data = json!({"access_token": access, "refresh_token": refresh, "expires_in": 900});
    session_response(&access, &refresh, data)
}

async fn devices(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    let bearer = bearer(&headers);
    if bearer.is_some() {
        backend.bearer_requests.fetch_add(1, Ordering::SeqCst);
    }
    let presented = bearer.or_else(|| cookie(&headers, "access_token"));
    let current = backend.tokens.lock().access.clone();
    if presented.is_none() || presented != current {
        return unauthorized("access token expired");
    }
    envelope(json!([{"id": "d-1", "name": "pump-1"}])).into_response()
}

async fn spawn_server() -> (SocketAddr, Arc<Backend>) {
    let backend = Arc::new(Backend::default());
    let app = Router::new()
        .route("/api/v1/users/login", post(login))
        .route("/api/v1/users/refresh", post(refresh))
        .route("/api/v1/devices", get(devices))
        .with_state(backend.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, backend)
}

fn client(addr: SocketAddr, mode: CredentialMode) -> ApiClient {
    let config = ClientConfig::builder()
        .base_url(format!("http://{addr}/api/v1/"))
        .timeout(Duration::from_secs(5))
        .credential_mode(mode)
        .keepalive_interval(None)
        .proxy(ProxyConfig::disabled())
        .build()
        .unwrap();
    ApiClient::new(config).unwrap()
}

async fn fetch_concurrently(client: &ApiClient, count: usize) -> Vec<Result<Value, ApiError>> {
    let handles: Vec<_> = (0..count)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.get_json::<Value>("/devices").await })
        })
        .collect();

    let mut results = Vec::with_capacity(count);
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

mod explicit_mode_tests {
    use super::*;

    #[tokio::test]
    async fn concurrent_expiry_triggers_one_renewal() {
        let (addr, backend) = spawn_server().await;
        let client = client(addr, CredentialMode::Explicit);

        client
            .login(&LoginRequest::new("ops", "secret"))
            .await
            .unwrap();
        assert_eq!(client.store().access_token().as_deref(), Some("access-1"));

        backend.expire_access();
        let results = fetch_concurrently(&client, 3).await;

        for result in results {
            let devices = result.unwrap();
            assert_eq!(devices[0]["name"], "pump-1");
        }
        assert_eq!(backend.refresh_calls(), 1);
        assert_eq!(client.store().access_token().as_deref(), Some("access-2"));
    }

    #[tokio::test]
    async fn revoked_session_is_invalidated() {
        let (addr, backend) = spawn_server().await;
        let client = client(addr, CredentialMode::Explicit);
        client
            .login(&LoginRequest::new("ops", "secret"))
            .await
            .unwrap();
        let mut events = client.subscribe();

        backend.revoke();
        let results = fetch_concurrently(&client, 3).await;

        for result in results {
            assert!(matches!(result, Err(ApiError::SessionExpired)));
        }
        assert_eq!(backend.refresh_calls(), 1);
        assert!(client.store().get().is_none());

        let event = events.recv().await.unwrap();
        assert!(matches!(event, SessionEvent::Invalidated { cycle: 1, .. }));
    }

    #[tokio::test]
    async fn wrong_password_is_reported_verbatim() {
        let (addr, backend) = spawn_server().await;
        let client = client(addr, CredentialMode::Explicit);

        let err = client
            .login(&LoginRequest::new("ops", "wrong"))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(reqwest::StatusCode::UNAUTHORIZED));
        assert_eq!(err.user_message(), "invalid username or password");
        assert_eq!(backend.refresh_calls(), 0);
    }
}

mod ambient_mode_tests {
    use super::*;

    #[tokio::test]
    async fn cookies_carry_the_session_through_renewal() {
        let (addr, backend) = spawn_server().await;
        let client = client(addr, CredentialMode::Ambient);

        client
            .login(&LoginRequest::new("ops", "secret"))
            .await
            .unwrap();
        assert!(client.store().get().is_none());

        let devices: Value = client.get_json("/devices").await.unwrap();
        assert_eq!(devices[0]["id"], "d-1");

        backend.expire_access();
        let results = fetch_concurrently(&client, 3).await;
        for result in results {
            assert!(result.is_ok());
        }

        assert_eq!(backend.refresh_calls(), 1);
        assert_eq!(backend.bearer_requests.load(Ordering::SeqCst), 0);
    }
}

mod transport_tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_server_is_a_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client(addr, CredentialMode::Explicit);
        let err = client.get_json::<Value>("/devices").await.unwrap_err();

        assert!(matches!(err, ApiError::Network { .. }));
        assert_eq!(err.user_message(), "Network request failed");
    }
}
