//! Zinnia client: authenticated HTTP request layer for the Zinnia API.
//!
//! Requests carry a short-lived credential. When the server answers 401 the
//! client renews the credential once, no matter how many requests failed
//! concurrently, and replays each failed request exactly once.
//!
//! ## Core Types
//!
//! - [`ApiClient`] - Request interceptor and account endpoints
//! - [`RenewalCoordinator`] - Single-flight renewal state machine
//! - [`CredentialStore`] - Where the current credential lives
//! - [`Renewer`] - The renewal procedure ([`HttpRenewer`] by default)
//! - [`Transport`] - The raw request function ([`ReqwestTransport`] by default)
//!
//! ## Credential Modes
//!
//! - [`CredentialMode::Explicit`] - Bearer token pair held by the client
//! - [`CredentialMode::Ambient`] - HTTP-only cookies held by the transport
//!
//! ## Session Events
//!
//! - [`SessionEvents`] - Broadcast of [`SessionEvent`]s; `Invalidated` means
//!   the user has to log in again

pub mod auth;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod keepalive;
pub mod message;
pub mod proxy;
pub mod renewal;
pub mod store;
pub mod transport;
pub mod types;

#[cfg(test)]
mod test_support;

pub use client::{ApiClient, ApiClientBuilder};
pub use config::{
    AuthPaths, ClientConfig, ClientConfigBuilder, CredentialMode, DEFAULT_BASE_URL,
    DEFAULT_KEEPALIVE_INTERVAL,
};
pub use coordinator::{RenewalCoordinator, RenewalOutcome, RenewalTicket, TicketRole};
pub use error::{ApiError, ConfigError, RenewalError, Result, TransportError};
pub use events::{InvalidationReason, SessionEvent, SessionEvents};
pub use keepalive::KeepaliveHandle;
pub use message::extract_error_message;
pub use proxy::ProxyConfig;
pub use reqwest::{Method, StatusCode};
pub use renewal::{HttpRenewer, Renewer};
pub use store::{AmbientSessionStore, CredentialStore, Credentials, MemoryCredentialStore};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use types::{
    ApiEnvelope, LoginRequest, LoginResponse, LogoutAllResponse, RegisterRequest,
    TokenResponse, User, UserRole,
};
