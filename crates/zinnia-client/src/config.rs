use std::str::FromStr;
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::proxy::ProxyConfig;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api/v1";
pub const DEFAULT_USER_AGENT: &str = concat!("zinnia-client/", env!("CARGO_PKG_VERSION"));

/// Matches the web console's `TOKEN_REFRESH_INTERVAL` (12 minutes).
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_millis(720_000);

/// How the session credential travels with each request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialMode {
    /// The client holds the tokens and attaches `Authorization: Bearer`.
    #[default]
    Explicit,
    /// The server manages the session through cookies kept in the transport's jar.
    Ambient,
}

impl FromStr for CredentialMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "explicit" | "bearer" => Ok(Self::Explicit),
            "ambient" | "cookie" => Ok(Self::Ambient),
            other => Err(ConfigError::invalid_value(
                "credential_mode",
                format!("expected `explicit` or `ambient`, got `{other}`"),
            )),
        }
    }
}

/// API paths the request layer needs to know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthPaths {
    pub refresh: String,
    pub login: String,
    pub register: String,
    pub logout: String,
    pub logout_all: String,
    pub me: String,
}

impl Default for AuthPaths {
    fn default() -> Self {
        Self {
            refresh: "/users/refresh".to_owned(),
            login: "/users/login".to_owned(),
            register: "/users/register".to_owned(),
            logout: "/users/logout".to_owned(),
            logout_all: "/users/logout-all".to_owned(),
            me: "/users/me".to_owned(),
        }
    }
}

impl AuthPaths {
    /// Paths whose 401 is an ordinary application error, never a session-expiry signal.
    pub fn excluded_from_renewal(&self) -> [&str; 3] {
        [&self.refresh, &self.login, &self.register]
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL every request path is appended to.
    pub base_url: String,

    /// Overall timeout for a request, renewal included.
    pub timeout: Duration,

    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,

    pub user_agent: String,

    /// Headers sent with every request.
    pub headers: HeaderMap,

    pub credential_mode: CredentialMode,

    pub paths: AuthPaths,

    /// Background renewal interval. `None` disables the keepalive.
    pub keepalive_interval: Option<Duration>,

    pub proxy: ProxyConfig,

    /// Maximum idle connections to keep per host.
    pub pool_max_idle_per_host: usize,

    /// Capacity of the session event channel.
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: ClientConfig::default_headers(),
            credential_mode: CredentialMode::Explicit,
            paths: AuthPaths::default(),
            keepalive_interval: Some(DEFAULT_KEEPALIVE_INTERVAL),
            proxy: ProxyConfig::default(),
            pool_max_idle_per_host: 10,
            event_capacity: 64,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    pub fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers
    }

    /// Defaults overridden by `ZINNIA_*` environment variables.
    ///
    /// - `ZINNIA_API_BASE_URL`
    /// - `ZINNIA_TIMEOUT_SECS`
    /// - `ZINNIA_TOKEN_REFRESH_INTERVAL_MS` (`0` disables the keepalive)
    /// - `ZINNIA_CREDENTIAL_MODE` (`explicit` | `ambient`)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut builder = Self::builder();

        if let Some(url) = lookup("ZINNIA_API_BASE_URL").filter(|s| !s.trim().is_empty()) {
            builder = builder.base_url(url);
        }
        if let Some(secs) = lookup("ZINNIA_TIMEOUT_SECS") {
            let secs = secs
                .trim()
                .parse::<u64>()
                .map_err(|e| ConfigError::invalid_value("ZINNIA_TIMEOUT_SECS", e.to_string()))?;
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(ms) = lookup("ZINNIA_TOKEN_REFRESH_INTERVAL_MS") {
            let ms = ms.trim().parse::<u64>().map_err(|e| {
                ConfigError::invalid_value("ZINNIA_TOKEN_REFRESH_INTERVAL_MS", e.to_string())
            })?;
            builder = builder.keepalive_interval((ms > 0).then(|| Duration::from_millis(ms)));
        }
        if let Some(mode) = lookup("ZINNIA_CREDENTIAL_MODE") {
            builder = builder.credential_mode(mode.parse()?);
        }

        builder.build()
    }

    /// Check the base URL and return it without a trailing slash.
    pub fn normalized_base_url(&self) -> Result<String, ConfigError> {
        let trimmed = self.base_url.trim().trim_end_matches('/');
        let parsed = Url::parse(trimmed).map_err(|e| ConfigError::InvalidBaseUrl {
            input: self.base_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBaseUrl {
                input: self.base_url.clone(),
                reason: format!("unsupported scheme `{}`", parsed.scheme()),
            });
        }
        Ok(trimmed.to_owned())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.normalized_base_url()?;
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid_value("timeout", "must be greater than zero"));
        }
        if self.keepalive_interval.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::invalid_value(
                "keepalive_interval",
                "use `None` to disable the keepalive",
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::invalid_value("event_capacity", "must be at least 1"));
        }
        Ok(())
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Add a header; custom headers take precedence over defaults.
    pub fn header(mut self, name: reqwest::header::HeaderName, value: HeaderValue) -> Self {
        self.config.headers.insert(name, value);
        self
    }

    pub fn credential_mode(mut self, mode: CredentialMode) -> Self {
        self.config.credential_mode = mode;
        self
    }

    pub fn paths(mut self, paths: AuthPaths) -> Self {
        self.config.paths = paths;
        self
    }

    pub fn keepalive_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.keepalive_interval = interval;
        self
    }

    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.config.proxy = proxy;
        self
    }

    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.pool_max_idle_per_host = max;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_web_console() {
        let config = ClientConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.keepalive_interval, Some(Duration::from_secs(720)));
        assert_eq!(config.credential_mode, CredentialMode::Explicit);
        assert_eq!(
            config.paths.excluded_from_renewal(),
            ["/users/refresh", "/users/login", "/users/register"]
        );
    }

    #[test]
    fn env_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("ZINNIA_API_BASE_URL", "https://iot.example.com/api/v1/"),
            ("ZINNIA_TIMEOUT_SECS", "5"),
            ("ZINNIA_TOKEN_REFRESH_INTERVAL_MS", "0"),
            ("ZINNIA_CREDENTIAL_MODE", "Ambient"),
        ]))
        .unwrap();

        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.keepalive_interval, None);
        assert_eq!(config.credential_mode, CredentialMode::Ambient);
        assert_eq!(
            config.normalized_base_url().unwrap(),
            "https://iot.example.com/api/v1"
        );
    }

    #[test]
    fn rejects_bad_values() {
        assert!(ClientConfig::from_lookup(lookup(&[("ZINNIA_TIMEOUT_SECS", "soon")])).is_err());
        assert!(ClientConfig::from_lookup(lookup(&[("ZINNIA_CREDENTIAL_MODE", "jwt")])).is_err());
        assert!(
            ClientConfig::builder()
                .base_url("ftp://example.com")
                .build()
                .is_err()
        );
        assert!(
            ClientConfig::builder()
                .timeout(Duration::ZERO)
                .build()
                .is_err()
        );
    }
}
