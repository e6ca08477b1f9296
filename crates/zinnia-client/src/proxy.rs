use serde::{Deserialize, Serialize};
use tracing::warn;

/// Outbound proxy settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// When false, no proxy is used at all (including env/system proxies).
    pub enabled: bool,
    /// Explicit proxy URL (e.g. "http://proxy.example.com:8080", "socks5://...")
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Fall back to env/system proxy settings when no explicit URL is set.
    pub use_system_proxy: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: None,
            username: None,
            password: None,
            use_system_proxy: true,
        }
    }
}

/// What a [`ProxyConfig`] resolves to.
#[derive(Debug)]
enum ProxyChoice {
    /// Leave reqwest's env/system proxy detection alone.
    System,
    Explicit(reqwest::Proxy),
    Direct,
}

impl ProxyConfig {
    /// A configuration that bypasses every proxy.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            use_system_proxy: false,
            ..Self::default()
        }
    }

    pub fn explicit(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    fn choice(&self) -> ProxyChoice {
        if !self.enabled {
            return ProxyChoice::Direct;
        }

        let Some(url) = self.url.as_deref() else {
            return if self.use_system_proxy {
                ProxyChoice::System
            } else {
                ProxyChoice::Direct
            };
        };

        match reqwest::Proxy::all(url) {
            Ok(proxy) => {
                let proxy = match (&self.username, &self.password) {
                    (Some(username), Some(password)) => proxy.basic_auth(username, password),
                    _ => proxy,
                };
                ProxyChoice::Explicit(proxy)
            }
            Err(error) => {
                // Never fall back to the system proxy here.
                warn!(proxy_url = %url, %error, "Invalid proxy URL; connecting directly");
                ProxyChoice::Direct
            }
        }
    }

    /// Configure `builder` for these settings.
    pub fn apply(&self, builder: reqwest::ClientBuilder) -> reqwest::ClientBuilder {
        match self.choice() {
            ProxyChoice::System => builder,
            ProxyChoice::Explicit(proxy) => builder.proxy(proxy),
            ProxyChoice::Direct => builder.no_proxy(),
        }
    }
}
