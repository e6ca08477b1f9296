use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use zinnia_client::{AuthPaths, ClientConfig, CredentialMode, ProxyConfig};

use crate::cli::Args;
use crate::error::{CliError, Result};

const APP_DIR: &str = "zinnia";

/// Settings read from `config.toml`. Command-line flags and `ZINNIA_*`
/// environment variables take precedence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub base_url: Option<String>,
    pub credential_mode: Option<CredentialMode>,
    pub timeout_secs: Option<u64>,
    /// `0` disables the keepalive.
    pub keepalive_interval_secs: Option<u64>,
    /// Where the explicit-mode session is persisted.
    pub session_file: Option<PathBuf>,
    pub paths: AuthPaths,
    pub proxy: ProxyConfig,
}

impl AppConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
    }

    /// Load from `path`, or from the default location. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            debug!(path = %path.display(), "No config file; using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn session_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.session_file {
            return Ok(path.clone());
        }
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join("session.json"))
            .ok_or_else(|| {
                CliError::InvalidInput(
                    "cannot determine config directory; set `session_file`".to_string(),
                )
            })
    }

    /// Merge file settings with command-line overrides.
    pub fn client_config(&self, args: &Args) -> Result<ClientConfig> {
        let mut builder = ClientConfig::builder()
            .paths(self.paths.clone())
            .proxy(self.proxy.clone());

        if let Some(url) = args.base_url.as_ref().or(self.base_url.as_ref()) {
            builder = builder.base_url(url.clone());
        }
        if let Some(mode) = args.mode.or(self.credential_mode) {
            builder = builder.credential_mode(mode);
        }
        if let Some(secs) = args.timeout.or(self.timeout_secs) {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.keepalive_interval_secs {
            builder = builder.keepalive_interval((secs > 0).then(|| Duration::from_secs(secs)));
        }

        Ok(builder.build()?)
    }
}
