use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use zinnia_client::CredentialMode;

#[derive(Parser, Debug)]
#[command(name = "zinnia", version, about = "Command-line client for the Zinnia API")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (default: <config dir>/zinnia/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// API base URL
    #[arg(long, global = true, env = "ZINNIA_API_BASE_URL")]
    pub base_url: Option<String>,

    /// Credential mode: explicit (bearer tokens) or ambient (cookies)
    #[arg(long, global = true, env = "ZINNIA_CREDENTIAL_MODE", value_parser = parse_mode)]
    pub mode: Option<CredentialMode>,

    /// Request timeout in seconds
    #[arg(long, global = true, env = "ZINNIA_TIMEOUT_SECS")]
    pub timeout: Option<u64>,

    /// Output format
    #[arg(long, short, global = true, value_enum, default_value_t = OutputFormat::Pretty)]
    pub output: OutputFormat,

    /// Enable debug logging
    #[arg(long, short, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(long, short, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Log in and persist the session
    Login {
        /// Username or email
        #[arg(long)]
        login: String,

        /// Password (read from stdin when omitted)
        #[arg(long, env = "ZINNIA_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Create an account
    Register {
        #[arg(long)]
        email: String,

        #[arg(long)]
        username: String,

        /// Password (read from stdin when omitted)
        #[arg(long, env = "ZINNIA_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Show the logged-in user
    Whoami,

    /// Send an authenticated request
    Request {
        /// HTTP method
        method: String,

        /// Path relative to the base URL, query string allowed
        path: String,

        /// JSON request body
        #[arg(long, short)]
        data: Option<String>,
    },

    /// Renew the session now
    Refresh,

    /// End the session
    Logout {
        /// Revoke every session of this user
        #[arg(long)]
        all: bool,
    },

    /// Keep the session alive until interrupted
    Keepalive {
        /// Renewal interval in seconds (overrides configuration)
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    Pretty,
    /// JSON output
    Json,
}

fn parse_mode(s: &str) -> Result<CredentialMode, String> {
    s.parse().map_err(|e: zinnia_client::ConfigError| e.to_string())
}
