use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};
use zinnia_client::{
    ApiClient, ApiError, ClientConfig, CredentialMode, CredentialStore, HttpRequest, LoginRequest,
    Method, RegisterRequest, SessionEvent,
};

use crate::cli::Commands;
use crate::error::{CliError, Result};
use crate::output::OutputManager;
use crate::session_file::FileCredentialStore;
use crate::sink::SessionSink;

pub struct CommandExecutor {
    client: ApiClient,
    output: OutputManager,
    sink: SessionSink,
}

impl CommandExecutor {
    /// In explicit mode the session is persisted at `session_path`; ambient
    /// sessions only live as long as the process.
    pub fn new(config: ClientConfig, session_path: PathBuf, output: OutputManager) -> Result<Self> {
        let mode = config.credential_mode;
        let mut builder = ApiClient::builder(config);
        let mut persisted = None;

        if mode == CredentialMode::Explicit {
            let store = FileCredentialStore::open(&session_path)?;
            debug!(path = %store.path().display(), has_session = store.get().is_some(), "Opened session file");
            builder = builder.store(Arc::new(store));
            persisted = Some(session_path);
        }

        let client = builder.build()?;
        let sink = SessionSink::new(&client, persisted);
        Ok(Self {
            client,
            output,
            sink,
        })
    }

    pub async fn execute(&mut self, command: Commands) -> Result<()> {
        let result = match command {
            Commands::Login { login, password } => self.login(login, password).await,
            Commands::Register {
                email,
                username,
                password,
            } => self.register(email, username, password).await,
            Commands::Whoami => self.whoami().await,
            Commands::Request { method, path, data } => {
                self.request(&method, path, data.as_deref()).await
            }
            Commands::Refresh => self.refresh().await,
            Commands::Logout { all } => self.logout(all).await,
            Commands::Keepalive { .. } => self.keepalive().await,
        };

        self.sink.drain();
        self.client.shutdown();
        result
    }

    fn require_session(&self) -> Result<()> {
        let store = self.client.store();
        if store.mode() == CredentialMode::Explicit && store.get().is_none() {
            return Err(CliError::NotLoggedIn);
        }
        Ok(())
    }

    fn print(&self, rendered: String) {
        println!("{rendered}");
    }

    async fn login(&self, login: String, password: Option<String>) -> Result<()> {
        let password = read_password(password)?;
        let response = self.client.login(&LoginRequest::new(login, password)).await?;
        info!(user = %response.user.username, "Login successful");
        self.print(self.output.user(&response.user)?);
        Ok(())
    }

    async fn register(&self, email: String, username: String, password: Option<String>) -> Result<()> {
        let password = read_password(password)?;
        let user = self
            .client
            .register(&RegisterRequest::new(email, username, password))
            .await?;
        self.print(self.output.user(&user)?);
        Ok(())
    }

    async fn whoami(&self) -> Result<()> {
        self.require_session()?;
        let user = self.client.current_user().await?;
        self.print(self.output.user(&user)?);
        Ok(())
    }

    async fn request(&self, method: &str, path: String, data: Option<&str>) -> Result<()> {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| CliError::InvalidInput(format!("invalid HTTP method `{method}`")))?;

        let mut request = HttpRequest::new(method, path);
        if let Some(data) = data {
            let body: Value = serde_json::from_str(data)
                .map_err(|e| CliError::InvalidInput(format!("--data is not valid JSON: {e}")))?;
            request = request.with_json(body);
        }

        let response = self.client.send(request).await?;
        self.print(self.output.response(&response)?);
        Ok(())
    }

    async fn refresh(&self) -> Result<()> {
        self.require_session()?;
        self.client.refresh().await?;
        self.print(self.output.message("Session renewed")?);
        Ok(())
    }

    async fn logout(&self, all: bool) -> Result<()> {
        if all {
            let revoked = self.client.logout_all().await?;
            let text = format!("{} ({} sessions revoked)", revoked.message, revoked.sessions_revoked);
            self.print(self.output.message(&text)?);
        } else {
            self.client.logout().await;
            self.print(self.output.message("Logged out")?);
        }
        Ok(())
    }

    async fn keepalive(&mut self) -> Result<()> {
        self.require_session()?;
        if !self.client.start_keepalive() {
            return Err(CliError::InvalidInput(
                "keepalive is disabled; set keepalive_interval_secs or pass --interval".to_string(),
            ));
        }
        if let Some(interval) = self.client.config().keepalive_interval {
            info!(interval_secs = interval.as_secs(), "Keeping session alive; press Ctrl-C to stop");
        }

        loop {
            let event = tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    return Ok(());
                }
                event = self.sink.next() => event,
            };

            match event {
                Some(event @ SessionEvent::Invalidated { .. }) => {
                    debug!(event = %event.description(), "Keepalive ended");
                    return Err(ApiError::SessionExpired.into());
                }
                Some(event) => self.print(self.output.message(&event.description())?),
                None => return Ok(()),
            }
        }
    }
}

/// Use the given password or read one line from stdin.
fn read_password(password: Option<String>) -> Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }

    eprint!("Password: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        return Err(CliError::InvalidInput("empty password".to_string()));
    }
    Ok(password)
}
