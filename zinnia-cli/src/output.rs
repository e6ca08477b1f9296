use serde::Serialize;
use serde_json::{Value, json};
use zinnia_client::{HttpResponse, User};

use crate::cli::OutputFormat;
use crate::error::Result;

pub struct OutputManager {
    format: OutputFormat,
}

impl OutputManager {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// A one-line status message, e.g. "Logged out".
    pub fn message(&self, text: &str) -> Result<String> {
        match self.format {
            OutputFormat::Pretty => Ok(text.to_string()),
            OutputFormat::Json => self.json(&json!({"status": "ok", "message": text})),
        }
    }

    pub fn user(&self, user: &User) -> Result<String> {
        match self.format {
            OutputFormat::Pretty => {
                let mut out = String::new();
                out.push_str(&format!("User:     {} ({})\n", user.username, user.id));
                out.push_str(&format!("Email:    {}", user.email));
                if !user.email_verified {
                    out.push_str(" (unverified)");
                }
                out.push('\n');
                out.push_str(&format!("Role:     {:?}\n", user.role));
                out.push_str(&format!(
                    "Created:  {}",
                    user.created_at.format("%Y-%m-%d %H:%M:%S UTC")
                ));
                if let Some(last) = user.last_login_at {
                    out.push_str(&format!(
                        "\nLast login: {}",
                        last.format("%Y-%m-%d %H:%M:%S UTC")
                    ));
                }
                Ok(out)
            }
            OutputFormat::Json => self.json(user),
        }
    }

    /// Body of a raw response: pretty JSON when possible, text otherwise.
    pub fn response(&self, response: &HttpResponse) -> Result<String> {
        let body = match serde_json::from_slice::<Value>(&response.body) {
            Ok(value) => value,
            Err(_) => Value::String(String::from_utf8_lossy(&response.body).into_owned()),
        };
        match self.format {
            OutputFormat::Pretty => match body {
                Value::String(text) => Ok(text),
                other => Ok(serde_json::to_string_pretty(&other)?),
            },
            OutputFormat::Json => self.json(&json!({
                "status": response.status.as_u16(),
                "body": body,
            })),
        }
    }

    pub fn error(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Pretty => format!("Error: {message}"),
            OutputFormat::Json => json!({"status": "error", "message": message}).to_string(),
        }
    }

    fn json<T: Serialize + ?Sized>(&self, value: &T) -> Result<String> {
        Ok(serde_json::to_string_pretty(value)?)
    }
}
