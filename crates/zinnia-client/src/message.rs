//! Human-readable messages for failed responses.
//!
//! Preference order: `error.message` in the body, then the top-level
//! `message`, then a default for the status code, then a generic fallback.

use reqwest::StatusCode;
use serde_json::Value;

/// Used when nothing more specific is known, including transport failures.
pub const GENERIC_FAILURE_MESSAGE: &str = "Network request failed";

/// Default message for a status code, if one is defined.
pub fn default_status_message(status: StatusCode) -> Option<&'static str> {
    match status.as_u16() {
        400 => Some("Invalid request parameters"),
        401 => Some("Authentication failed"),
        403 => Some("Permission denied"),
        404 => Some("Resource not found"),
        429 => Some("Too many requests, please try again later"),
        s if s >= 500 => Some("Server error, please try again later"),
        _ => None,
    }
}

/// Derive a message from a response body and status.
pub fn extract_error_message(status: Option<StatusCode>, body: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<Value>(body) {
        if let Some(message) = non_empty_str(json.pointer("/error/message")) {
            return message.to_owned();
        }
        if let Some(message) = non_empty_str(json.get("message")) {
            return message.to_owned();
        }
    }

    status
        .and_then(default_status_message)
        .unwrap_or(GENERIC_FAILURE_MESSAGE)
        .to_owned()
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
