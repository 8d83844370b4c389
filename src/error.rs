//! Error types shared across the bridge

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("authorization required, visit {0}")]
    AuthorizationRequired(String),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("credentials unusable, must re-login: {0}")]
    LocalIo(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl Error {
    /// Whether the client has to go through login again to recover.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            Error::Auth(_) | Error::AuthorizationRequired(_) | Error::LocalIo(_)
        )
    }

    /// Short machine-readable reason sent alongside `error` broadcasts.
    pub fn reason(&self) -> String {
        match self {
            Error::Auth(_) => "unauthorized".to_string(),
            Error::AuthorizationRequired(url) => url.clone(),
            Error::Remote(e) => e.reason.clone(),
            Error::LocalIo(_) => "must_relogin".to_string(),
            Error::Io(_) | Error::Json(_) | Error::WebSocket(_) => "internal".to_string(),
        }
    }
}

/// A failed call against the remote API, reported to clients as `error`.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize)]
#[error("{command} failed: {message} ({reason})")]
pub struct RemoteError {
    pub command: String,
    pub message: String,
    pub reason: String,
}

impl RemoteError {
    pub fn new(
        command: impl Into<String>,
        message: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            message: message.into(),
            reason: reason.into(),
        }
    }

    /// Build from an arbitrary API error, classifying it by status text.
    pub fn classify(command: &str, error: &dyn std::fmt::Display) -> Self {
        let message = error.to_string();
        let reason = classify_reason(&message);
        Self::new(command, message, reason)
    }

    /// Same error, reported under a different command name.
    pub fn with_command(mut self, command: &str) -> Self {
        self.command = command.to_string();
        self
    }
}

fn classify_reason(message: &str) -> &'static str {
    let lower = message.to_lowercase();
    if lower.contains("404") || lower.contains("no active device") || lower.contains("device not found") {
        "no_active_device"
    } else if lower.contains("403") {
        "forbidden"
    } else if lower.contains("401") {
        "unauthorized"
    } else if lower.contains("429") {
        "rate_limited"
    } else if lower.contains("invalid") && lower.contains("id") {
        "invalid_uri"
    } else {
        "unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_status_codes() {
        let e = RemoteError::classify("play", &"http error: status code 404 Not Found");
        assert_eq!(e.reason, "no_active_device");
        assert_eq!(e.command, "play");

        let e = RemoteError::classify("pause", &"status code 403 Forbidden");
        assert_eq!(e.reason, "forbidden");

        let e = RemoteError::classify("next", &"status code 429 Too Many Requests");
        assert_eq!(e.reason, "rate_limited");

        let e = RemoteError::classify("next", &"connection reset");
        assert_eq!(e.reason, "unknown");
    }

    #[test]
    fn login_errors_require_login() {
        assert!(Error::LocalIo("corrupt".into()).requires_login());
        assert!(Error::AuthorizationRequired("https://x".into()).requires_login());
        assert!(!Error::Remote(RemoteError::new("play", "m", "r")).requires_login());
    }
}
