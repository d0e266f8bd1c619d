use std::fmt;

use reqwest::StatusCode;
use serde_json::{Error as JsonError, Value};

#[derive(Debug)]
pub enum ClientError {
    InvalidHeader(String),
    Request(reqwest::Error),
    Status(StatusCode, String),
    Stream(reqwest::Error),
    Serde(JsonError),
    Cancelled,
}

impl ClientError {
    /// True for network-level failures that leave the turn incomplete.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Request(_) | Self::Status(..) | Self::Stream(_))
    }

    /// Short text shown next to the failed turn.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Status(status, _) => format!("server returned {}", status.as_u16()),
            Self::Request(error) if error.is_connect() || error.is_timeout() => {
                "network error - check your connection".to_owned()
            }
            Self::Stream(_) => "connection lost while streaming".to_owned(),
            Self::Cancelled => "cancelled".to_owned(),
            _ => "connection failed".to_owned(),
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHeader(message) => write!(f, "invalid header: {message}"),
            Self::Request(error) => write!(f, "request error: {error}"),
            Self::Status(status, message) => write!(f, "HTTP {status} {message}"),
            Self::Stream(error) => write!(f, "stream read error: {error}"),
            Self::Serde(error) => write!(f, "serialization error: {error}"),
            Self::Cancelled => write!(f, "request was cancelled"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Request(error) | Self::Stream(error) => Some(error),
            Self::Serde(error) => Some(error),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(error: reqwest::Error) -> Self {
        Self::Request(error)
    }
}

impl From<JsonError> for ClientError {
    fn from(error: JsonError) -> Self {
        Self::Serde(error)
    }
}

/// Extract a readable message from a non-success response body.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    let fallback = || {
        if body.trim().is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            body.trim().to_string()
        }
    };

    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return fallback();
    };

    let message = match value.get("error") {
        Some(Value::String(message)) => Some(message.clone()),
        Some(error) => error
            .get("message")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        None => value
            .get("message")
            .and_then(Value::as_str)
            .map(ToString::to_string),
    };

    message
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(fallback)
}
