//! Shared error type. Every fallible boundary in the workspace returns
//! [`Error`], whose `kind` maps directly onto the `error.code` values a
//! client receives on the stream.

use serde::{Deserialize, Serialize};

/// Stable error classification surfaced to clients as `error.code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// User not authenticated, or no live connection for the tool's provider.
    Auth,
    /// Argument validation failure; `details` names the missing/invalid fields.
    Schema,
    /// Tool unknown or provider misconfigured.
    Configuration,
    /// External provider returned an error; `details` wraps status + payload.
    Provider,
    /// Network/5xx failure after retries exhausted.
    Transport,
    /// Placeholder could not be resolved. Informational, not fatal.
    ResolutionWarning,
    /// LLM returned content not matching the expected structure.
    ParseError,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    pub fn as_code(&self) -> &'static str {
        match self {
            ErrorKind::Auth => "auth",
            ErrorKind::Schema => "schema",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Provider => "provider",
            ErrorKind::Transport => "transport",
            ErrorKind::ResolutionWarning => "resolution_warning",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, thiserror::Error, Clone, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn schema(message: impl Into<String>, missing_fields: Vec<String>) -> Self {
        Self::new(ErrorKind::Schema, message)
            .with_details(serde_json::json!({ "missingFields": missing_fields }))
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn provider(provider_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Provider, message).with_details(serde_json::json!({
            "providerKey": provider_key.into(),
        }))
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn resolution_warning(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResolutionWarning, message)
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseError, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::parse_error(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
