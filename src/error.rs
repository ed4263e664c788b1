//! Error types for the session engine.

use thiserror::Error;

/// A shared error type for the conversation session core.
///
/// Only `NotConfigured`, `Remote` and `InvalidState` ever reach the UI through
/// the session view. `Persistence` and `Auxiliary` failures are logged and
/// swallowed by the controller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The remote completion API is not configured
    #[error("Remote API is not configured: {0}")]
    NotConfigured(String),

    /// Network or remote failure on the primary completion call
    #[error("Remote error: {0}")]
    Remote(String),

    /// Write-through or read-back against the persistence backend failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Quick-reply or feedback generation failed
    #[error("Auxiliary request failed: {0}")]
    Auxiliary(String),

    /// Operation is not valid in the current session state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization { format: String, message: String },

    /// The in-flight exchange was cancelled
    #[error("Request cancelled")]
    Cancelled,
}

impl SessionError {
    pub fn not_configured(message: impl Into<String>) -> Self {
        Self::NotConfigured(message.into())
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote(message.into())
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    pub fn auxiliary(message: impl Into<String>) -> Self {
        Self::Auxiliary(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_not_configured(&self) -> bool {
        matches!(self, Self::NotConfigured(_))
    }

    /// Short message shown inline in the conversation.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotConfigured(_) => {
                "The assistant is not configured yet. Add an API URL and key first.".to_string()
            }
            Self::Remote(message) => format!("Failed to get a response: {}", message),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Remote(format!("request timed out: {}", err))
        } else {
            Self::Remote(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for SessionError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(format!("{} (kind: {:?})", err, err.kind()))
    }
}

/// A type alias for `Result<T, SessionError>`.
pub type Result<T> = std::result::Result<T, SessionError>;
