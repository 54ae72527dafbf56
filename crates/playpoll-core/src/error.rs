//! Core error types for playpoll-core.
//!
//! One hierarchy built with thiserror. Failures inside a poll's own tasks are
//! logged and contained; only configuration and storage errors ever surface to
//! the operator.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for playpoll-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Messaging collaborator errors
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    /// Snapshot persistence errors
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors reported by the messaging collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessagingError {
    /// Network hiccup, rate limit, gateway timeout. Worth another try later.
    #[error("transient messaging failure: {0}")]
    Transient(String),

    /// The referenced channel or message no longer exists.
    #[error("message or channel not found: {0}")]
    NotFound(String),

    /// The platform refused the call (missing permission, bad emoji, ...).
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl MessagingError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, MessagingError::NotFound(_))
    }
}

/// Errors from the state snapshot store.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// The snapshot exists but could not be decoded.
    #[error("snapshot at {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },

    /// Reading the snapshot failed.
    #[error("failed to read snapshot at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing or replacing the snapshot failed.
    #[error("failed to write snapshot at {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The blocking writer task was cancelled or panicked.
    #[error("snapshot writer task failed: {0}")]
    Writer(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Unknown dot-path key
    #[error("unknown config key: {0}")]
    UnknownKey(String),

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// The data directory could not be located or created
    #[error("data directory unavailable: {0}")]
    DataDir(String),
}

/// Validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    /// Empty text where content is required
    #[error("'{0}' must not be empty")]
    Empty(String),
}

impl ValidationError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        ValidationError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messaging_error_wraps_into_core_error() {
        let err: CoreError = MessagingError::NotFound("message 42".into()).into();
        assert_eq!(
            err.to_string(),
            "Messaging error: message or channel not found: message 42"
        );
    }

    #[test]
    fn not_found_is_classified() {
        assert!(MessagingError::NotFound("x".into()).is_not_found());
        assert!(!MessagingError::Transient("x".into()).is_not_found());
    }

    #[test]
    fn validation_message_names_field() {
        let err = ValidationError::invalid("threshold", "must be at least 1");
        assert_eq!(
            err.to_string(),
            "Invalid value for 'threshold': must be at least 1"
        );
    }
}
