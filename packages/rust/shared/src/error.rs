//! Error types for channel-digest.
//!
//! Library crates use [`DigestError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all channel-digest operations.
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport-level HTTP failure (connect, timeout, body read).
    #[error("network error: {0}")]
    Network(String),

    /// A remote service answered but reported a failure.
    #[error("{service} API error: {message}")]
    Api {
        service: &'static str,
        message: String,
    },

    /// Malformed payload or unparsable value.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Checkpoint could not be read or persisted.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DigestError>;

impl DigestError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an API error attributed to a remote service.
    pub fn api(service: &'static str, msg: impl Into<String>) -> Self {
        Self::Api {
            service,
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
