//! Error types for deepdive.
//!
//! Library crates use [`DeepDiveError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all deepdive operations.
#[derive(Debug, thiserror::Error)]
pub enum DeepDiveError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to a collaborator.
    #[error("network error: {0}")]
    Network(String),

    /// HTML parsing or content extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Checkpoint database error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Completion provider error (transport, API status, empty reply).
    #[error("completion error: {0}")]
    Completion(String),

    /// Search provider error.
    #[error("search error: {0}")]
    Search(String),

    /// Page renderer error (navigation, blocked target, unknown handle).
    #[error("render error: {0}")]
    Render(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input validation error (topic mismatch, bad arguments, step misuse).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A session id that does not match the canonical UUID format.
    #[error("invalid session id: {0:?}")]
    InvalidSessionId(String),

    /// HTML-to-Markdown conversion error.
    #[error("conversion error: {0}")]
    Conversion(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DeepDiveError>;

impl DeepDiveError {
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

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
