//! Error types for docgrab.
//!
//! Library crates use [`DocgrabError`] via `thiserror`.
//! The CLI app wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all docgrab operations.
#[derive(Debug, thiserror::Error)]
pub enum DocgrabError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error during crawling.
    #[error("network error: {0}")]
    Network(String),

    /// HTML or document parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// LM provider call error (HTTP, status, or body decode).
    #[error("llm error: {0}")]
    Llm(String),

    /// LM response did not match the expected schema.
    #[error("llm parse error: {0}")]
    LlmParse(String),

    /// Content cache index or record error.
    #[error("cache error: {0}")]
    Cache(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (invariant violation, invalid input).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The run was cancelled before this operation completed.
    #[error("operation cancelled")]
    Cancelled,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DocgrabError>;

impl DocgrabError {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = DocgrabError::config("OPENAI_API_KEY is not set");
        assert_eq!(err.to_string(), "config error: OPENAI_API_KEY is not set");

        let err = DocgrabError::validation("max_depth must be at least 1");
        assert!(err.to_string().contains("max_depth"));
    }

    #[test]
    fn llm_errors_are_distinct() {
        let call = DocgrabError::Llm("HTTP 500".into());
        let parse = DocgrabError::LlmParse("no decision field".into());
        assert!(call.to_string().starts_with("llm error"));
        assert!(parse.to_string().starts_with("llm parse error"));
    }
}
