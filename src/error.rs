// src/error.rs

//! Unified error handling for the harvester.

use std::fmt;

use thiserror::Error;

/// Result type alias for harvester operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Message attached to listings whose enrichment was skipped by a stop request.
pub const STOPPED_MESSAGE: &str = "Operation stopped";

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed at the transport level
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Transport failure reported without a reqwest error (timeouts, resets)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Server answered with a non-success status
    #[error("HTTP status {status} for {url}")]
    Status { status: u16, url: String },

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization failed
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// A listing box failed structural validation
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// Unexpected structure while extracting detail data
    #[error("Parse error: {0}")]
    Parse(String),

    /// Crawling error
    #[error("Crawl error for {context}: {message}")]
    Crawl { context: String, message: String },

    /// A stop was requested; not a failure
    #[error("{}", STOPPED_MESSAGE)]
    Cancelled,
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a malformed record error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedRecord(message.into())
    }

    /// Create a detail parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create a crawl error with context.
    pub fn crawl(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Crawl {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Whether a page fetch that failed this way should be retried under backoff.
    ///
    /// Transport failures and HTTP 403, 429 and 5xx qualify; every other
    /// status is fatal for a crawl run.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Transport(_) => true,
            Self::Status { status, .. } => matches!(status, 403 | 429) || *status >= 500,
            _ => false,
        }
    }

    /// Whether this is a requested stop rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> AppError {
        AppError::Status {
            status: code,
            url: "https://example.com/list".to_string(),
        }
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(status(403).is_retryable());
        assert!(status(429).is_retryable());
        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(AppError::transport("connection reset").is_retryable());
    }

    #[test]
    fn test_non_network_errors_not_retryable() {
        assert!(!AppError::malformed("no rent table").is_retryable());
        assert!(!AppError::Cancelled.is_retryable());
        assert!(AppError::Cancelled.is_cancelled());
    }

    #[test]
    fn test_status_message_mentions_code() {
        assert!(status(403).to_string().contains("403"));
        assert_eq!(AppError::Cancelled.to_string(), STOPPED_MESSAGE);
    }
}
