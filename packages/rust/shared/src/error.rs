//! Error types for leadflow.
//!
//! Library crates use [`LeadflowError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Variants follow the pipeline's failure taxonomy: configuration errors are
//! fatal and never retried, transient capability errors are retried with
//! backoff, permanent capability errors are recorded against the item.

use std::path::PathBuf;

/// Top-level error type for all leadflow operations.
#[derive(Debug, thiserror::Error)]
pub enum LeadflowError {
    /// Missing credentials, missing required global section, malformed settings.
    #[error("config error: {message}")]
    Config { message: String },

    /// Timeout, rate limit, or temporary unavailability of an external capability.
    #[error("transient error from {capability}: {message}")]
    Transient {
        capability: &'static str,
        message: String,
    },

    /// The capability rejected the request outright (bad recipient, bad input).
    #[error("permanent error from {capability}: {message}")]
    Permanent {
        capability: &'static str,
        message: String,
    },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// A record that was expected to exist does not.
    #[error("not found: {0}")]
    NotFound(String),

    /// Another operation holds the record (e.g. a lead's in-flight lock).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (schema mismatch, invalid format, illegal transition).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// JSON encode/decode failure for stored documents.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LeadflowError>;

impl LeadflowError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a transient capability error.
    pub fn transient(capability: &'static str, msg: impl Into<String>) -> Self {
        Self::Transient {
            capability,
            message: msg.into(),
        }
    }

    /// Create a permanent capability error.
    pub fn permanent(capability: &'static str, msg: impl Into<String>) -> Self {
        Self::Permanent {
            capability,
            message: msg.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Only transient capability failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Configuration errors abort the requested operation.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}

/// Classify a non-success HTTP status from a capability endpoint.
///
/// 408, 429 and 5xx are transient; any other status is a permanent rejection,
/// except 401/403 which mean the configured credentials are unusable.
pub fn classify_status(capability: &'static str, status: u16, detail: &str) -> LeadflowError {
    let message = if detail.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {detail}")
    };
    match status {
        408 | 429 | 500..=599 => LeadflowError::transient(capability, message),
        401 | 403 => LeadflowError::config(format!("{capability} rejected credentials ({message})")),
        _ => LeadflowError::permanent(capability, message),
    }
}

impl From<serde_json::Error> for LeadflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
