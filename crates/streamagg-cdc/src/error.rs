//! Error types for change-stream decoding and materialization

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for CDC operations
pub type Result<T> = std::result::Result<T, CdcError>;

/// Error categories for metrics and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The record could not be decoded (bad JSON, wrong shape)
    Serialization,
    /// The record decoded but violates the change-event contract
    Envelope,
    /// Invalid settings
    Configuration,
}

/// CDC-specific errors
#[derive(Error, Debug)]
pub enum CdcError {
    /// JSON decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Key bytes missing or undecodable
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Envelope decoded but is not a usable row-level change
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CdcError {
    /// Create an invalid key error
    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Self::InvalidKey(msg.into())
    }

    /// Create a malformed envelope error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedEnvelope(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the error is caused by the content of a record.
    ///
    /// Such errors are fatal to the record; retrying the same bytes cannot
    /// succeed.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, Self::Config(_))
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Json(_) | Self::InvalidKey(_) => ErrorCategory::Serialization,
            Self::MalformedEnvelope(_) => ErrorCategory::Envelope,
            Self::Config(_) => ErrorCategory::Configuration,
        }
    }
}
