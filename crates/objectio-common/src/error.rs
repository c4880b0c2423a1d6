//! Error types for the bucket index
//!
//! Every bucket-wide index operation reports exactly one of these. Per-shard
//! protocol signals (already-exists on create, not-found on read or delete,
//! advance-and-retry on list, no-data on trim) are absorbed before they get
//! here.

use thiserror::Error;

/// Common result type for index operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for index operations
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("operation not supported: {0}")]
    Unsupported(String),

    #[error("invalid bucket layout: {0}")]
    InvalidLayout(String),

    #[error("invalid placement: {0}")]
    InvalidPlacement(String),

    #[error("remote operation failed: {0}")]
    Remote(String),

    #[error("request timeout")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("failed to decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an unsupported error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create an invalid layout error
    pub fn invalid_layout(msg: impl Into<String>) -> Self {
        Self::InvalidLayout(msg.into())
    }

    /// Create an invalid placement error
    pub fn invalid_placement(msg: impl Into<String>) -> Self {
        Self::InvalidPlacement(msg.into())
    }

    /// Create a decode error for the named record
    pub fn decode(what: &'static str, reason: impl ToString) -> Self {
        Self::Decode {
            what,
            reason: reason.to_string(),
        }
    }

    /// Check if this is a retryable error
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Remote(_))
    }

    /// Check if this is a not found error
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Negative errno equivalent, for callers that log numeric status codes
    #[must_use]
    pub const fn errno(&self) -> i32 {
        match self {
            Self::NotFound(_) => -2,
            Self::AlreadyExists(_) => -17,
            Self::Unsupported(_) => -95,
            Self::InvalidLayout(_) | Self::Remote(_) | Self::Decode { .. } => -5,
            Self::InvalidPlacement(_) | Self::Configuration(_) => -22,
            Self::Timeout => -110,
            Self::Cancelled => -125,
            Self::Internal(_) => -14,
        }
    }
}
