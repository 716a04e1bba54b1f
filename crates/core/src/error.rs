//! Core error types for tempo operations.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

use thiserror::Error;

/// Core error type for tempo operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // Configuration errors
    #[error("invalid configuration for '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },
}

impl Error {
    /// Create an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Check if the error is a configuration issue.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::InvalidConfig { .. })
    }
}
