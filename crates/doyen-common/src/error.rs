//! Error types shared across Doyen crates

use thiserror::Error;

/// Result type alias for Doyen operations
pub type Result<T> = std::result::Result<T, DoyenError>;

/// Workspace-wide error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DoyenError {
    /// A required setting is missing or empty
    #[error("Configuration error: {0}")]
    Config(String),

    /// A setting is present but out of range
    #[error("Validation error: {0}")]
    Validation(String),
}

impl DoyenError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
