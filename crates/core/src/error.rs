//! Core error types

use thiserror::Error;

/// Core error type for MapMesh
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed domain identifier or peer address
    #[error("Invalid identifier '{value}': {reason}")]
    InvalidIdentifier { value: String, reason: String },

    /// Configuration could not be parsed or failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
