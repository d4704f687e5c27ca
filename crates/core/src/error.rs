//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid idea: {0}")]
    InvalidIdea(String),

    #[error("invalid user id: {0}")]
    InvalidUserId(String),

    #[error("invalid email: {0}")]
    InvalidEmail(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
