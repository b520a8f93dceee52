//! Error types for the Turnstile service.

use thiserror::Error;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// The counter store could not be reached, failed mid-operation, or timed out
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A limit, window or key violates its required bounds
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Configuration sources could not be read or deserialized
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redis::RedisError> for TurnstileError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::InvalidClientConfig => {
                TurnstileError::InvalidConfiguration(err.to_string())
            }
            _ => TurnstileError::StorageUnavailable(err.to_string()),
        }
    }
}

impl From<config::ConfigError> for TurnstileError {
    fn from(err: config::ConfigError) -> Self {
        TurnstileError::Config(err.to_string())
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
