//! Error types for the Marketgate service.

use thiserror::Error;

/// Main error type for Marketgate operations.
#[derive(Error, Debug)]
pub enum MarketgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counter store errors that are not tied to a specific backend
    #[error("Counter store error: {0}")]
    Store(String),

    /// Redis errors from the shared counter store
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Marketgate operations.
pub type Result<T> = std::result::Result<T, MarketgateError>;
