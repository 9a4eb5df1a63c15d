//! Common error types for the load-balancer components.

use std::fmt;

/// A specialized Result type for balancer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for balancer operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Health check error: {0}")]
    Check(String),

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new health check error.
    pub fn check(msg: impl fmt::Display) -> Self {
        Error::Check(msg.to_string())
    }

    /// Create a new metrics error.
    pub fn metrics(msg: impl fmt::Display) -> Self {
        Error::Metrics(msg.to_string())
    }

    /// Create a new other error.
    pub fn other(msg: impl fmt::Display) -> Self {
        Error::Other(msg.to_string())
    }
}
