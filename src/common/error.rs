//! Common Error Types for the tBTC Relayer
//!
//! Provides unified error handling across all modules.

use thiserror::Error;

use crate::redemption::coordinator::CoordinatorError;
use crate::redemption::listener::ListenerError;
use crate::storage::StorageError;

/// Root error type for the relayer
#[derive(Debug, Error)]
pub enum RelayerError {
    #[error("configuration error: {0}")]
    Config(#[from] super::config::ConfigError),

    #[error("logging error: {0}")]
    Logging(#[from] super::logging::LoggingError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("listener error: {0}")]
    Listener(#[from] ListenerError),

    #[error("coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    /// Bad operator input (CLI arguments, event files)
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        match self {
            RelayerError::Storage(e) => e.is_unavailable(),
            RelayerError::Listener(ListenerError::Storage(e))
            | RelayerError::Coordinator(CoordinatorError::Storage(e)) => e.is_unavailable(),
            RelayerError::Io(_) => true,
            _ => false,
        }
    }

    /// Stable error code for logs and exit reporting
    pub fn error_code(&self) -> &'static str {
        match self {
            RelayerError::Config(_) => "CONFIG_ERROR",
            RelayerError::Logging(_) => "LOGGING_ERROR",
            RelayerError::Storage(_) => "STORAGE_ERROR",
            RelayerError::Listener(_) => "LISTENER_ERROR",
            RelayerError::Coordinator(_) => "COORDINATOR_ERROR",
            RelayerError::Validation(_) => "VALIDATION_ERROR",
            RelayerError::NotFound(_) => "NOT_FOUND",
            RelayerError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias using RelayerError
pub type Result<T> = std::result::Result<T, RelayerError>;
