//! Common Infrastructure Module
//!
//! Shared utilities and configuration for the relayer.
//!
//! This module contains:
//! - Configuration loading from environment variables
//! - Structured logging setup
//! - Common error types

pub mod config;
pub mod error;
pub mod logging;

// Re-exports for convenience
pub use config::{ChainConfig, ConfigError, Network, RelayerConfig};
pub use error::{RelayerError, Result};
pub use logging::{
    generate_correlation_id, init_from_config, init_logging, log_redemption_event, ErrorDetails,
    EventCategory, LogEvent, LogLevel, LoggingError,
};
