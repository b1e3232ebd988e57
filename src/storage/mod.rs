//! Storage Layer Module
//!
//! Provides persistence for redemption records.
//!
//! This module contains:
//! - Storage trait definition with the optimistic version contract
//! - SQLite implementation for production
//! - In-memory implementation for testing

pub mod memory;
pub mod sqlite;
pub mod traits;

// Re-exports for convenience
pub use memory::MemoryRedemptionStore;
pub use sqlite::SqliteRedemptionStore;
pub use traits::{CreateOutcome, RedemptionStore, StorageError, StorageResult};
