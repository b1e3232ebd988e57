//! Storage Trait Definitions
//!
//! Abstract storage interface for redemption records.
//! Implementations can use SQLite (production) or in-memory (testing).
//!
//! ## Version Check
//!
//! `update` is a compare-and-swap on `version`: the write only lands if the
//! stored version still equals `expected_version`, and the stored version is
//! then `expected_version + 1`. A stale write returns
//! `StorageError::VersionConflict`, distinct from `StorageError::NotFound`.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

use crate::types::redemption::{Redemption, RedemptionStatus};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Another writer advanced the record since it was read
    #[error("Version conflict on {id}: expected version {expected}")]
    VersionConflict { id: String, expected: u64 },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl StorageError {
    /// Whether the store itself is unusable, as opposed to a per-record outcome
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StorageError::Connection(_) | StorageError::Database(_))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Outcome of an idempotent insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Redemption storage interface
///
/// Implementations:
/// - `SqliteRedemptionStore` - Production storage with SQLite
/// - `MemoryRedemptionStore` - In-memory storage for testing
#[async_trait]
pub trait RedemptionStore: Send + Sync {
    /// Insert a new record; an existing id is left untouched
    async fn create(&self, record: &Redemption) -> StorageResult<CreateOutcome>;

    /// Conditionally replace a record, returning the new version
    async fn update(&self, record: &Redemption, expected_version: u64) -> StorageResult<u64>;

    /// Get a record by ID
    async fn get_by_id(&self, id: &str) -> StorageResult<Option<Redemption>>;

    /// Get records with a status, oldest first, optionally for one chain
    async fn get_by_status(
        &self,
        status: RedemptionStatus,
        chain_name: Option<&str>,
    ) -> StorageResult<Vec<Redemption>>;

    /// Delete a record by ID (administrative)
    async fn delete(&self, id: &str) -> StorageResult<bool>;

    /// Get count by status, optionally for one chain
    async fn count_by_status(
        &self,
        chain_name: Option<&str>,
    ) -> StorageResult<HashMap<RedemptionStatus, u64>>;
}
